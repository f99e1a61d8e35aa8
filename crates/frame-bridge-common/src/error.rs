//! Error types for frame-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for the host session
//! - [`HostFunctionError`]: Errors from host function implementations
//! - [`MemoryError`]: Guest linear memory access and decoding errors
//! - [`WasiError`]: WASI-related errors

use std::io;
use std::str::Utf8Error;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// a guest module, from compilation to event dispatch.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A required guest export is missing or has the wrong type.
    #[error("Export not found: {name}")]
    ExportNotFound {
        /// The name of the export that was not found.
        name: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Instantiation failed (unresolved import, start trap, limits).
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// A guest call exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// A guest call exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A host function failed in a way that cannot be reported to the guest.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from host function implementations.
///
/// When a host function returns one of these, the guest call traps and the
/// error is recovered from the trap by the instance.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// Guest memory could not be read, written or decoded.
    #[error("Guest memory error: {0}")]
    Memory(#[from] MemoryError),

    /// The secure randomness source failed for a reason other than
    /// range or quota.
    #[error("Entropy source unavailable: {reason}")]
    EntropyUnavailable {
        /// Description of the backend failure.
        reason: String,
    },

    /// The guest does not export something the host function needs.
    #[error("Missing guest export: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },
}

/// Guest linear memory errors.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The range does not lie within the current memory.
    #[error("Memory access out of bounds: ptr={ptr} len={len} memory_size={memory_size}")]
    OutOfBounds {
        /// Start offset supplied by the guest.
        ptr: u32,
        /// Length supplied by the guest.
        len: u32,
        /// Memory size in bytes at the time of access.
        memory_size: usize,
    },

    /// The bytes are not valid UTF-8.
    #[error("Invalid UTF-8 at ptr={ptr} len={len}: {source}")]
    InvalidUtf8 {
        /// Start offset supplied by the guest.
        ptr: u32,
        /// Length supplied by the guest.
        len: u32,
        /// Decoder error.
        #[source]
        source: Utf8Error,
    },

    /// A string does not fit in the 32-bit guest address space.
    #[error("Value too large for guest memory: {len} bytes")]
    TooLarge {
        /// Byte length of the value.
        len: usize,
    },
}

/// WASI-related errors.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to initialize or link WASI.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(name: impl Into<String>) -> Self {
        Self::ExportNotFound { name: name.into() }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a guest export was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ExportNotFound { .. })
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }
}

impl HostFunctionError {
    /// Create a new `EntropyUnavailable` error.
    pub fn entropy_unavailable(reason: impl Into<String>) -> Self {
        Self::EntropyUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }
}
