//! WebAssembly module compilation and caching.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that handles compilation, serialization, and deserialization of guest modules.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes (or WAT text) at load time
//! - **AOT**: Pre-compile and serialize to disk (`.cwasm`), load without compiling

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use frame_bridge_common::RuntimeError;

/// A compiled guest module.
///
/// This struct wraps a Wasmtime [`Module`] with additional metadata
/// for caching and debugging purposes. Cloning is cheap.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// This deserializes pre-compiled machine code. Only load artifacts that
    /// were written by [`CompiledModule::save_precompiled`] (the CLI's
    /// `--precompile`). Wasmtime rejects artifacts from another version or
    /// incompatible engine settings, but cannot verify the code itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: `.cwasm` inputs are trusted artifacts from `save_precompiled`
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            RuntimeError::compilation_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        // Filename convention: {hash}.cwasm
        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let duration = start.elapsed();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = duration.as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Load a module from disk, choosing the strategy by file extension.
    ///
    /// `.wat` is parsed as text, `.cwasm` is deserialized as a precompiled
    /// artifact and anything else is compiled as a binary module.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("cwasm") => Self::from_precompiled(engine, path),
            Some("wat") => {
                let wat = std::fs::read_to_string(path)?;
                Self::from_wat(engine, &wat)
            }
            _ => {
                let bytes = std::fs::read(path)?;
                Self::from_bytes(engine, &bytes)
            }
        }
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, RuntimeError> {
        self.inner.serialize().map_err(|e| {
            RuntimeError::compilation_failed(format!("Module serialization failed: {e}"))
        })
    }

    /// Precompile to `path` for later loading with [`CompiledModule::from_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    #[instrument(skip(self, path), fields(content_hash = %self.content_hash))]
    pub fn save_precompiled(&self, path: impl AsRef<Path>) -> Result<usize, RuntimeError> {
        let path = path.as_ref();
        let bytes = self.serialize()?;
        std::fs::write(path, &bytes)?;

        info!(path = %path.display(), bytes = bytes.len(), "Precompiled module written");
        Ok(bytes.len())
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// List the module's imports as `(module, name)` pairs.
    pub fn imports(&self) -> Vec<(String, String)> {
        self.inner
            .imports()
            .map(|import| (import.module().to_string(), import.name().to_string()))
            .collect()
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
