//! Common types, errors, and configuration for frame-bridge.
//!
//! This crate provides shared functionality used across the frame-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine, execution and host settings
//! - Keyboard input types shared by the registry and the session driver

pub mod config;
pub mod config_file;
pub mod error;
pub mod input;

pub use config::{EngineConfig, ExecutionConfig, GuestConfig, HostConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, ScriptedInput, SessionConfig};
pub use error::{HostFunctionError, MemoryError, RuntimeError, WasiError};
pub use input::{KeyEventKind, KeyboardEvent};
