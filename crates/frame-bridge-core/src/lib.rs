//! Core Wasmtime runtime for frame-bridge.
//!
//! This crate hosts one guest module per session and drives it with
//! animation frames and keyboard input:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`CompiledModule`]: Compiled WebAssembly module wrapper
//! - [`HostContext`]: Per-session host state living in the store
//! - [`EventLoopRegistry`]: Event loops, frame scheduling and input routing
//! - [`InstanceRunner`] / [`GuestInstance`]: Instantiation and dispatch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  - Fuel and epoch interruption                          │
//! │  - Optional pooling allocator and compile cache         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  - Pre-compiled machine code                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<HostContext> + GuestInstance           │
//! │  - Event loop registry                                  │
//! │  - Random fill, console, drawable                       │
//! │  - Session metrics                                      │
//! └─────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ event_loop_cb(id, kind, code, char, flags)
//!                  frame ticks / key events
//! ```

pub mod engine;
pub mod event_loop;
pub mod instance;
pub mod memory;
pub mod module;
pub mod random;
pub mod store;

pub use engine::WasmEngine;
pub use event_loop::{EventKind, EventLoopRegistry, LoopId, WireEvent};
pub use instance::{ExecutionResult, GuestInstance, InstanceRunner};
pub use memory::GuestSlice;
pub use module::CompiledModule;
pub use random::{EntropyError, EntropySource, FillStatus, RandomFill};
pub use store::{ConsoleLine, ExecutionMetrics, HostContext, PathElement, create_store};
