//! Host side of frame-bridge.
//!
//! This crate provides the functions a guest imports from module `env` and
//! the driver that stands in for a browser page.
//!
//! # Modules
//!
//! - [`imports`]: The import table (names, signatures, legacy aliases)
//! - [`console`]: Guest text output
//! - [`svg`]: The drawable path element
//! - [`linker`]: Registration of the table on a Wasmtime linker
//! - [`session`]: Frame clock, scripted input and session reports
//!
//! # Guest Memory
//!
//! Every `(ptr, len)` argument is bounds-checked against the guest memory as
//! it is at the time of the call. Strings must be valid UTF-8; anything else
//! traps the guest call.

pub mod console;
pub mod imports;
pub mod linker;
pub mod session;
pub mod svg;

pub use console::ConsoleHost;
pub use imports::{IMPORTS, ImportSpec};
pub use linker::{create_instance_runner, register_all};
pub use session::{HostSession, SessionPlan, SessionReport, StopReason};
pub use svg::SvgHost;
