//! Configuration structures for frame-bridge.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, caching, metering)
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, memory, timeout)
//! - [`HostConfig`]: Host services offered to the guest (frame clock, randomness, console)
//! - [`GuestConfig`]: Names of the guest exports the host calls into

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for a host session.
/// It can be loaded from TOML or JSON; every field has a default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Host service configuration.
    #[serde(default)]
    pub host: HostConfig,

    /// Guest export names.
    #[serde(default)]
    pub guest: GuestConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and compilation caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// A host session usually runs a single guest, so this is off by default.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable Wasmtime's on-disk cache of compiled modules.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Path to a Wasmtime cache configuration file.
    ///
    /// When unset and caching is enabled, Wasmtime's default cache
    /// configuration is used.
    #[serde(default)]
    pub cache_config: Option<String>,

    /// Enable epoch-based interruption.
    ///
    /// Each guest call gets a deadline of `execution.timeout_ms` epoch ticks;
    /// the session driver ticks the epoch once per millisecond.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Enable fuel metering.
    ///
    /// When enabled, every guest call is refuelled with `execution.max_fuel`.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            cache_config: None,
            epoch_interruption: defaults::epoch_interruption(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

/// Per-call execution configuration.
///
/// A guest is entered many times during a session (`main`, then once per
/// dispatched event). These limits apply to each of those calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per guest call.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Guest call timeout in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Host services offered to the guest through the import table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Frame clock rate in frames per second.
    #[serde(default = "defaults::frame_rate_hz")]
    pub frame_rate_hz: u32,

    /// Largest byte count a single `fill_rand` call may request.
    ///
    /// Matches the Web Crypto `getRandomValues` limit by default.
    #[serde(default = "defaults::max_random_bytes")]
    pub max_random_bytes: usize,

    /// Total random bytes a session may draw. Unlimited when unset.
    #[serde(default)]
    pub random_quota_bytes: Option<u64>,

    /// Echo guest `puts` output to stdout in addition to tracing.
    #[serde(default = "defaults::echo_console")]
    pub echo_console: bool,

    /// Console lines kept for the session report. Older lines are dropped.
    #[serde(default = "defaults::max_console_lines")]
    pub max_console_lines: usize,

    /// Identifier of the drawable element targeted by `svg_set_path`.
    #[serde(default = "defaults::svg_element_id")]
    pub svg_element_id: String,

    /// Link WASI preview1 for guests built for `wasm32-wasip1`.
    #[serde(default)]
    pub wasi: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: defaults::frame_rate_hz(),
            max_random_bytes: defaults::max_random_bytes(),
            random_quota_bytes: None,
            echo_console: defaults::echo_console(),
            max_console_lines: defaults::max_console_lines(),
            svg_element_id: defaults::svg_element_id(),
            wasi: false,
        }
    }
}

impl HostConfig {
    /// Interval between two frame ticks.
    ///
    /// A zero frame rate is treated as one frame per second.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate_hz.max(1)
    }
}

/// Names of the exports the host expects from the guest module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuestConfig {
    /// Linear memory export.
    #[serde(default = "defaults::memory_export")]
    pub memory_export: String,

    /// Allocator export, `alloc(len) -> ptr`. Optional in the guest.
    #[serde(default = "defaults::alloc_export")]
    pub alloc_export: String,

    /// Entry point candidates, tried in order.
    #[serde(default = "defaults::entry_points")]
    pub entry_points: Vec<String>,

    /// Event dispatch export, `cb(id, kind, code, char, flags)`.
    #[serde(default = "defaults::callback_export")]
    pub callback_export: String,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            memory_export: defaults::memory_export(),
            alloc_export: defaults::alloc_export(),
            entry_points: defaults::entry_points(),
            callback_export: defaults::callback_export(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        false
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn timeout_ms() -> u64 {
        100
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub const fn frame_rate_hz() -> u32 {
        60
    }

    pub const fn max_random_bytes() -> usize {
        65_536
    }

    pub const fn max_console_lines() -> usize {
        1024
    }

    pub const fn echo_console() -> bool {
        true
    }

    pub fn svg_element_id() -> String {
        "path".to_string()
    }

    pub fn memory_export() -> String {
        "memory".to_string()
    }

    pub fn alloc_export() -> String {
        "alloc".to_string()
    }

    pub fn entry_points() -> Vec<String> {
        vec!["main".to_string(), "my_main".to_string()]
    }

    pub fn callback_export() -> String {
        "event_loop_cb".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 16);
        assert!(config.engine.epoch_interruption);
        assert!(config.engine.fuel_metering);

        assert_eq!(config.execution.max_fuel, 10_000_000);
        assert_eq!(config.execution.timeout_ms, 100);

        assert_eq!(config.host.frame_rate_hz, 60);
        assert_eq!(config.host.max_console_lines, 1024);
        assert_eq!(config.host.max_random_bytes, 65_536);
        assert!(config.host.random_quota_bytes.is_none());

        assert_eq!(config.guest.callback_export, "event_loop_cb");
        assert_eq!(config.guest.entry_points, vec!["main", "my_main"]);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(config.host.svg_element_id, deserialized.host.svg_element_id);
    }

    #[test]
    fn test_execution_limits() {
        let config = ExecutionConfig {
            timeout_ms: 500,
            max_memory_mb: 2,
            ..Default::default()
        };

        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.max_memory_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_frame_interval() {
        let mut host = HostConfig::default();
        host.frame_rate_hz = 50;
        assert_eq!(host.frame_interval(), Duration::from_millis(20));

        host.frame_rate_hz = 0;
        assert_eq!(host.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"host": {"frame_rate_hz": 30}, "guest": {"entry_points": ["start"]}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.host.frame_rate_hz, 30);
        assert_eq!(config.guest.entry_points, vec!["start"]);
        // Defaults for unspecified fields
        assert_eq!(config.host.max_random_bytes, 65_536);
        assert_eq!(config.guest.memory_export, "memory");
        assert_eq!(config.execution.max_fuel, 10_000_000);
    }
}
