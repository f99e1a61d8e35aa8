//! Configuration file structures for frame-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`SessionConfig`]: What to run and where to write results
//! - [`ScriptedInput`]: A keyboard event injected at a given frame

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;
use crate::input::{KeyEventKind, KeyboardEvent};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// fuel_metering = true
///
/// [runtime.execution]
/// max_fuel = 10_000_000
/// timeout_ms = 100
///
/// [runtime.host]
/// frame_rate_hz = 60
/// max_random_bytes = 65536
///
/// [session]
/// module = "./demos/wat/bounce.wat"
/// frames = 600
/// svg_out = "./frame.svg"
///
/// [[input]]
/// frame = 10
/// kind = "down"
/// key = "ArrowLeft"
/// code = 37
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, host and guest settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Scripted keyboard input.
    #[serde(default)]
    pub input: Vec<ScriptedInput>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Scripted input sorted by frame, keeping file order within a frame.
    pub fn input_schedule(&self) -> Vec<ScriptedInput> {
        let mut input = self.input.clone();
        input.sort_by_key(|entry| entry.frame);
        input
    }
}

/// Session settings from the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Guest module path (`.wasm`, `.wat` or `.cwasm`).
    #[serde(default)]
    pub module: Option<String>,

    /// Stop after this many frame ticks.
    #[serde(default)]
    pub frames: Option<u64>,

    /// Write the final SVG path to this file.
    #[serde(default)]
    pub svg_out: Option<String>,

    /// Write a JSON session report to this file.
    #[serde(default)]
    pub report_out: Option<String>,
}

/// A keyboard event injected before the given frame tick.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptedInput {
    /// Zero-based frame tick the event is delivered on.
    pub frame: u64,

    /// Key down or key up.
    pub kind: KeyEventKind,

    /// The event itself.
    #[serde(flatten)]
    pub event: KeyboardEvent,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.session.module.is_none());
        assert!(config.session.frames.is_none());
        assert!(config.session.svg_out.is_none());
        assert!(config.input.is_empty());
        assert_eq!(config.runtime.host.frame_rate_hz, 60);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [session]
            module = "./guest.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.session.module.as_deref(), Some("./guest.wasm"));
        // Defaults applied
        assert_eq!(config.runtime.execution.timeout_ms, 100);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            pooling_allocator = true
            max_instances = 4

            [runtime.execution]
            max_fuel = 5_000_000
            timeout_ms = 50

            [runtime.host]
            frame_rate_hz = 30
            max_random_bytes = 1024
            random_quota_bytes = 4096
            echo_console = false
            max_console_lines = 64
            svg_element_id = "ship"

            [runtime.guest]
            entry_points = ["my_main"]

            [session]
            module = "./asteroids.wasm"
            frames = 120
            svg_out = "./out.svg"

            [[input]]
            frame = 5
            kind = "down"
            key = "a"
            code = 65
            shift = true

            [[input]]
            frame = 6
            kind = "up"
            key = "a"
            code = 65
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.max_instances, 4);
        assert_eq!(config.runtime.execution.max_fuel, 5_000_000);
        assert_eq!(config.runtime.host.frame_rate_hz, 30);
        assert_eq!(config.runtime.host.random_quota_bytes, Some(4096));
        assert!(!config.runtime.host.echo_console);
        assert_eq!(config.runtime.host.max_console_lines, 64);
        assert_eq!(config.runtime.host.svg_element_id, "ship");
        assert_eq!(config.runtime.guest.entry_points, vec!["my_main"]);
        assert_eq!(config.session.frames, Some(120));
        assert_eq!(config.input.len(), 2);
        assert_eq!(config.input[0].kind, KeyEventKind::Down);
        assert!(config.input[0].event.shift);
        assert_eq!(config.input[1].kind, KeyEventKind::Up);
        assert!(!config.input[1].event.shift);
    }

    #[test]
    fn test_input_schedule_is_sorted_and_stable() {
        let toml = r#"
            [[input]]
            frame = 9
            kind = "up"
            key = "x"
            code = 88

            [[input]]
            frame = 2
            kind = "down"
            key = "y"
            code = 89

            [[input]]
            frame = 9
            kind = "down"
            key = "z"
            code = 90
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();
        let schedule = config.input_schedule();
        let keys: Vec<_> = schedule.iter().map(|i| i.event.key.as_str()).collect();

        assert_eq!(keys, vec!["y", "x", "z"]);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
