//! Host input event types.
//!
//! These are the keyboard events as the host sees them, before they are
//! encoded into the numeric form the guest receives. They are serializable so
//! that input can be scripted from a configuration file.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEventKind {
    /// Key was pressed down.
    Down,
    /// Key was released.
    Up,
}

impl fmt::Display for KeyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEventKind::Down => write!(f, "keydown"),
            KeyEventKind::Up => write!(f, "keyup"),
        }
    }
}

/// A keyboard event delivered by the host.
///
/// `key` follows the DOM `KeyboardEvent.key` convention: the produced
/// character for printable keys (`"a"`, `"A"`, `" "`) and a key name for
/// everything else (`"Shift"`, `"ArrowLeft"`, `"Enter"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    /// Key value (character or key name).
    pub key: String,

    /// Raw numeric key identifier of the physical/virtual key.
    pub code: u32,

    /// Shift held.
    #[serde(default)]
    pub shift: bool,

    /// Control held.
    #[serde(default)]
    pub ctrl: bool,

    /// Alt held.
    #[serde(default)]
    pub alt: bool,
}

impl KeyboardEvent {
    /// Creates a key event with no modifiers held.
    pub fn new(key: impl Into<String>, code: u32) -> Self {
        Self {
            key: key.into(),
            code,
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    /// Marks shift as held.
    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Marks control as held.
    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    /// Marks alt as held.
    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let event = KeyboardEvent::new("a", 65).with_shift().with_alt();

        assert_eq!(event.key, "a");
        assert_eq!(event.code, 65);
        assert!(event.shift);
        assert!(!event.ctrl);
        assert!(event.alt);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(KeyEventKind::Down.to_string(), "keydown");
        assert_eq!(KeyEventKind::Up.to_string(), "keyup");
    }

    #[test]
    fn test_deserialize_with_default_modifiers() {
        let event: KeyboardEvent = serde_json::from_str(r#"{"key": "Shift", "code": 16}"#).unwrap();

        assert_eq!(event, KeyboardEvent::new("Shift", 16));
    }

    #[test]
    fn test_kind_lowercase() {
        let kind: KeyEventKind = serde_json::from_str(r#""up""#).unwrap();
        assert_eq!(kind, KeyEventKind::Up);
    }
}
