//! Input symbols and the control-byte sequences they produce.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeySymbol {
    #[serde(alias = "arrow_up", alias = "arrow-up")]
    Up,
    #[serde(alias = "arrow_down", alias = "arrow-down")]
    Down,
    #[serde(alias = "arrow_left", alias = "arrow-left")]
    Left,
    #[serde(alias = "arrow_right", alias = "arrow-right")]
    Right,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    #[serde(alias = "ctrl+c", alias = "ctrl-c")]
    CtrlC,
    #[serde(alias = "ctrl+d", alias = "ctrl-d")]
    CtrlD,
    #[serde(alias = "ctrl+r", alias = "ctrl-r")]
    CtrlR,
    #[serde(alias = "ctrl+z", alias = "ctrl-z")]
    CtrlZ,
    #[serde(alias = "escape")]
    Esc,
}

impl KeySymbol {
    /// Parses a key name such as `"up"`, `"ctrl+c"` or `"F5"`.
    ///
    /// Unknown names yield `None`; callers treat that as "send nothing".
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        serde_json::from_value(serde_json::Value::String(normalized)).ok()
    }
}

/// Directions reported by a gamepad directional pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpadDirection {
    Up,
    Down,
    Left,
    Right,
}

impl DpadDirection {
    pub fn symbol(self) -> KeySymbol {
        match self {
            DpadDirection::Up => KeySymbol::Up,
            DpadDirection::Down => KeySymbol::Down,
            DpadDirection::Left => KeySymbol::Left,
            DpadDirection::Right => KeySymbol::Right,
        }
    }
}

pub fn bytes_for(symbol: KeySymbol) -> &'static [u8] {
    match symbol {
        KeySymbol::Up => b"\x1b[A",
        KeySymbol::Down => b"\x1b[B",
        KeySymbol::Right => b"\x1b[C",
        KeySymbol::Left => b"\x1b[D",
        KeySymbol::F1 => b"\x1bOP",
        KeySymbol::F2 => b"\x1bOQ",
        KeySymbol::F3 => b"\x1bOR",
        KeySymbol::F4 => b"\x1bOS",
        KeySymbol::F5 => b"\x1b[15~",
        KeySymbol::F6 => b"\x1b[17~",
        KeySymbol::F7 => b"\x1b[18~",
        KeySymbol::F8 => b"\x1b[19~",
        KeySymbol::F9 => b"\x1b[20~",
        KeySymbol::F10 => b"\x1b[21~",
        KeySymbol::F11 => b"\x1b[23~",
        KeySymbol::F12 => b"\x1b[24~",
        KeySymbol::CtrlC => &[0x03],
        KeySymbol::CtrlD => &[0x04],
        KeySymbol::CtrlR => &[0x12],
        KeySymbol::CtrlZ => &[0x1a],
        KeySymbol::Esc => &[0x1b],
    }
}

/// Like [`bytes_for`], but from a key name; unknown names map to an empty sequence.
pub fn bytes_for_name(name: &str) -> &'static [u8] {
    KeySymbol::parse(name).map(bytes_for).unwrap_or_default()
}
