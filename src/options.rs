//! Backend-owned terminal configuration and how it maps onto the widget.

use crate::fit::LayoutMode;
use crate::widget::WidgetHandle;
use serde_json::{Map, Value};

/// Only configuration schema this controller understands.
pub const SUPPORTED_CONFIG_VERSION: i64 = 1;

/// Lenient view over the backend's versioned config object.
///
/// Every field is parsed independently; a malformed field is dropped without
/// affecting the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteConfig {
    pub version: Option<i64>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub use_dpad: bool,
    pub disable_virtual_keyboard: bool,
    pub handheld_mode: bool,
    pub extra_keys: bool,
}

impl RemoteConfig {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            tracing::warn!("Backend config is not an object; ignoring");
            return Self::default();
        };
        Self {
            version: map.get("__version__").and_then(Value::as_i64),
            font_family: map
                .get("font_family")
                .and_then(Value::as_str)
                .filter(|family| !family.trim().is_empty())
                .map(str::to_string),
            font_size: map.get("font_size").and_then(parse_font_size),
            use_dpad: flag(map, "use_dpad"),
            disable_virtual_keyboard: flag(map, "disable_virtual_keyboard"),
            handheld_mode: flag(map, "handheld_mode"),
            extra_keys: flag(map, "extra_keys"),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.version == Some(SUPPORTED_CONFIG_VERSION)
    }
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Font sizes arrive as numbers or as strings like `"16"` / `"16px"`; only the
/// leading integer part counts and it must be positive.
fn parse_font_size(value: &Value) -> Option<f64> {
    let size = match value {
        Value::Number(number) => number.as_f64().map(f64::trunc)?,
        Value::String(text) => {
            let trimmed = text.trim_start();
            let digits_end = trimmed
                .char_indices()
                .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
                .map(|(i, _)| i)
                .unwrap_or(trimmed.len());
            trimmed[..digits_end].parse::<i64>().ok()? as f64
        }
        _ => return None,
    };
    (size > 0.0).then_some(size)
}

/// Behaviour switches derived from the applied config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalOptions {
    pub use_dpad: bool,
    pub disable_virtual_keyboard: bool,
    pub handheld_mode: bool,
    pub extra_keys: bool,
}

impl TerminalOptions {
    /// Whether an auxiliary on-screen control row is shown under the terminal.
    pub fn aux_controls(&self) -> bool {
        self.extra_keys || self.handheld_mode
    }

    pub fn layout(&self, fullscreen: bool) -> LayoutMode {
        LayoutMode {
            fullscreen,
            aux_controls: self.aux_controls(),
        }
    }
}

pub struct ConfigAdapter;

impl ConfigAdapter {
    /// Applies font settings to the widget and returns the remaining switches.
    ///
    /// An unsupported `__version__` leaves the widget untouched and yields the
    /// default options.
    pub fn apply(widget: &WidgetHandle, config: &RemoteConfig) -> TerminalOptions {
        if !config.is_supported() {
            tracing::warn!(
                version = ?config.version,
                "Unsupported backend config version; keeping widget defaults"
            );
            return TerminalOptions::default();
        }
        widget.with(|w| {
            if let Some(family) = &config.font_family {
                w.set_font_family(family);
            }
            if let Some(size) = config.font_size {
                w.set_font_size(size);
            }
        });
        TerminalOptions {
            use_dpad: config.use_dpad,
            disable_virtual_keyboard: config.disable_virtual_keyboard,
            handheld_mode: config.handheld_mode,
            extra_keys: config.extra_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_supported_config() {
        let config = RemoteConfig::from_value(&json!({
            "__version__": 1,
            "font_family": "Fira Code",
            "font_size": 18,
            "use_dpad": true,
            "disable_virtual_keyboard": true,
            "extra_keys": false
        }));
        assert!(config.is_supported());
        assert_eq!(config.font_family.as_deref(), Some("Fira Code"));
        assert_eq!(config.font_size, Some(18.0));
        assert!(config.use_dpad);
        assert!(config.disable_virtual_keyboard);
        assert!(!config.extra_keys);
        assert!(!config.handheld_mode);
    }

    #[test]
    fn blank_family_and_bad_sizes_are_ignored() {
        for size in [json!("abc"), json!(0), json!(-4), json!("-2"), json!(null), json!([16])] {
            let config = RemoteConfig::from_value(&json!({
                "__version__": 1,
                "font_family": "   ",
                "font_size": size,
            }));
            assert_eq!(config.font_family, None);
            assert_eq!(config.font_size, None, "size {size}");
        }
    }

    #[test]
    fn string_font_sizes_use_leading_integer() {
        for (raw, expected) in [("16", 16.0), (" 20px", 20.0), ("12.7", 12.0)] {
            let config = RemoteConfig::from_value(&json!({ "__version__": 1, "font_size": raw }));
            assert_eq!(config.font_size, Some(expected), "raw {raw}");
        }
        let config = RemoteConfig::from_value(&json!({ "__version__": 1, "font_size": 14.9 }));
        assert_eq!(config.font_size, Some(14.0));
    }

    #[test]
    fn non_bool_flags_are_false() {
        let config = RemoteConfig::from_value(&json!({
            "__version__": 1,
            "use_dpad": "yes",
            "extra_keys": 1,
        }));
        assert!(!config.use_dpad);
        assert!(!config.extra_keys);
    }

    #[test]
    fn unknown_version_is_unsupported() {
        assert!(!RemoteConfig::from_value(&json!({ "__version__": 2 })).is_supported());
        assert!(!RemoteConfig::from_value(&json!({})).is_supported());
        assert!(!RemoteConfig::from_value(&json!("nope")).is_supported());
    }

    #[test]
    fn aux_controls_follow_extra_keys_or_handheld() {
        let options = TerminalOptions {
            handheld_mode: true,
            ..TerminalOptions::default()
        };
        assert!(options.layout(false).aux_controls);
        assert!(!TerminalOptions::default().layout(true).aux_controls);
    }
}
