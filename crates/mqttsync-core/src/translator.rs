//! Translation of generic UI commands into instance API parameter bags.
//!
//! Pure mapping, no state: `(command, level, color, device kind)` in,
//! parameter bag out. Unrecognized commands yield `None`; the caller
//! logs them and drops the triggering message.

/// Type tag of setpoint devices in the instance device table.
pub const TYPE_SETPOINT: u8 = 0xF2;
/// Type tag of color switches.
pub const TYPE_COLOR_SWITCH: u8 = 0xF1;
/// Switch type of dimmers.
pub const SWITCH_TYPE_DIMMER: u8 = 7;

/// Closed set of device shapes the translator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Switch,
    Dimmer,
    Setpoint,
    Color,
}

impl DeviceKind {
    /// Classify a device from its table type tags.
    pub fn classify(device_type: u8, _sub_type: u8, switch_type: u8) -> Self {
        if device_type == TYPE_SETPOINT {
            DeviceKind::Setpoint
        } else if device_type == TYPE_COLOR_SWITCH {
            DeviceKind::Color
        } else if switch_type == SWITCH_TYPE_DIMMER {
            DeviceKind::Dimmer
        } else {
            DeviceKind::Switch
        }
    }
}

/// An instance API parameter bag, rendered as a query string on dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiParams {
    pairs: Vec<(&'static str, String)>,
}

impl ApiParams {
    fn new() -> Self {
        Self {
            pairs: vec![("type", "command".to_string())],
        }
    }

    fn push(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.pairs.push((key, value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render as `?key=value&...`. The color value is percent-encoded
    /// because it carries raw JSON; everything else is API-safe text.
    pub fn query(&self) -> String {
        let mut query = String::from("?");
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                query.push('&');
            }
            query.push_str(key);
            query.push('=');
            if *key == "color" {
                query.push_str(&urlencoding::encode(value));
            } else {
                query.push_str(value);
            }
        }
        query
    }
}

/// Map a reverse command onto instance API parameters.
///
/// `Set Level` targets the setpoint API for setpoint devices and the
/// dimmer level API for everything else; plain switch commands carry the
/// raw command name through.
pub fn translate(
    command: &str,
    level: i32,
    color: &str,
    idx: &str,
    kind: DeviceKind,
) -> Option<ApiParams> {
    match command {
        "On" | "Off" | "Toggle" | "Stop" | "Open" | "Close" => Some(
            ApiParams::new()
                .push("param", "switchlight")
                .push("idx", idx)
                .push("switchcmd", command),
        ),
        "Set Level" => Some(match kind {
            DeviceKind::Setpoint => ApiParams::new()
                .push("param", "setsetpoint")
                .push("idx", idx)
                .push("setpoint", level.to_string()),
            _ => ApiParams::new()
                .push("param", "switchlight")
                .push("idx", idx)
                .push("switchcmd", "Set%20Level")
                .push("level", level.to_string()),
        }),
        "Set Color" => Some(
            ApiParams::new()
                .push("param", "setcolbrightnessvalue")
                .push("idx", idx)
                .push("color", color)
                .push("brightness", level.to_string()),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_switch_commands_carry_their_name() {
        for command in ["On", "Off", "Toggle", "Stop", "Open", "Close"] {
            let params = translate(command, 0, "", "12", DeviceKind::Switch).unwrap();
            assert_eq!(params.get("param"), Some("switchlight"));
            assert_eq!(params.get("switchcmd"), Some(command));
            assert_eq!(params.get("idx"), Some("12"));
        }
    }

    #[test]
    fn set_level_on_setpoint_uses_setsetpoint() {
        let params = translate("Set Level", 40, "", "12", DeviceKind::Setpoint).unwrap();
        assert_eq!(params.get("param"), Some("setsetpoint"));
        assert_eq!(params.get("setpoint"), Some("40"));
        assert_eq!(
            params.query(),
            "?type=command&param=setsetpoint&idx=12&setpoint=40"
        );
    }

    #[test]
    fn set_level_on_dimmer_uses_switchlight() {
        let params = translate("Set Level", 40, "", "12", DeviceKind::Dimmer).unwrap();
        assert_eq!(params.get("param"), Some("switchlight"));
        assert_eq!(params.get("switchcmd"), Some("Set%20Level"));
        assert_eq!(params.get("level"), Some("40"));
        assert_eq!(
            params.query(),
            "?type=command&param=switchlight&idx=12&switchcmd=Set%20Level&level=40"
        );
    }

    #[test]
    fn set_color_combines_color_and_brightness() {
        let color = r#"{"b":255,"g":12}"#;
        let params = translate("Set Color", 80, color, "7", DeviceKind::Color).unwrap();
        assert_eq!(params.get("param"), Some("setcolbrightnessvalue"));
        assert_eq!(params.get("color"), Some(color));
        assert_eq!(params.get("brightness"), Some("80"));
        // Raw JSON is percent-encoded in the rendered query.
        assert!(params.query().contains("color=%7B%22b%22%3A255"));
    }

    #[test]
    fn unknown_command_yields_none() {
        assert!(translate("Dim By", 10, "", "12", DeviceKind::Switch).is_none());
    }

    #[test]
    fn kind_classification() {
        assert_eq!(DeviceKind::classify(0xF2, 0, 0), DeviceKind::Setpoint);
        assert_eq!(DeviceKind::classify(0xF1, 0, 0), DeviceKind::Color);
        assert_eq!(DeviceKind::classify(244, 73, 7), DeviceKind::Dimmer);
        assert_eq!(DeviceKind::classify(244, 73, 0), DeviceKind::Switch);
    }
}
