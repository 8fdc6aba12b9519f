use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
        Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// A colour as the user picked it: the channels plus the hex string the UI sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSetting {
    pub rgb: Rgb,
    pub hex: String,
}

impl ColorSetting {
    /// Keeps the supplied hex when it is well formed, otherwise derives it from the channels.
    pub fn new(rgb: Rgb, hex: Option<&str>) -> Self {
        let hex = hex
            .filter(|candidate| Rgb::from_hex(candidate).is_some())
            .map(|candidate| candidate.to_ascii_lowercase())
            .unwrap_or_else(|| rgb.to_hex());
        Self { rgb, hex }
    }

    pub fn from_rgb(rgb: Rgb) -> Self {
        Self {
            rgb,
            hex: rgb.to_hex(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    pub ssid: String,
    pub password: String,
}

impl NetworkCredential {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// One access point as reported by the radio, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccessPoint {
    pub ssid: String,
    pub rssi: i32,
    pub secured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ssid: String,
    pub rssi: i32,
    pub secured: bool,
    pub strength: i32,
}

impl ScanResult {
    pub fn from_raw(raw: RawAccessPoint) -> Self {
        Self {
            strength: signal_strength(raw.rssi),
            ssid: raw.ssid,
            rssi: raw.rssi,
            secured: raw.secured,
        }
    }
}

pub fn signal_strength(rssi: i32) -> i32 {
    (rssi + 100) * 2
}

/// What the station interface currently reports; empty strings when not joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationInfo {
    pub ssid: String,
    pub ip: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub ssid: String,
    pub ip: String,
    pub rssi: i32,
    pub ap_mode: bool,
    pub ap_ssid: String,
    pub ap_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedState {
    pub digital_on: bool,
    pub neo_on: bool,
    pub neo_color: Rgb,
    pub saved_color: Rgb,
}

impl LedState {
    pub fn with_saved_color(saved_color: Rgb) -> Self {
        Self {
            digital_on: false,
            neo_on: false,
            neo_color: saved_color,
            saved_color,
        }
    }

    /// Colour the indicator shows when no alert owns it.
    pub fn resting_color(&self) -> Rgb {
        if self.neo_on {
            self.neo_color
        } else {
            Rgb::OFF
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub light_level: i32,
    pub light_led_on: bool,
    pub valid: bool,
    pub timestamp_ms: u64,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            temperature_c: 0.0,
            humidity_pct: 0.0,
            light_level: 0,
            light_led_on: false,
            valid: false,
            timestamp_ms: 0,
        }
    }
}

impl SensorSnapshot {
    /// Temperature usable for alerting, if the last climate reading was good.
    pub fn usable_temperature(&self) -> Option<f32> {
        (self.valid && self.temperature_c.is_finite()).then_some(self.temperature_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hex_formatting_is_lowercase_and_padded() {
        assert_eq!(Rgb::new(255, 0, 10).to_hex(), "#ff000a");
        assert_eq!(Rgb::from_hex("#FF000A"), Some(Rgb::new(255, 0, 10)));
        assert_eq!(Rgb::from_hex("00ff00"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("#gg0000"), None);
    }

    #[test]
    fn color_setting_falls_back_to_derived_hex() {
        let rgb = Rgb::new(1, 2, 3);
        assert_eq!(ColorSetting::new(rgb, Some("nonsense")).hex, "#010203");
        assert_eq!(ColorSetting::new(rgb, Some("#ABCDEF")).hex, "#abcdef");
        assert_eq!(ColorSetting::new(rgb, None).hex, "#010203");
    }

    #[test]
    fn strength_is_derived_from_rssi() {
        let result = ScanResult::from_raw(RawAccessPoint {
            ssid: "Home".into(),
            rssi: -60,
            secured: true,
        });
        assert_eq!(result.strength, 80);
    }

    #[test]
    fn invalid_snapshot_has_no_usable_temperature() {
        let mut snapshot = SensorSnapshot {
            temperature_c: 31.0,
            valid: false,
            ..SensorSnapshot::default()
        };
        assert_eq!(snapshot.usable_temperature(), None);
        snapshot.valid = true;
        assert_eq!(snapshot.usable_temperature(), Some(31.0));
        snapshot.temperature_c = f32::NAN;
        assert_eq!(snapshot.usable_temperature(), None);
    }
}
