use serde::{Deserialize, Serialize};

use crate::types::{ColorSetting, Rgb};

pub const DEFAULT_AP_SSID: &str = "ESP32-Config";
pub const DEFAULT_AP_PASSWORD: &str = "12345678";

pub const DEFAULT_NEO_COLOR: Rgb = Rgb::new(0, 255, 0);
pub const DEFAULT_ALERT_COLOR: Rgb = Rgb::new(255, 0, 0);
pub const DEFAULT_TEMP_THRESHOLD_C: f32 = 30.0;
pub const MIN_TEMP_THRESHOLD_C: f32 = -40.0;
pub const MAX_TEMP_THRESHOLD_C: f32 = 125.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub tick_interval_ms: u64,
    pub status_interval_ms: u64,
    pub sensor_interval_ms: u64,
    pub blink_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub connect_poll_ms: u64,
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_idle_log_interval_ms: u64,
    pub light_threshold: i32,
    pub led_pin: u8,
    pub neo_pin: u8,
    pub light_led_pin: u8,
    pub light_sensor_pin: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            status_interval_ms: 5_000,
            sensor_interval_ms: 3_000,
            blink_interval_ms: 500,
            connect_timeout_ms: 10_000,
            connect_poll_ms: 100,
            ap_ssid: DEFAULT_AP_SSID.to_string(),
            ap_password: DEFAULT_AP_PASSWORD.to_string(),
            ap_idle_log_interval_ms: 30_000,
            light_threshold: 500,
            led_pin: 48,
            neo_pin: 45,
            light_led_pin: 2,
            light_sensor_pin: 1,
        }
    }
}

impl ServiceConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        self.status_interval_ms = self.status_interval_ms.max(self.tick_interval_ms);
        self.sensor_interval_ms = self.sensor_interval_ms.max(self.tick_interval_ms);
        self.blink_interval_ms = self.blink_interval_ms.max(self.tick_interval_ms);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(1_000, 60_000);
        self.connect_poll_ms = self.connect_poll_ms.clamp(10, 500);

        if self.ap_ssid.trim().is_empty() || self.ap_ssid.len() > 32 {
            self.ap_ssid = DEFAULT_AP_SSID.to_string();
        }
        // WPA2 needs 8..=63 characters.
        if !(8..=63).contains(&self.ap_password.len()) {
            self.ap_password = DEFAULT_AP_PASSWORD.to_string();
        }
    }
}

/// User settings restored from the store at boot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub neo_color: ColorSetting,
    pub alert_color: ColorSetting,
    pub temp_threshold_c: f32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            neo_color: ColorSetting::from_rgb(DEFAULT_NEO_COLOR),
            alert_color: ColorSetting::from_rgb(DEFAULT_ALERT_COLOR),
            temp_threshold_c: DEFAULT_TEMP_THRESHOLD_C,
        }
    }
}

pub fn is_valid_threshold(threshold_c: f32) -> bool {
    threshold_c.is_finite() && (MIN_TEMP_THRESHOLD_C..=MAX_TEMP_THRESHOLD_C).contains(&threshold_c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_restores_short_ap_password() {
        let mut config = ServiceConfig {
            ap_password: "short".to_string(),
            ap_ssid: "   ".to_string(),
            ..ServiceConfig::default()
        };
        config.sanitize();
        assert_eq!(config.ap_password, DEFAULT_AP_PASSWORD);
        assert_eq!(config.ap_ssid, DEFAULT_AP_SSID);
    }

    #[test]
    fn sanitize_keeps_timers_above_tick() {
        let mut config = ServiceConfig {
            tick_interval_ms: 200,
            blink_interval_ms: 50,
            connect_timeout_ms: 10,
            ..ServiceConfig::default()
        };
        config.sanitize();
        assert_eq!(config.blink_interval_ms, 200);
        assert_eq!(config.connect_timeout_ms, 1_000);
    }

    #[test]
    fn partial_config_json_uses_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"ap_ssid":"Sensorhub-Setup"}"#).unwrap();
        assert_eq!(config.ap_ssid, "Sensorhub-Setup");
        assert_eq!(config.status_interval_ms, 5_000);
    }

    #[test]
    fn threshold_bounds() {
        assert!(is_valid_threshold(25.0));
        assert!(!is_valid_threshold(f32::NAN));
        assert!(!is_valid_threshold(200.0));
    }
}
