//! Realtime channel frames and the JSON views shared with the HTTP endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Rgb, ScanResult};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no `action` string")]
    MissingAction,
    #[error("bad fields for `{action}`: {source}")]
    InvalidFields {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Inbound `{ "action": ... }` commands. Actions this firmware does not know
/// land in `Unknown` and are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Scan,
    Connect {
        ssid: String,
        #[serde(default)]
        password: String,
    },
    Disconnect,
    ClearCredentials,
    GetStatus,
    GetSensors,
    GetLeds,
    GetLight,
    ControlLed {
        state: bool,
    },
    ControlNeo {
        state: bool,
    },
    PreviewNeoColor {
        r: u8,
        g: u8,
        b: u8,
    },
    SaveNeoColor {
        r: u8,
        g: u8,
        b: u8,
        #[serde(default)]
        hex: Option<String>,
    },
    SaveAlertColor {
        r: u8,
        g: u8,
        b: u8,
        #[serde(default)]
        hex: Option<String>,
    },
    SaveTempThreshold {
        threshold: f32,
    },
    GetAlertSettings,
    #[serde(other)]
    Unknown,
}

pub fn parse_command(raw: &str) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingAction)?
        .to_string();
    Command::deserialize(value).map_err(|source| ProtocolError::InvalidFields { action, source })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworksView {
    pub networks: Vec<ScanResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub connected: bool,
    pub ssid: String,
    pub ip: String,
    pub rssi: i32,
    pub config_mode: bool,
    pub config_ssid: String,
    pub config_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorsView {
    pub temperature: f32,
    pub humidity: f32,
    pub light_level: i32,
    pub led_state: bool,
    pub temp_alert: bool,
    pub temp_threshold: f32,
    pub timestamp: u64,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedsView {
    pub led_state: bool,
    pub neo_state: bool,
    pub neo_r: u8,
    pub neo_g: u8,
    pub neo_b: u8,
    pub neo_hex: String,
    pub saved_hex: String,
    pub light_led_state: bool,
    pub led_pin: u8,
    pub neo_pin: u8,
    pub light_led_pin: u8,
    pub temp_alert: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightView {
    pub light_level: i32,
    pub led_state: bool,
    pub threshold: i32,
    pub sensor_pin: u8,
    pub led_pin: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertView {
    pub alert_r: u8,
    pub alert_g: u8,
    pub alert_b: u8,
    pub alert_hex: String,
    pub temp_threshold: f32,
    pub current_temp: f32,
    pub temp_alert: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorAck {
    pub success: bool,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub hex: String,
}

impl ColorAck {
    pub fn saved(rgb: Rgb, hex: &str) -> Self {
        Self {
            success: true,
            r: rgb.r,
            g: rgb.g,
            b: rgb.b,
            hex: hex.to_string(),
        }
    }
}

/// Frames pushed to every attached client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Status(StatusView),
    Networks { list: Vec<ScanResult> },
    ConnectResult { success: bool, message: String },
    CredentialsCleared { success: bool },
    Sensors(SensorsView),
    Leds(LedsView),
    Light(LightView),
    AlertSettings(AlertView),
    NeoColorSaved(ColorAck),
    AlertColorSaved(ColorAck),
    TempThresholdSaved { success: bool, threshold: f32 },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Networks { .. } => "networks",
            Self::ConnectResult { .. } => "connect_result",
            Self::CredentialsCleared { .. } => "credentials_cleared",
            Self::Sensors(_) => "sensors",
            Self::Leds(_) => "leds",
            Self::Light(_) => "light",
            Self::AlertSettings(_) => "alert_settings",
            Self::NeoColorSaved(_) => "neo_color_saved",
            Self::AlertColorSaved(_) => "alert_color_saved",
            Self::TempThresholdSaved { .. } => "temp_threshold_saved",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Read-only HTTP endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Scan,
    Status,
    Sensors,
    Leds,
    Light,
    Alert,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Scan,
        Page::Status,
        Page::Sensors,
        Page::Leds,
        Page::Light,
        Page::Alert,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Scan => "/scan",
            Self::Status => "/status",
            Self::Sensors => "/sensors",
            Self::Leds => "/leds",
            Self::Light => "/light",
            Self::Alert => "/alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum View {
    Networks(NetworksView),
    Status(StatusView),
    Sensors(SensorsView),
    Leds(LedsView),
    Light(LightView),
    Alert(AlertView),
}

impl View {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_catalogue() {
        assert_eq!(parse_command(r#"{"action":"scan"}"#).unwrap(), Command::Scan);
        assert_eq!(
            parse_command(r#"{"action":"connect","ssid":"Home","password":"secret123"}"#).unwrap(),
            Command::Connect {
                ssid: "Home".into(),
                password: "secret123".into()
            }
        );
        assert_eq!(
            parse_command(r##"{"action":"save_neo_color","r":1,"g":2,"b":3,"hex":"#010203"}"##)
                .unwrap(),
            Command::SaveNeoColor {
                r: 1,
                g: 2,
                b: 3,
                hex: Some("#010203".into())
            }
        );
        assert_eq!(
            parse_command(r#"{"action":"save_temp_threshold","threshold":25.5}"#).unwrap(),
            Command::SaveTempThreshold { threshold: 25.5 }
        );
        assert_eq!(
            parse_command(r#"{"action":"control_neo","state":true,"extra":1}"#).unwrap(),
            Command::ControlNeo { state: true }
        );
    }

    #[test]
    fn unknown_action_is_not_an_error() {
        assert_eq!(
            parse_command(r#"{"action":"reboot_now","force":true}"#).unwrap(),
            Command::Unknown
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            parse_command("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_command(r#"{"ssid":"Home"}"#),
            Err(ProtocolError::MissingAction)
        ));
        assert!(matches!(
            parse_command(r#"{"action":7}"#),
            Err(ProtocolError::MissingAction)
        ));
        assert!(matches!(
            parse_command(r#"{"action":"control_led","state":"yes"}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
        assert!(matches!(
            parse_command(r#"{"action":"preview_neo_color","r":300,"g":0,"b":0}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
    }

    #[test]
    fn outbound_frames_carry_type_tag() {
        let frame = Outbound::Networks {
            list: vec![ScanResult {
                ssid: "Home".into(),
                rssi: -60,
                secured: true,
                strength: 80,
            }],
        };
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "networks",
                "list": [{"ssid": "Home", "rssi": -60, "secured": true, "strength": 80}]
            })
        );

        let ack = Outbound::AlertColorSaved(ColorAck::saved(Rgb::new(255, 0, 0), "#ff0000"));
        let value: Value = serde_json::from_str(&ack.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "alert_color_saved");
        assert_eq!(value["r"], 255);
        assert_eq!(ack.kind(), "alert_color_saved");
    }

    #[test]
    fn views_serialize_flat() {
        let view = View::Status(StatusView {
            connected: false,
            ssid: String::new(),
            ip: String::new(),
            rssi: 0,
            config_mode: true,
            config_ssid: "ESP32-Config".into(),
            config_ip: "192.168.4.1".into(),
        });
        let value: Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        assert_eq!(value["config_mode"], true);
        assert!(value.get("type").is_none());
    }
}
