//! Host stand-ins for the radio and the sensors.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use sensorhub_common::{
    monotonic_ms, ClimateProducer, LightProducer, NetworkError, NetworkLink, RawAccessPoint,
    StationInfo,
};

const SIM_JOIN_DELAY_MS: u64 = 1_500;
const SIM_AP_IP: &str = "192.168.4.1";
const SIM_STATION_IP: &str = "192.168.1.77";
const CLIMATE_PERIOD: Duration = Duration::from_secs(5);
const LIGHT_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct SimNetwork {
    pub ssid: String,
    pub rssi: i32,
    #[serde(default)]
    pub secured: Option<bool>,
    #[serde(default)]
    pub password: String,
}

impl SimNetwork {
    fn new(ssid: &str, rssi: i32, password: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            rssi,
            secured: None,
            password: password.to_string(),
        }
    }

    fn is_secured(&self) -> bool {
        self.secured.unwrap_or(!self.password.is_empty())
    }
}

/// The neighbourhood a fresh host build sees. Includes a repeated and a
/// hidden ssid so the scanner has something to do.
pub fn default_networks() -> Vec<SimNetwork> {
    vec![
        SimNetwork::new("Home", -52, "secret123"),
        SimNetwork::new("Office-5G", -67, "officepass"),
        SimNetwork::new("CoffeeShop", -74, ""),
        SimNetwork::new("Home", -81, "secret123"),
        SimNetwork::new("", -60, "hidden-pass"),
    ]
}

pub fn networks_from_env() -> Vec<SimNetwork> {
    let Ok(raw) = std::env::var("SENSORHUB_SIM_NETWORKS") else {
        return default_networks();
    };
    match serde_json::from_str::<Vec<SimNetwork>>(&raw) {
        Ok(networks) => networks,
        Err(err) => {
            warn!("ignoring SENSORHUB_SIM_NETWORKS: {err}");
            default_networks()
        }
    }
}

#[derive(Debug, Clone)]
struct PendingJoin {
    ssid: String,
    rssi: i32,
    ready_at_ms: u64,
    accepted: bool,
}

#[derive(Debug)]
pub struct SimulatedLink {
    networks: Vec<SimNetwork>,
    ap_ssid: Option<String>,
    join: Option<PendingJoin>,
}

impl SimulatedLink {
    pub fn new(networks: Vec<SimNetwork>) -> Self {
        Self {
            networks,
            ap_ssid: None,
            join: None,
        }
    }

    fn joined(&self) -> Option<&PendingJoin> {
        self.join
            .as_ref()
            .filter(|join| join.accepted && monotonic_ms() >= join.ready_at_ms)
    }
}

impl NetworkLink for SimulatedLink {
    fn start_access_point(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        info!("[sim] access point `{ssid}` up at {SIM_AP_IP}");
        self.ap_ssid = Some(ssid.to_string());
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let target = self
            .networks
            .iter()
            .find(|network| !network.ssid.is_empty() && network.ssid == ssid);
        let accepted = target.is_some_and(|network| {
            !network.is_secured() || network.password == password
        });
        self.join = Some(PendingJoin {
            ssid: ssid.to_string(),
            rssi: target.map(|network| network.rssi).unwrap_or(-100),
            ready_at_ms: monotonic_ms() + SIM_JOIN_DELAY_MS,
            accepted,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined().is_some()
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.join = None;
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<RawAccessPoint>, NetworkError> {
        Ok(self
            .networks
            .iter()
            .map(|network| RawAccessPoint {
                ssid: network.ssid.clone(),
                rssi: network.rssi,
                secured: network.is_secured(),
            })
            .collect())
    }

    fn station_info(&self) -> StationInfo {
        match self.joined() {
            Some(join) => StationInfo {
                ssid: join.ssid.clone(),
                ip: SIM_STATION_IP.to_string(),
                rssi: join.rssi,
            },
            None => StationInfo::default(),
        }
    }

    fn access_point_ip(&self) -> Option<String> {
        self.ap_ssid.as_ref().map(|_| SIM_AP_IP.to_string())
    }

    fn access_point_clients(&self) -> usize {
        0
    }
}

/// Slow sine waves: the temperature wanders across the default 30C alert
/// threshold and the light level across the dark threshold.
pub fn spawn_simulated_sensors(
    climate: ClimateProducer,
    light: LightProducer,
    light_threshold: i32,
) {
    tokio::spawn(async move {
        let mut climate_interval = tokio::time::interval(CLIMATE_PERIOD);
        let mut light_interval = tokio::time::interval(LIGHT_PERIOD);

        loop {
            tokio::select! {
                _ = climate_interval.tick() => {
                    let now_ms = monotonic_ms();
                    let phase = now_ms as f32 / 1000.0;
                    let temperature_c = 27.0 + 4.0 * (phase / 90.0).sin();
                    let humidity_pct = 50.0 + 10.0 * (phase / 70.0).cos();
                    climate.publish(temperature_c, humidity_pct, now_ms);
                }
                _ = light_interval.tick() => {
                    let phase = monotonic_ms() as f32 / 1000.0;
                    let level = (2048.0 + 1800.0 * (phase / 45.0).sin()) as i32;
                    light.publish(level, level < light_threshold);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sensorhub_common::collect_networks;

    #[test]
    fn scan_dedupes_through_common_scanner() {
        let mut link = SimulatedLink::new(default_networks());
        let networks = collect_networks(link.scan().unwrap());
        let ssids: Vec<&str> = networks.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(ssids, vec!["Home", "Office-5G", "CoffeeShop"]);
        assert_eq!(networks[0].rssi, -52);
        assert!(!networks[2].secured);
    }

    #[test]
    fn wrong_password_never_joins() {
        let mut link = SimulatedLink::new(default_networks());
        link.begin_connect("Home", "wrong").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!link.is_connected());
        assert_eq!(link.station_info(), StationInfo::default());
    }

    #[test]
    fn networks_parse_from_json() {
        let networks: Vec<SimNetwork> =
            serde_json::from_str(r#"[{"ssid":"Lab","rssi":-40,"password":"labpass1"}]"#).unwrap();
        assert!(networks[0].is_secured());
        assert_eq!(networks[0].rssi, -40);
    }

    #[test]
    fn access_point_ip_only_while_up() {
        let mut link = SimulatedLink::new(Vec::new());
        assert_eq!(link.access_point_ip(), None);
        link.start_access_point("ESP32-Config", "12345678").unwrap();
        assert_eq!(link.access_point_ip().as_deref(), Some(SIM_AP_IP));
    }
}
