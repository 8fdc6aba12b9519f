use std::collections::HashSet;

use log::{info, warn};
use thiserror::Error;

use crate::types::{RawAccessPoint, ScanResult, StationInfo};

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("ssid must be 1-{MAX_SSID_LEN} bytes")]
    InvalidSsid,
    #[error("password must be at most {MAX_PASSWORD_LEN} bytes")]
    InvalidPassword,
    #[error("a connection attempt is in progress")]
    Busy,
    #[error("wifi driver error: {0}")]
    Driver(String),
}

/// The radio as the service sees it. Association and scanning internals stay
/// behind this seam.
pub trait NetworkLink {
    /// Brings up the configuration access point next to whatever the station
    /// interface is doing.
    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;
    /// Starts joining a network and returns without waiting for the result.
    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;
    fn is_connected(&self) -> bool;
    /// Drops the station link; the access point is left alone.
    fn disconnect(&mut self) -> Result<(), NetworkError>;
    /// Synchronous scan. Scan buffers are released before returning.
    fn scan(&mut self) -> Result<Vec<RawAccessPoint>, NetworkError>;
    fn station_info(&self) -> StationInfo;
    fn access_point_ip(&self) -> Option<String>;
    fn access_point_clients(&self) -> usize;
}

pub fn validate_credential(ssid: &str, password: &str) -> Result<(), NetworkError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(NetworkError::InvalidSsid);
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(NetworkError::InvalidPassword);
    }
    Ok(())
}

/// Drops hidden and repeated ssids (first sighting wins) and orders by signal,
/// strongest first. Equal rssi keeps scan order.
pub fn collect_networks(raw: impl IntoIterator<Item = RawAccessPoint>) -> Vec<ScanResult> {
    let mut seen = HashSet::new();
    let mut networks: Vec<ScanResult> = raw
        .into_iter()
        .filter(|ap| !ap.ssid.is_empty())
        .filter(|ap| seen.insert(ap.ssid.clone()))
        .map(ScanResult::from_raw)
        .collect();
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    networks
}

/// One-shot scan through the link. A failed scan yields an empty list.
pub fn scan_networks<N: NetworkLink>(link: &mut N) -> Vec<ScanResult> {
    info!("scanning wifi networks");
    match link.scan() {
        Ok(raw) => {
            let found = raw.len();
            let networks = collect_networks(raw);
            info!("scan found {found} access points, {} unique", networks.len());
            networks
        }
        Err(err) => {
            warn!("wifi scan failed: {err}");
            Vec::new()
        }
    }
}
