//! Test doubles for the clock and the radio.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    clock::Clock,
    network::{NetworkError, NetworkLink},
    types::{RawAccessPoint, StationInfo},
};

pub const FAKE_AP_IP: &str = "192.168.4.1";
pub const FAKE_STATION_IP: &str = "192.168.1.42";

/// Clock that only moves when told to, or when something sleeps on it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

#[derive(Debug, Default)]
pub struct FakeLinkState {
    pub networks: Vec<RawAccessPoint>,
    pub passwords: HashMap<String, String>,
    pub join_delay_ms: u64,
    pub scan_fails: bool,
    pub ap_ssid: Option<String>,
    pub ap_starts: usize,
    pub ap_clients: usize,
    pub connect_attempts: Vec<String>,
    pub disconnects: usize,
    pending: Option<PendingJoin>,
}

#[derive(Debug, Clone)]
struct PendingJoin {
    ssid: String,
    ready_at_ms: u64,
    accepted: bool,
}

/// Radio double. Clones share state so a test can keep a handle after moving
/// the link into the service.
#[derive(Debug, Clone)]
pub struct FakeLink {
    state: Arc<Mutex<FakeLinkState>>,
    clock: ManualClock,
}

impl FakeLink {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeLinkState {
                join_delay_ms: 1_500,
                ..FakeLinkState::default()
            })),
            clock,
        }
    }

    pub fn with_network(self, ssid: &str, password: &str, rssi: i32) -> Self {
        {
            let mut state = self.state();
            state.networks.push(RawAccessPoint {
                ssid: ssid.to_string(),
                rssi,
                secured: !password.is_empty(),
            });
            state
                .passwords
                .insert(ssid.to_string(), password.to_string());
        }
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeLinkState> {
        self.state.lock().unwrap()
    }

    /// Simulates the access point going away underneath a joined station.
    pub fn drop_station(&self) {
        self.state().pending = None;
    }

    fn joined_ssid(&self) -> Option<String> {
        let state = self.state();
        let pending = state.pending.as_ref()?;
        (pending.accepted && self.clock.now_ms() >= pending.ready_at_ms)
            .then(|| pending.ssid.clone())
    }
}

impl NetworkLink for FakeLink {
    fn start_access_point(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        let mut state = self.state();
        state.ap_ssid = Some(ssid.to_string());
        state.ap_starts += 1;
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let ready_at_ms = self.clock.now_ms();
        let mut state = self.state();
        let accepted = state
            .passwords
            .get(ssid)
            .is_some_and(|expected| expected.is_empty() || expected == password);
        state.connect_attempts.push(ssid.to_string());
        state.pending = Some(PendingJoin {
            ssid: ssid.to_string(),
            ready_at_ms: ready_at_ms + state.join_delay_ms,
            accepted,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined_ssid().is_some()
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        let mut state = self.state();
        state.pending = None;
        state.disconnects += 1;
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<RawAccessPoint>, NetworkError> {
        let state = self.state();
        if state.scan_fails {
            return Err(NetworkError::Driver("scan timed out".to_string()));
        }
        Ok(state.networks.clone())
    }

    fn station_info(&self) -> StationInfo {
        let Some(ssid) = self.joined_ssid() else {
            return StationInfo::default();
        };
        let rssi = self
            .state()
            .networks
            .iter()
            .find(|network| network.ssid == ssid)
            .map(|network| network.rssi)
            .unwrap_or(0);
        StationInfo {
            ssid,
            ip: FAKE_STATION_IP.to_string(),
            rssi,
        }
    }

    fn access_point_ip(&self) -> Option<String> {
        self.state()
            .ap_ssid
            .as_ref()
            .map(|_| FAKE_AP_IP.to_string())
    }

    fn access_point_clients(&self) -> usize {
        self.state().ap_clients
    }
}
