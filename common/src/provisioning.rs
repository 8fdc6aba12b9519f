use log::{info, warn};

use crate::{
    clock::Clock,
    config::ServiceConfig,
    network::{validate_credential, NetworkError, NetworkLink},
    types::{ConnectionStatus, NetworkCredential},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Unprovisioned,
    Connecting,
    StationConnected,
    ConnectFailed,
}

impl ProvisioningState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "UNPROVISIONED",
            Self::Connecting => "CONNECTING",
            Self::StationConnected => "STATION_CONNECTED",
            Self::ConnectFailed => "CONNECT_FAILED",
        }
    }
}

#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    TimedOut,
    Failed(NetworkError),
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn message(&self) -> String {
        match self {
            Self::Connected => "Connected successfully".to_string(),
            Self::TimedOut => "Connection failed".to_string(),
            Self::Failed(err) => format!("Connection failed: {err}"),
        }
    }
}

/// WiFi mode transitions. The configuration access point, once up, is only
/// ever brought down by a reboot.
#[derive(Debug, Clone)]
pub struct Provisioner {
    state: ProvisioningState,
    ap_active: bool,
    ap_ssid: String,
    ap_password: String,
    connect_timeout_ms: u64,
    connect_poll_ms: u64,
    ap_idle_log_interval_ms: u64,
    last_idle_log_ms: Option<u64>,
}

impl Provisioner {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            state: ProvisioningState::Unprovisioned,
            ap_active: false,
            ap_ssid: config.ap_ssid.clone(),
            ap_password: config.ap_password.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
            connect_poll_ms: config.connect_poll_ms,
            ap_idle_log_interval_ms: config.ap_idle_log_interval_ms,
            last_idle_log_ms: None,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn is_ap_active(&self) -> bool {
        self.ap_active
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms
    }

    /// Boot path: join the stored network if there is one, otherwise open the
    /// configuration access point.
    pub fn start<N: NetworkLink, C: Clock>(
        &mut self,
        link: &mut N,
        clock: &C,
        credential: Option<&NetworkCredential>,
    ) -> Result<(), NetworkError> {
        match credential {
            Some(credential) => {
                info!("stored credentials found for `{}`", credential.ssid);
                let outcome = self.attempt_connect(link, clock, credential, self.connect_timeout_ms);
                if !outcome.is_connected() {
                    warn!("failed to connect with saved credentials, configuration mode active");
                }
                Ok(())
            }
            None => {
                info!("no stored credentials; entering configuration mode");
                self.enter_unprovisioned(link)
            }
        }
    }

    /// Joins `credential`, polling the link every `connect_poll_ms` until it
    /// reports connected or `timeout_ms` elapses. The access point is left up
    /// during the attempt.
    pub fn attempt_connect<N: NetworkLink, C: Clock>(
        &mut self,
        link: &mut N,
        clock: &C,
        credential: &NetworkCredential,
        timeout_ms: u64,
    ) -> ConnectOutcome {
        if let Err(err) = validate_credential(&credential.ssid, &credential.password) {
            warn!("refusing to connect: {err}");
            return self.fail_attempt(link, ConnectOutcome::Failed(err));
        }

        info!("connecting to wifi `{}`", credential.ssid);
        self.state = ProvisioningState::Connecting;

        if let Err(err) = link.begin_connect(&credential.ssid, &credential.password) {
            warn!("wifi connect could not start: {err}");
            return self.fail_attempt(link, ConnectOutcome::Failed(err));
        }

        let started_ms = clock.now_ms();
        while !link.is_connected() {
            if clock.now_ms().saturating_sub(started_ms) >= timeout_ms {
                warn!(
                    "wifi connect to `{}` timed out after {timeout_ms}ms",
                    credential.ssid
                );
                if let Err(err) = link.disconnect() {
                    warn!("failed to abandon station attempt: {err}");
                }
                return self.fail_attempt(link, ConnectOutcome::TimedOut);
            }
            clock.sleep_ms(self.connect_poll_ms);
        }

        let station = link.station_info();
        info!("connected to `{}`, ip {}", credential.ssid, station.ip);
        if self.ap_active {
            info!("configuration access point `{}` stays reachable", self.ap_ssid);
        }
        self.state = ProvisioningState::StationConnected;
        ConnectOutcome::Connected
    }

    pub fn disconnect<N: NetworkLink>(&mut self, link: &mut N) -> Result<(), NetworkError> {
        if self.state == ProvisioningState::Connecting {
            return Err(NetworkError::Busy);
        }
        link.disconnect()?;
        info!("wifi station disconnected");
        // Unprovisioned means the AP is up, so the caller's next status reports config mode.
        self.enter_unprovisioned(link)
    }

    /// Per-tick upkeep: notices a dropped station link, keeps the access point
    /// up while unprovisioned, and nags about an idle access point.
    pub fn housekeeping<N: NetworkLink>(&mut self, link: &mut N, now_ms: u64) {
        if self.state == ProvisioningState::StationConnected && !link.is_connected() {
            warn!("wifi station link lost");
            self.state = ProvisioningState::Unprovisioned;
        }

        if self.state == ProvisioningState::Unprovisioned && !self.ap_active {
            if let Err(err) = self.enable_access_point(link) {
                warn!("failed to restore configuration access point: {err}");
            }
        }

        if self.ap_active && link.access_point_clients() == 0 {
            let due = self
                .last_idle_log_ms
                .map(|last| now_ms.saturating_sub(last) >= self.ap_idle_log_interval_ms)
                .unwrap_or(true);
            if due {
                info!("no clients connected to config AP `{}`", self.ap_ssid);
                self.last_idle_log_ms = Some(now_ms);
            }
        }
    }

    pub fn status<N: NetworkLink>(&self, link: &N) -> ConnectionStatus {
        let connected = link.is_connected();
        let station = if connected {
            link.station_info()
        } else {
            Default::default()
        };
        ConnectionStatus {
            connected,
            ssid: station.ssid,
            ip: station.ip,
            rssi: station.rssi,
            ap_mode: self.ap_active,
            ap_ssid: if self.ap_active {
                self.ap_ssid.clone()
            } else {
                String::new()
            },
            ap_ip: if self.ap_active {
                link.access_point_ip()
            } else {
                None
            },
        }
    }

    fn fail_attempt<N: NetworkLink>(&mut self, link: &mut N, outcome: ConnectOutcome) -> ConnectOutcome {
        self.state = ProvisioningState::ConnectFailed;
        if let Err(err) = self.enter_unprovisioned(link) {
            warn!("failed to start configuration access point: {err}");
        }
        outcome
    }

    fn enter_unprovisioned<N: NetworkLink>(&mut self, link: &mut N) -> Result<(), NetworkError> {
        self.state = ProvisioningState::Unprovisioned;
        if self.ap_active {
            return Ok(());
        }
        self.enable_access_point(link)
    }

    fn enable_access_point<N: NetworkLink>(&mut self, link: &mut N) -> Result<(), NetworkError> {
        link.start_access_point(&self.ap_ssid, &self.ap_password)?;
        self.ap_active = true;
        self.last_idle_log_ms = None;
        info!(
            "configuration access point `{}` started at {}",
            self.ap_ssid,
            link.access_point_ip().unwrap_or_else(|| "unknown".to_string())
        );
        Ok(())
    }
}
