use crate::config::ServiceConfig;

/// Which periodic frames are due this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryDue {
    pub status: bool,
    pub sensors: bool,
}

impl TelemetryDue {
    pub fn any(self) -> bool {
        self.status || self.sensors
    }
}

/// Status and sensor/LED push timers. Firings with nobody listening are
/// dropped, never queued.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    status_interval_ms: u64,
    sensor_interval_ms: u64,
    last_status_ms: u64,
    last_sensor_ms: u64,
}

impl TelemetryPublisher {
    pub fn new(config: &ServiceConfig, now_ms: u64) -> Self {
        Self {
            status_interval_ms: config.status_interval_ms,
            sensor_interval_ms: config.sensor_interval_ms,
            last_status_ms: now_ms,
            last_sensor_ms: now_ms,
        }
    }

    pub fn poll(&mut self, now_ms: u64, clients: usize) -> TelemetryDue {
        let status = Self::fire(&mut self.last_status_ms, self.status_interval_ms, now_ms);
        let sensors = Self::fire(&mut self.last_sensor_ms, self.sensor_interval_ms, now_ms);
        if clients == 0 {
            return TelemetryDue::default();
        }
        TelemetryDue { status, sensors }
    }

    fn fire(last_ms: &mut u64, interval_ms: u64, now_ms: u64) -> bool {
        if now_ms.saturating_sub(*last_ms) >= interval_ms {
            *last_ms = now_ms;
            true
        } else {
            false
        }
    }
}
