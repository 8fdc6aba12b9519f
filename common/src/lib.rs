pub mod alert;
pub mod clock;
pub mod config;
pub mod network;
pub mod protocol;
pub mod provisioning;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use alert::{AlertController, AlertTransition};
pub use clock::{monotonic_ms, Clock, SystemClock};
pub use config::{DeviceSettings, ServiceConfig};
pub use network::{collect_networks, scan_networks, NetworkError, NetworkLink};
pub use protocol::{parse_command, Command, Outbound, Page, ProtocolError, View};
pub use provisioning::{ConnectOutcome, Provisioner, ProvisioningState};
pub use service::{DeviceService, Effect, ServiceError};
pub use snapshot::{sensor_feed, ClimateProducer, LightProducer, SensorReader};
pub use store::{FileStore, KvStore, MemoryStore, SettingsStore, StoreError};
pub use telemetry::{TelemetryDue, TelemetryPublisher};
pub use types::*;
