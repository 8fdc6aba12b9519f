//! Shared sensor snapshot.
//!
//! Each producer owns a distinct group of fields and every field is its own
//! atomic, so a reader can never observe a torn scalar. Producers are not
//! `Clone`, which keeps each field group single-writer.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use crate::types::SensorSnapshot;

#[derive(Debug, Default)]
struct SnapshotCells {
    temperature_bits: AtomicU32,
    humidity_bits: AtomicU32,
    climate_valid: AtomicBool,
    climate_timestamp_ms: AtomicU64,
    light_level: AtomicI32,
    light_led_on: AtomicBool,
}

/// Writer for temperature and humidity (the DHT task).
#[derive(Debug)]
pub struct ClimateProducer {
    cells: Arc<SnapshotCells>,
}

/// Writer for the ambient light level and the LED it drives.
#[derive(Debug)]
pub struct LightProducer {
    cells: Arc<SnapshotCells>,
}

#[derive(Debug, Clone)]
pub struct SensorReader {
    cells: Arc<SnapshotCells>,
}

pub fn sensor_feed() -> (ClimateProducer, LightProducer, SensorReader) {
    let cells = Arc::new(SnapshotCells::default());
    (
        ClimateProducer {
            cells: cells.clone(),
        },
        LightProducer {
            cells: cells.clone(),
        },
        SensorReader { cells },
    )
}

impl ClimateProducer {
    /// Records a reading; NaN in either value marks the snapshot invalid.
    pub fn publish(&self, temperature_c: f32, humidity_pct: f32, now_ms: u64) {
        let valid = temperature_c.is_finite() && humidity_pct.is_finite();
        self.cells
            .temperature_bits
            .store(temperature_c.to_bits(), Ordering::Relaxed);
        self.cells
            .humidity_bits
            .store(humidity_pct.to_bits(), Ordering::Relaxed);
        self.cells
            .climate_timestamp_ms
            .store(now_ms, Ordering::Relaxed);
        self.cells.climate_valid.store(valid, Ordering::Release);
    }

    pub fn publish_failure(&self, now_ms: u64) {
        self.cells
            .climate_timestamp_ms
            .store(now_ms, Ordering::Relaxed);
        self.cells.climate_valid.store(false, Ordering::Release);
    }
}

impl LightProducer {
    pub fn publish(&self, light_level: i32, led_on: bool) {
        self.cells.light_level.store(light_level, Ordering::Relaxed);
        self.cells.light_led_on.store(led_on, Ordering::Relaxed);
    }
}

impl SensorReader {
    pub fn snapshot(&self) -> SensorSnapshot {
        let valid = self.cells.climate_valid.load(Ordering::Acquire);
        SensorSnapshot {
            temperature_c: f32::from_bits(self.cells.temperature_bits.load(Ordering::Relaxed)),
            humidity_pct: f32::from_bits(self.cells.humidity_bits.load(Ordering::Relaxed)),
            light_level: self.cells.light_level.load(Ordering::Relaxed),
            light_led_on: self.cells.light_led_on.load(Ordering::Relaxed),
            valid,
            timestamp_ms: self.cells.climate_timestamp_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_until_first_reading() {
        let (climate, light, reader) = sensor_feed();
        assert!(!reader.snapshot().valid);

        light.publish(812, false);
        assert!(!reader.snapshot().valid);
        assert_eq!(reader.snapshot().light_level, 812);

        climate.publish(24.5, 51.0, 1_000);
        let snapshot = reader.snapshot();
        assert!(snapshot.valid);
        assert_eq!(snapshot.temperature_c, 24.5);
        assert_eq!(snapshot.humidity_pct, 51.0);
        assert_eq!(snapshot.timestamp_ms, 1_000);
    }

    #[test]
    fn nan_or_failure_invalidates() {
        let (climate, _light, reader) = sensor_feed();
        climate.publish(24.5, f32::NAN, 10);
        assert!(!reader.snapshot().valid);

        climate.publish(24.5, 40.0, 20);
        assert!(reader.snapshot().valid);
        climate.publish_failure(30);
        assert!(!reader.snapshot().valid);
        assert_eq!(reader.snapshot().temperature_c, 24.5);
    }

    #[test]
    fn readers_share_one_snapshot() {
        let (climate, _light, reader) = sensor_feed();
        let other = reader.clone();
        let writer = std::thread::spawn(move || climate.publish(30.5, 60.0, 5));
        writer.join().unwrap();
        assert_eq!(other.snapshot().temperature_c, 30.5);
    }
}
