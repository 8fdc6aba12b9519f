//! Persistent key-value settings.
//!
//! Backends implement [`KvStore`]; [`SettingsStore`] layers the flat key
//! catalogue and typed records on top. Writes are flushed before they return.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{ErrorKind, Write},
    path::PathBuf,
};

use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{is_valid_threshold, DeviceSettings},
    types::{ColorSetting, NetworkCredential, Rgb},
};

pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_NEO_R: &str = "neo_r";
pub const KEY_NEO_G: &str = "neo_g";
pub const KEY_NEO_B: &str = "neo_b";
pub const KEY_NEO_HEX: &str = "neo_hex";
pub const KEY_ALERT_R: &str = "alert_r";
pub const KEY_ALERT_G: &str = "alert_g";
pub const KEY_ALERT_B: &str = "alert_b";
pub const KEY_ALERT_HEX: &str = "alert_hex";
pub const KEY_TEMP_THRESHOLD: &str = "temp_threshold";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write `{key}`: {reason}")]
    Write { key: String, reason: String },
    #[error("settings file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Flat namespaced key-value storage. Reads never fail: a missing or
/// unreadable key is `None`.
pub trait KvStore {
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn get_float(&self, key: &str) -> Option<f32>;
    fn put_float(&mut self, key: &str, value: f32) -> Result<(), StoreError>;
    fn get_byte(&self, key: &str) -> Option<u8>;
    fn put_byte(&mut self, key: &str, value: u8) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    /// Writes several strings in order. Backends that can commit once override this.
    fn put_strings(&mut self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.put_string(key, value)?;
        }
        Ok(())
    }

    /// Removes keys in order. Backends that can flush once override this.
    fn remove_all(&mut self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum MemoryValue {
    Text(String),
    Float(f32),
    Byte(u8),
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, MemoryValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl KvStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some(MemoryValue::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .insert(key.to_string(), MemoryValue::Text(value.to_string()));
        Ok(())
    }

    fn get_float(&self, key: &str) -> Option<f32> {
        match self.values.get(key) {
            Some(MemoryValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    fn put_float(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.values
            .insert(key.to_string(), MemoryValue::Float(value));
        Ok(())
    }

    fn get_byte(&self, key: &str) -> Option<u8> {
        match self.values.get(key) {
            Some(MemoryValue::Byte(value)) => Some(*value),
            _ => None,
        }
    }

    fn put_byte(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), MemoryValue::Byte(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Whole-namespace JSON document on disk. Every write rewrites a temp file,
/// syncs it and renames it over the original.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!("cannot create {}: {err}", parent.display()))
            })?;
        }

        let values = match fs::read(&path) {
            Ok(raw) if raw.is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| {
                StoreError::Unavailable(format!("{} is corrupt: {err}", path.display()))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };

        info!("settings store opened at {} ({} keys)", path.display(), values.len());
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(&self.values)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn put_value(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let previous = self.values.insert(key.to_string(), value);
        if let Err(err) = self.flush() {
            match previous {
                Some(previous) => self.values.insert(key.to_string(), previous),
                None => self.values.remove(key),
            };
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key)?.as_str().map(str::to_string)
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put_value(key, Value::String(value.to_string()))
    }

    fn get_float(&self, key: &str) -> Option<f32> {
        self.values.get(key)?.as_f64().map(|value| value as f32)
    }

    fn put_float(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        let number = serde_json::Number::from_f64(f64::from(value)).ok_or_else(|| {
            StoreError::Write {
                key: key.to_string(),
                reason: "non-finite float".to_string(),
            }
        })?;
        self.put_value(key, Value::Number(number))
    }

    fn get_byte(&self, key: &str) -> Option<u8> {
        self.values
            .get(key)?
            .as_u64()
            .and_then(|value| u8::try_from(value).ok())
    }

    fn put_byte(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.put_value(key, Value::from(value))
    }

    fn put_strings(&mut self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        let previous: Vec<(String, Option<Value>)> = entries
            .iter()
            .map(|(key, value)| {
                let old = self
                    .values
                    .insert(key.to_string(), Value::String(value.to_string()));
                (key.to_string(), old)
            })
            .collect();
        if let Err(err) = self.flush() {
            // Undo in reverse so a key listed twice ends at its original value.
            for (key, old) in previous.into_iter().rev() {
                match old {
                    Some(old) => self.values.insert(key, old),
                    None => self.values.remove(&key),
                };
            }
            let keys: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();
            return Err(StoreError::Write {
                key: keys.join(","),
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.remove_all(&[key])
    }

    fn remove_all(&mut self, keys: &[&str]) -> Result<(), StoreError> {
        let removed: Vec<(String, Value)> = keys
            .iter()
            .filter_map(|key| self.values.remove_entry(*key))
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.flush() {
            self.values.extend(removed);
            return Err(StoreError::Write {
                key: keys.join(","),
                reason: err.to_string(),
            });
        }
        Ok(())
    }
}

/// The settings catalogue on top of a [`KvStore`] backend.
#[derive(Debug)]
pub struct SettingsStore<S> {
    backend: S,
}

impl<S: KvStore> SettingsStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.backend
            .get_string(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.backend.get_float(key).unwrap_or(default)
    }

    pub fn get_byte(&self, key: &str, default: u8) -> u8 {
        self.backend.get_byte(key).unwrap_or(default)
    }

    pub fn load_credential(&self) -> Option<NetworkCredential> {
        let ssid = self.get_string(KEY_SSID, "");
        if ssid.is_empty() {
            return None;
        }
        Some(NetworkCredential::new(ssid, self.get_string(KEY_PASSWORD, "")))
    }

    pub fn save_credential(&mut self, credential: &NetworkCredential) -> Result<(), StoreError> {
        self.backend.put_strings(&[
            (KEY_PASSWORD, credential.password.as_str()),
            (KEY_SSID, credential.ssid.as_str()),
        ])?;
        info!("wifi credentials saved for `{}`", credential.ssid);
        Ok(())
    }

    pub fn clear_credential(&mut self) -> Result<(), StoreError> {
        self.backend.remove_all(&[KEY_SSID, KEY_PASSWORD])?;
        info!("wifi credentials cleared");
        Ok(())
    }

    pub fn load_settings(&self) -> DeviceSettings {
        let defaults = DeviceSettings::default();

        let threshold = self.get_float(KEY_TEMP_THRESHOLD, defaults.temp_threshold_c);
        let temp_threshold_c = if is_valid_threshold(threshold) {
            threshold
        } else {
            warn!("stored temperature threshold {threshold} out of range; using default");
            defaults.temp_threshold_c
        };

        DeviceSettings {
            neo_color: self.load_color(
                [KEY_NEO_R, KEY_NEO_G, KEY_NEO_B, KEY_NEO_HEX],
                &defaults.neo_color,
            ),
            alert_color: self.load_color(
                [KEY_ALERT_R, KEY_ALERT_G, KEY_ALERT_B, KEY_ALERT_HEX],
                &defaults.alert_color,
            ),
            temp_threshold_c,
        }
    }

    pub fn save_neo_color(&mut self, color: &ColorSetting) -> Result<(), StoreError> {
        self.save_color([KEY_NEO_R, KEY_NEO_G, KEY_NEO_B, KEY_NEO_HEX], color)
    }

    pub fn save_alert_color(&mut self, color: &ColorSetting) -> Result<(), StoreError> {
        self.save_color([KEY_ALERT_R, KEY_ALERT_G, KEY_ALERT_B, KEY_ALERT_HEX], color)
    }

    pub fn save_threshold(&mut self, threshold_c: f32) -> Result<(), StoreError> {
        self.backend.put_float(KEY_TEMP_THRESHOLD, threshold_c)
    }

    fn load_color(&self, keys: [&str; 4], default: &ColorSetting) -> ColorSetting {
        let rgb = Rgb::new(
            self.get_byte(keys[0], default.rgb.r),
            self.get_byte(keys[1], default.rgb.g),
            self.get_byte(keys[2], default.rgb.b),
        );
        let hex = self.backend.get_string(keys[3]);
        ColorSetting::new(rgb, hex.as_deref())
    }

    fn save_color(&mut self, keys: [&str; 4], color: &ColorSetting) -> Result<(), StoreError> {
        self.backend.put_byte(keys[0], color.rgb.r)?;
        self.backend.put_byte(keys[1], color.rgb.g)?;
        self.backend.put_byte(keys[2], color.rgb.b)?;
        self.backend.put_string(keys[3], &color.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sensorhub-store-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn credential_round_trips_and_clears() {
        let mut store = SettingsStore::new(MemoryStore::new());
        for (ssid, password) in [("Home", "secret123"), ("Café Wifi", ""), ("x", "p w d")] {
            let credential = NetworkCredential::new(ssid, password);
            store.save_credential(&credential).unwrap();
            assert_eq!(store.load_credential(), Some(credential));
        }

        store.clear_credential().unwrap();
        assert_eq!(store.load_credential(), None);
        assert_eq!(store.get_string(KEY_SSID, ""), "");
        assert_eq!(store.get_string(KEY_PASSWORD, ""), "");
    }

    #[test]
    fn saving_overwrites_previous_credential() {
        let mut store = SettingsStore::new(MemoryStore::new());
        store
            .save_credential(&NetworkCredential::new("Old", "oldpass1"))
            .unwrap();
        store
            .save_credential(&NetworkCredential::new("New", "newpass1"))
            .unwrap();
        assert_eq!(
            store.load_credential(),
            Some(NetworkCredential::new("New", "newpass1"))
        );
    }

    #[test]
    fn missing_keys_resolve_to_defaults() {
        let store = SettingsStore::new(MemoryStore::new());
        assert_eq!(store.load_settings(), DeviceSettings::default());
        assert_eq!(store.get_byte(KEY_NEO_R, 7), 7);
        assert_eq!(store.get_float(KEY_TEMP_THRESHOLD, 1.5), 1.5);
    }

    #[test]
    fn colors_and_threshold_persist() {
        let mut store = SettingsStore::new(MemoryStore::new());
        let neo = ColorSetting::new(Rgb::new(10, 20, 30), Some("#0a141e"));
        let alert = ColorSetting::new(Rgb::new(255, 0, 0), Some("#ff0000"));
        store.save_neo_color(&neo).unwrap();
        store.save_alert_color(&alert).unwrap();
        store.save_threshold(25.5).unwrap();

        let settings = store.load_settings();
        assert_eq!(settings.neo_color, neo);
        assert_eq!(settings.alert_color, alert);
        assert_eq!(settings.temp_threshold_c, 25.5);
    }

    #[test]
    fn out_of_range_threshold_falls_back_to_default() {
        let mut backend = MemoryStore::new();
        backend.put_float(KEY_TEMP_THRESHOLD, 900.0).unwrap();
        let store = SettingsStore::new(backend);
        assert_eq!(
            store.load_settings().temp_threshold_c,
            DeviceSettings::default().temp_threshold_c
        );
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = scratch_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let mut store = SettingsStore::new(FileStore::open(&path).unwrap());
            store
                .save_credential(&NetworkCredential::new("Home", "secret123"))
                .unwrap();
            store.save_threshold(27.25).unwrap();
            store
                .save_alert_color(&ColorSetting::from_rgb(Rgb::new(0, 0, 255)))
                .unwrap();
        }

        let store = SettingsStore::new(FileStore::open(&path).unwrap());
        assert_eq!(
            store.load_credential(),
            Some(NetworkCredential::new("Home", "secret123"))
        );
        let settings = store.load_settings();
        assert_eq!(settings.temp_threshold_c, 27.25);
        assert_eq!(settings.alert_color.hex, "#0000ff");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn file_store_clear_removes_both_fields() {
        let path = scratch_path("clear");
        let _ = fs::remove_file(&path);

        let mut store = SettingsStore::new(FileStore::open(&path).unwrap());
        store
            .save_credential(&NetworkCredential::new("Home", "secret123"))
            .unwrap();
        store.clear_credential().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_string(KEY_SSID), None);
        assert_eq!(reopened.get_string(KEY_PASSWORD), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_credential_write_keeps_previous_pair() {
        let path = scratch_path("torn");
        let _ = fs::remove_file(&path);

        let mut store = SettingsStore::new(FileStore::open(&path).unwrap());
        store
            .save_credential(&NetworkCredential::new("Old", "oldpass1"))
            .unwrap();
        fs::remove_dir_all(path.parent().unwrap()).unwrap();

        let err = store
            .save_credential(&NetworkCredential::new("New", "newpass1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert_eq!(
            store.load_credential(),
            Some(NetworkCredential::new("Old", "oldpass1"))
        );
    }

    #[test]
    fn corrupt_file_is_reported_as_unavailable() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
