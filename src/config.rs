//! Config manager (component J): a thread-safe, mutex-guarded cache of
//! typed configuration entries, seeded from environment variables at
//! startup (§4.J.1) and otherwise kept current by an external
//! `ConfigStore` collaborator.
//!
//! Grounded in the teacher's `config.rs::Config::from_env` — the
//! `env_required`/`env_parse_or`/`env_bool` helper trio is reused
//! verbatim for the bootstrap path, generalized from populating one fixed
//! struct to seeding a typed-entry cache where each entry already carries
//! its own default/min/max, so `update_entry`'s validation and the env
//! bootstrap share one source of truth instead of the teacher's scattered
//! per-field parsing.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
    #[error("invalid duration format for {var}: {message}")]
    InvalidDuration { var: String, message: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("value {value} for {key} is out of range [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        == "true"
}

/// A typed config value. `type` in the spec's entry shape is implicit in
/// which variant is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(String),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Number(_) => "number",
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::String(_) => "string",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(v) => Some(*v as f64),
            ConfigValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// One entry in the config cache.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: ConfigValue,
    pub label: String,
    pub description: String,
    pub category: String,
    pub default: ConfigValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Entry {
    fn new(
        key: &str,
        value: ConfigValue,
        label: &str,
        description: &str,
        category: &str,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        Self {
            key: key.to_string(),
            value: value.clone(),
            label: label.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            default: value,
            min,
            max,
        }
    }

    fn validate_and_set(&mut self, value: ConfigValue) -> Result<(), ConfigError> {
        if value.type_name() != self.value.type_name() {
            return Err(ConfigError::TypeMismatch {
                key: self.key.clone(),
                expected: self.value.type_name(),
                actual: value.type_name(),
            });
        }
        if let (Some(v), Some(min), Some(max)) = (value.as_f64(), self.min, self.max) {
            if v < min || v > max {
                return Err(ConfigError::OutOfRange {
                    key: self.key.clone(),
                    value: v,
                    min,
                    max,
                });
            }
        }
        self.value = value;
        Ok(())
    }
}

/// External persistence collaborator. The core never assumes a concrete
/// backend — SQL, a file, a remote service — is wired in.
pub trait ConfigStore: Send + Sync {
    fn load_all(&self) -> Vec<Entry>;
    fn save(&self, entry: Entry);
    fn save_batch(&self, entries: Vec<Entry>);
}

/// Default collaborator: holds entries only in memory, for when no
/// external store is configured.
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConfigStore for InMemoryConfigStore {
    fn load_all(&self) -> Vec<Entry> {
        self.entries.lock().expect("config store lock poisoned").values().cloned().collect()
    }

    fn save(&self, entry: Entry) {
        self.entries
            .lock()
            .expect("config store lock poisoned")
            .insert(entry.key.clone(), entry);
    }

    fn save_batch(&self, entries: Vec<Entry>) {
        let mut guard = self.entries.lock().expect("config store lock poisoned");
        for entry in entries {
            guard.insert(entry.key.clone(), entry);
        }
    }
}

/// Thread-safe typed config cache. Reads never see a partially applied
/// multi-key update — `update_entries` validates every change before
/// applying any of them.
pub struct ConfigManager {
    entries: Mutex<HashMap<String, Entry>>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl ConfigManager {
    pub fn with_store(store: Option<Arc<dyn ConfigStore>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Seeds the cache from environment variables, one var per known
    /// knob, following the teacher's `Config::from_env` pattern: no
    /// knob here is strictly required, each falls back to its documented
    /// default.
    pub fn bootstrap_from_env() -> Result<Self, ConfigError> {
        let manager = Self::with_store(None);
        let mut entries = manager.entries.lock().expect("config cache lock poisoned");

        entries.insert(
            "workers".to_string(),
            Entry::new(
                "workers",
                ConfigValue::Integer(env_parse_or("WORKERS", 0i64)?),
                "Workers",
                "Total worker count (event-loop shards); 0 = auto",
                "concurrency",
                Some(0.0),
                Some(256.0),
            ),
        );
        entries.insert(
            "maxConnections".to_string(),
            Entry::new(
                "maxConnections",
                ConfigValue::Integer(env_parse_or("MAX_CONNECTIONS", 1000i64)?),
                "Max Connections",
                "Total concurrent transfer cap",
                "concurrency",
                Some(1.0),
                Some(1_000_000.0),
            ),
        );
        entries.insert(
            "defaultTimeout".to_string(),
            Entry::new(
                "defaultTimeout",
                ConfigValue::Integer(env_parse_or("DEFAULT_TIMEOUT_MS", 30_000i64)?),
                "Default Timeout",
                "Per-request timeout fallback (ms)",
                "transport",
                Some(1.0),
                Some(600_000.0),
            ),
        );
        entries.insert(
            "eventLoopMaxConcurrent".to_string(),
            Entry::new(
                "eventLoopMaxConcurrent",
                ConfigValue::Integer(env_parse_or("EVENT_LOOP_MAX_CONCURRENT", 100i64)?),
                "Event Loop Max Concurrent",
                "Per-worker concurrency cap",
                "concurrency",
                Some(1.0),
                Some(100_000.0),
            ),
        );
        entries.insert(
            "eventLoopMaxPerHost".to_string(),
            Entry::new(
                "eventLoopMaxPerHost",
                ConfigValue::Integer(env_parse_or("EVENT_LOOP_MAX_PER_HOST", 50i64)?),
                "Event Loop Max Per Host",
                "Per-worker per-host concurrency cap",
                "concurrency",
                Some(1.0),
                Some(100_000.0),
            ),
        );
        entries.insert(
            "dnsCacheTimeout".to_string(),
            Entry::new(
                "dnsCacheTimeout",
                ConfigValue::Integer(env_parse_or("DNS_CACHE_TIMEOUT_SECS", 300i64)?),
                "DNS Cache Timeout",
                "Seconds to retain DNS entries; 0 = no cache",
                "transport",
                Some(0.0),
                Some(86_400.0),
            ),
        );
        entries.insert(
            "tcpKeepAliveIdle".to_string(),
            Entry::new(
                "tcpKeepAliveIdle",
                ConfigValue::Integer(env_parse_or("TCP_KEEPALIVE_IDLE_SECS", 60i64)?),
                "TCP Keep-Alive Idle",
                "TCP keep-alive idle time (secs); 0 = off",
                "transport",
                Some(0.0),
                Some(3600.0),
            ),
        );
        entries.insert(
            "tcpKeepAliveInterval".to_string(),
            Entry::new(
                "tcpKeepAliveInterval",
                ConfigValue::Integer(env_parse_or("TCP_KEEPALIVE_INTERVAL_SECS", 10i64)?),
                "TCP Keep-Alive Interval",
                "TCP keep-alive probe interval (secs)",
                "transport",
                Some(0.0),
                Some(3600.0),
            ),
        );
        entries.insert(
            "statsInterval".to_string(),
            Entry::new(
                "statsInterval",
                ConfigValue::Integer(env_parse_or("STATS_INTERVAL_MS", 250i64)?),
                "Stats Interval",
                "Snapshot cadence (ms)",
                "metrics",
                Some(10.0),
                Some(60_000.0),
            ),
        );
        entries.insert(
            "successSampleRate".to_string(),
            Entry::new(
                "successSampleRate",
                ConfigValue::Integer(env_parse_or("SUCCESS_SAMPLE_RATE", 100i64)?),
                "Success Sample Rate",
                "Percent of successful responses sampled for the reservoir",
                "metrics",
                Some(0.0),
                Some(100.0),
            ),
        );
        entries.insert(
            "slowThresholdMs".to_string(),
            Entry::new(
                "slowThresholdMs",
                ConfigValue::Integer(env_parse_or("SLOW_THRESHOLD_MS", 1000i64)?),
                "Slow Threshold",
                "Latency above which a success sample is always captured",
                "metrics",
                Some(0.0),
                Some(600_000.0),
            ),
        );

        drop(entries);
        Ok(manager)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| match v {
            ConfigValue::Integer(i) => Some(i),
            _ => None,
        }).unwrap_or(default)
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| match v {
            ConfigValue::Boolean(b) => Some(b),
            _ => None,
        }).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).and_then(|v| match v {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }).unwrap_or_else(|| default.to_string())
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.entries
            .lock()
            .expect("config cache lock poisoned")
            .get(key)
            .map(|e| e.value.clone())
    }

    pub fn update_entry(&self, key: &str, value: ConfigValue) -> Result<(), ConfigError> {
        let mut entries = self.entries.lock().expect("config cache lock poisoned");
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        entry.validate_and_set(value)?;
        if let Some(store) = &self.store {
            store.save(entry.clone());
        }
        Ok(())
    }

    /// Validates every change before applying any of them, so readers
    /// never observe a partially applied multi-key update.
    pub fn update_entries(&self, updates: HashMap<String, ConfigValue>) -> Result<(), ConfigError> {
        let mut entries = self.entries.lock().expect("config cache lock poisoned");

        for (key, value) in &updates {
            let entry = entries
                .get(key)
                .ok_or_else(|| ConfigError::UnknownKey(key.clone()))?;
            if value.type_name() != entry.value.type_name() {
                return Err(ConfigError::TypeMismatch {
                    key: key.clone(),
                    expected: entry.value.type_name(),
                    actual: value.type_name(),
                });
            }
            if let (Some(v), Some(min), Some(max)) = (value.as_f64(), entry.min, entry.max) {
                if v < min || v > max {
                    return Err(ConfigError::OutOfRange {
                        key: key.clone(),
                        value: v,
                        min,
                        max,
                    });
                }
            }
        }

        for (key, value) in updates {
            if let Some(entry) = entries.get_mut(&key) {
                entry.value = value;
            }
        }

        if let Some(store) = &self.store {
            store.save_batch(entries.values().cloned().collect());
        }

        Ok(())
    }

    /// Reloads the cache from the external `ConfigStore`, if one is
    /// configured. A no-op otherwise.
    pub fn reload(&self) {
        let Some(store) = &self.store else { return };
        let loaded = store.load_all();
        let mut entries = self.entries.lock().expect("config cache lock poisoned");
        for entry in loaded {
            entries.insert(entry.key.clone(), entry);
        }
    }
}

/// Parses a request body "send_json" flag the way the teacher's
/// `Config::from_env` did, kept here since the control-plane request
/// decoder and any CLI bootstrap both need it.
pub fn env_json_payload_required() -> Result<String, ConfigError> {
    env_required("JSON_PAYLOAD")
}

pub fn env_bool_flag(name: &str, default: bool) -> bool {
    env_bool(name, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // All tests here share process-global env state (`bootstrap_from_env`
    // reads real env vars), so every one of them runs `#[serial]` — the
    // same discipline the teacher applied to its own `Config::from_env`
    // tests.

    #[test]
    #[serial]
    fn bootstrap_seeds_known_defaults_without_env_vars() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        assert_eq!(manager.get_int("maxConnections", -1), 1000);
        assert_eq!(manager.get_int("statsInterval", -1), 250);
    }

    #[test]
    #[serial]
    fn bootstrap_honors_an_overridden_env_var() {
        std::env::set_var("MAX_CONNECTIONS", "42");
        let manager = ConfigManager::bootstrap_from_env();
        std::env::remove_var("MAX_CONNECTIONS");
        assert_eq!(manager.unwrap().get_int("maxConnections", -1), 42);
    }

    #[test]
    #[serial]
    fn bootstrap_rejects_an_unparseable_env_var() {
        std::env::set_var("WORKERS", "not-a-number");
        let result = ConfigManager::bootstrap_from_env();
        std::env::remove_var("WORKERS");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn update_entry_rejects_out_of_range_value() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        let result = manager.update_entry("successSampleRate", ConfigValue::Integer(200));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn update_entry_rejects_type_mismatch() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        let result = manager.update_entry("workers", ConfigValue::Boolean(true));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn update_entry_applies_valid_value() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        manager.update_entry("workers", ConfigValue::Integer(8)).unwrap();
        assert_eq!(manager.get_int("workers", -1), 8);
    }

    #[test]
    #[serial]
    fn update_entries_is_all_or_nothing() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        let mut updates = HashMap::new();
        updates.insert("workers".to_string(), ConfigValue::Integer(4));
        updates.insert("successSampleRate".to_string(), ConfigValue::Integer(999));

        let result = manager.update_entries(updates);
        assert!(result.is_err());
        assert_eq!(manager.get_int("workers", -1), 0, "partial update must not apply");
    }

    #[test]
    #[serial]
    fn unknown_key_is_rejected() {
        let manager = ConfigManager::bootstrap_from_env().unwrap();
        let result = manager.update_entry("doesNotExist", ConfigValue::Integer(1));
        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }
}
