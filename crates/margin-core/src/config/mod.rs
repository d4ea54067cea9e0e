//! Engine configuration.
//!
//! Provides `EngineConfig`, the timing and retry knobs shared by the draft
//! manager, sync orchestrator, read cache and connectivity probe.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_PERIODIC_SYNC_INTERVAL_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1_000;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 30_000;

/// Tunables for the offline sync engine.
///
/// Missing fields take their defaults; unknown fields are rejected so typos
/// in a config file surface instead of silently falling back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Quiet period before a draft snapshot is persisted
    pub autosave_debounce_ms: u64,
    /// Wait after a reconnect before draining the queue
    pub reconnect_delay_ms: u64,
    /// Interval of the periodic drain while online
    pub periodic_sync_interval_ms: u64,
    /// Attempts allowed per queue item before it becomes terminal
    pub max_retries: u32,
    /// Age after which cached reads are misses
    pub cache_ttl_ms: u64,
    /// Interval of the HTTP connectivity probe
    pub probe_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            periodic_sync_interval_ms: DEFAULT_PERIODIC_SYNC_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config payload.
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid engine config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(payload) => Self::from_json_str(&payload),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No engine config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("autosave_debounce_ms", self.autosave_debounce_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("periodic_sync_interval_ms", self.periodic_sync_interval_ms),
            ("cache_ttl_ms", self.cache_ttl_ms),
            ("probe_interval_ms", self.probe_interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
            if i64::try_from(value).is_err() {
                return Err(Error::Config(format!("{name} is out of range")));
            }
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        Ok(())
    }

    pub const fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub const fn periodic_sync_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_sync_interval_ms)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Cache TTL in the unit used by stored timestamps.
    pub fn cache_ttl_millis(&self) -> i64 {
        i64::try_from(self.cache_ttl_ms).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.autosave_debounce(), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.periodic_sync_interval(), Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cache_ttl_millis(), 86_400_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = EngineConfig::from_json_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(
            config,
            EngineConfig {
                max_retries: 5,
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = EngineConfig::from_json_str(r#"{"max_retry": 5}"#).unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_values() {
        assert!(EngineConfig::from_json_str(r#"{"max_retries": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"reconnect_delay_ms": 0}"#).is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let tmp = tempdir().unwrap();
        let config = EngineConfig::load(tmp.path().join("missing.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, r#"{"cache_ttl_ms": 1000}"#).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().cache_ttl_millis(), 1_000);
    }
}
