//! Engine configuration.
//!
//! Configuration is fixed for the lifetime of an [`EventStore`](crate::EventStore).
//! Values come from [`EngineConfig::default`] or from `EVENTIDE_*`
//! environment variables via [`EngineConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use eventide_core::error::EventStoreError;
use serde::{Deserialize, Serialize};

/// When `append_events` returns relative to fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Return as soon as the events are committed.
    #[default]
    Eventual,
    /// Return after handlers, projections and sagas have seen the batch.
    Strong,
}

impl FromStr for ConsistencyLevel {
    type Err = EventStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "eventual" => Ok(Self::Eventual),
            "strong" => Ok(Self::Strong),
            other => Err(EventStoreError::Validation(format!(
                "unknown consistency level: {other}"
            ))),
        }
    }
}

/// Which events the retention sweep may purge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Events older than this are eligible.
    pub max_age: Option<Duration>,
    /// Only the newest `max_events` log entries are kept.
    pub max_events: Option<usize>,
    /// Copy eligible events to the archive before purging.
    pub archive_old_events: bool,
    /// Remove archived events from the log.
    pub delete_after_archive: bool,
}

impl RetentionPolicy {
    /// Whether the policy can ever select an event.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_events.is_some()
    }

    /// Whether eligible events leave the log.
    #[must_use]
    pub fn deletes(&self) -> bool {
        !self.archive_old_events || self.delete_after_archive
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retained events per stream that trigger an automatic snapshot.
    pub snapshot_frequency: usize,
    /// Hard cap on retained events per stream before a forced snapshot.
    pub max_events_per_stream: usize,
    /// Compression of stored state, delegated to the durable repository.
    pub enable_compression: bool,
    /// Encryption at rest, delegated to the durable repository.
    pub enable_encryption: bool,
    /// Retention policy.
    pub retention_policy: RetentionPolicy,
    /// Requested replica count. Only `1` is meaningful in a single-owner
    /// process.
    pub replication_factor: u32,
    /// Append/fan-out consistency.
    pub consistency_level: ConsistencyLevel,
    /// Subscription dispatch interval.
    pub subscription_tick: Duration,
    /// Snapshot sweep interval.
    pub snapshot_sweep_interval: Duration,
    /// Retention sweep interval.
    pub retention_sweep_interval: Duration,
    /// Saga step timeout used when a step does not declare its own.
    pub default_step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_frequency: 100,
            max_events_per_stream: 1000,
            enable_compression: false,
            enable_encryption: false,
            retention_policy: RetentionPolicy::default(),
            replication_factor: 1,
            consistency_level: ConsistencyLevel::Eventual,
            subscription_tick: Duration::from_secs(1),
            snapshot_sweep_interval: Duration::from_secs(60),
            retention_sweep_interval: Duration::from_secs(3600),
            default_step_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Reads configuration from `EVENTIDE_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` if a variable cannot be parsed or
    /// the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, EventStoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` on parse or validation failure.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EventStoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| -> Result<Duration, EventStoreError> {
            Ok(parse_var::<u64>(&lookup, name)?.map_or(fallback, Duration::from_secs))
        };
        let millis = |name: &str, fallback: Duration| -> Result<Duration, EventStoreError> {
            Ok(parse_var::<u64>(&lookup, name)?.map_or(fallback, Duration::from_millis))
        };

        let config = Self {
            snapshot_frequency: parse_var(&lookup, "EVENTIDE_SNAPSHOT_FREQUENCY")?
                .unwrap_or(defaults.snapshot_frequency),
            max_events_per_stream: parse_var(&lookup, "EVENTIDE_MAX_EVENTS_PER_STREAM")?
                .unwrap_or(defaults.max_events_per_stream),
            enable_compression: parse_var(&lookup, "EVENTIDE_ENABLE_COMPRESSION")?
                .unwrap_or(defaults.enable_compression),
            enable_encryption: parse_var(&lookup, "EVENTIDE_ENABLE_ENCRYPTION")?
                .unwrap_or(defaults.enable_encryption),
            retention_policy: RetentionPolicy {
                max_age: parse_var::<u64>(&lookup, "EVENTIDE_RETENTION_MAX_AGE_SECS")?
                    .map(Duration::from_secs),
                max_events: parse_var(&lookup, "EVENTIDE_RETENTION_MAX_EVENTS")?,
                archive_old_events: parse_var(&lookup, "EVENTIDE_RETENTION_ARCHIVE")?
                    .unwrap_or(false),
                delete_after_archive: parse_var(&lookup, "EVENTIDE_RETENTION_DELETE_AFTER_ARCHIVE")?
                    .unwrap_or(false),
            },
            replication_factor: parse_var(&lookup, "EVENTIDE_REPLICATION_FACTOR")?
                .unwrap_or(defaults.replication_factor),
            consistency_level: parse_var(&lookup, "EVENTIDE_CONSISTENCY_LEVEL")?
                .unwrap_or(defaults.consistency_level),
            subscription_tick: millis("EVENTIDE_SUBSCRIPTION_TICK_MS", defaults.subscription_tick)?,
            snapshot_sweep_interval: secs(
                "EVENTIDE_SNAPSHOT_SWEEP_SECS",
                defaults.snapshot_sweep_interval,
            )?,
            retention_sweep_interval: secs(
                "EVENTIDE_RETENTION_SWEEP_SECS",
                defaults.retention_sweep_interval,
            )?,
            default_step_timeout: millis(
                "EVENTIDE_STEP_TIMEOUT_MS",
                defaults.default_step_timeout,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), EventStoreError> {
        let invalid = |field: &str| -> Result<(), EventStoreError> {
            Err(EventStoreError::Validation(format!("{field} must be > 0")))
        };
        if self.snapshot_frequency == 0 {
            return invalid("snapshot_frequency");
        }
        if self.max_events_per_stream == 0 {
            return invalid("max_events_per_stream");
        }
        if self.replication_factor == 0 {
            return invalid("replication_factor");
        }
        if self.subscription_tick.is_zero() {
            return invalid("subscription_tick");
        }
        if self.snapshot_sweep_interval.is_zero() {
            return invalid("snapshot_sweep_interval");
        }
        if self.retention_sweep_interval.is_zero() {
            return invalid("retention_sweep_interval");
        }
        if self.default_step_timeout.is_zero() {
            return invalid("default_step_timeout");
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, EventStoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| EventStoreError::Validation(format!("{name} is invalid: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_uses_defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("EVENTIDE_SNAPSHOT_FREQUENCY", "2"),
            ("EVENTIDE_CONSISTENCY_LEVEL", "Strong"),
            ("EVENTIDE_RETENTION_MAX_AGE_SECS", "86400"),
            ("EVENTIDE_RETENTION_ARCHIVE", "true"),
            ("EVENTIDE_SUBSCRIPTION_TICK_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.snapshot_frequency, 2);
        assert_eq!(config.consistency_level, ConsistencyLevel::Strong);
        assert_eq!(
            config.retention_policy.max_age,
            Some(Duration::from_secs(86_400))
        );
        assert!(config.retention_policy.archive_old_events);
        assert!(!config.retention_policy.deletes());
        assert_eq!(config.subscription_tick, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_rejects_unparsable_value() {
        let result = EngineConfig::from_lookup(lookup_from(&[(
            "EVENTIDE_SNAPSHOT_FREQUENCY",
            "often",
        )]));

        match result {
            Err(EventStoreError::Validation(message)) => {
                assert!(message.contains("EVENTIDE_SNAPSHOT_FREQUENCY"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_replication_factor() {
        let config = EngineConfig {
            replication_factor: 0,
            ..EngineConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(EventStoreError::Validation(_))
        ));
    }
}
