// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time;

use duration_str::deserialize_duration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("lock_timeout must be greater than zero")]
    ZeroLockTimeout,
    #[error("lock_poll_interval must be greater than zero")]
    ZeroPollInterval,
    #[error("lock_poll_interval ({poll:?}) exceeds lock_timeout ({timeout:?})")]
    PollExceedsTimeout {
        poll: time::Duration,
        timeout: time::Duration,
    },
    #[error("max_degradation_percent must be within 0..=100, got {0}")]
    InvalidDegradation(f64),
}

/// Tunables for lock acquisition and base-bundle verification.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// how long to wait for the metadata lock
    #[serde(
        default = "default_lock_timeout",
        deserialize_with = "deserialize_duration"
    )]
    lock_timeout: time::Duration,

    /// interval between lock attempts
    #[serde(
        default = "default_lock_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    lock_poll_interval: time::Duration,

    /// minimum number of certificates a replacement base bundle must hold
    #[serde(default = "default_min_base_bundle_certs")]
    min_base_bundle_certs: usize,

    /// drop in certificate count (percent) above which an update is flagged
    #[serde(default = "default_max_degradation_percent")]
    max_degradation_percent: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            lock_timeout: default_lock_timeout(),
            lock_poll_interval: default_lock_poll_interval(),
            min_base_bundle_certs: default_min_base_bundle_certs(),
            max_degradation_percent: default_max_degradation_percent(),
        }
    }
}

fn default_lock_timeout() -> time::Duration {
    time::Duration::from_secs(30)
}

fn default_lock_poll_interval() -> time::Duration {
    time::Duration::from_millis(100)
}

fn default_min_base_bundle_certs() -> usize {
    100
}

fn default_max_degradation_percent() -> f64 {
    20.0
}

impl StoreConfig {
    pub fn new() -> Self {
        StoreConfig::default()
    }

    pub fn with_lock_timeout(self, lock_timeout: time::Duration) -> Self {
        StoreConfig {
            lock_timeout,
            ..self
        }
    }

    pub fn with_lock_poll_interval(self, lock_poll_interval: time::Duration) -> Self {
        StoreConfig {
            lock_poll_interval,
            ..self
        }
    }

    pub fn with_min_base_bundle_certs(self, min_base_bundle_certs: usize) -> Self {
        StoreConfig {
            min_base_bundle_certs,
            ..self
        }
    }

    pub fn with_max_degradation_percent(self, max_degradation_percent: f64) -> Self {
        StoreConfig {
            max_degradation_percent,
            ..self
        }
    }

    pub fn lock_timeout(&self) -> time::Duration {
        self.lock_timeout
    }

    pub fn lock_poll_interval(&self) -> time::Duration {
        self.lock_poll_interval
    }

    pub fn min_base_bundle_certs(&self) -> usize {
        self.min_base_bundle_certs
    }

    pub fn max_degradation_percent(&self) -> f64 {
        self.max_degradation_percent
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::ZeroLockTimeout);
        }
        if self.lock_poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.lock_poll_interval > self.lock_timeout {
            return Err(ConfigError::PollExceedsTimeout {
                poll: self.lock_poll_interval,
                timeout: self.lock_timeout,
            });
        }
        if !(0.0..=100.0).contains(&self.max_degradation_percent) {
            return Err(ConfigError::InvalidDegradation(
                self.max_degradation_percent,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_configuration() {
        let config = StoreConfig::default();
        assert_eq!(config.lock_timeout(), time::Duration::from_secs(30));
        assert_eq!(config.lock_poll_interval(), time::Duration::from_millis(100));
        assert_eq!(config.min_base_bundle_certs(), 100);
        assert_eq!(config.max_degradation_percent(), 20.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_human_durations() {
        let yaml = r#"
lock_timeout: 5s
lock_poll_interval: 50ms
min_base_bundle_certs: 3
"#;
        let config: StoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lock_timeout(), time::Duration::from_secs(5));
        assert_eq!(config.lock_poll_interval(), time::Duration::from_millis(50));
        assert_eq!(config.min_base_bundle_certs(), 3);
        assert_eq!(config.max_degradation_percent(), 20.0);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res: Result<StoreConfig, _> = serde_yaml::from_str("lock_timeot: 5s\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = StoreConfig::new().with_lock_timeout(time::Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroLockTimeout));

        let config = StoreConfig::new().with_lock_poll_interval(time::Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPollInterval));

        let config = StoreConfig::new()
            .with_lock_timeout(time::Duration::from_millis(10))
            .with_lock_poll_interval(time::Duration::from_millis(20));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PollExceedsTimeout { .. })
        ));

        let config = StoreConfig::new().with_max_degradation_percent(150.0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidDegradation(150.0)));
    }
}
