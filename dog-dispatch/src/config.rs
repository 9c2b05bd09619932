//! Dispatch configuration.
//!
//! Defaults match the reference protocol constants. Any field can be
//! overridden from the environment with the `DOG_DISPATCH__` prefix:
//!
//! ```bash
//! export DOG_DISPATCH__KEY_PREFIX=jobs
//! export DOG_DISPATCH__POLL_INTERVAL_MS=250
//! ```

use std::time::Duration;

use crate::{keys::KeySpace, DispatchError, DispatchResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "DOG_DISPATCH__";

/// Configuration shared by clients and workers
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Namespace prepended to every store key
    pub key_prefix: String,
    /// Retention of job records after each write
    pub record_ttl: Duration,
    /// Lifetime of a pushed completion signal
    pub signal_ttl: Duration,
    /// Bound on a worker's blocking pop, and so on its scheduled-set re-check cadence
    pub poll_interval: Duration,
    /// Wait used by blocking runs that did not set their own timeout
    pub default_wait_timeout: Duration,
    /// Connection string for the redis store
    pub redis_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            key_prefix: "dispatch".to_string(),
            record_ttl: Duration::from_secs(90_000), // 25 hours
            signal_ttl: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            default_wait_timeout: Duration::from_secs(30),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `DOG_DISPATCH__*` environment variables
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by matching `(name, value)` pairs
    pub fn from_vars<I, K, V>(vars: I) -> DispatchResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.into();

            match name {
                "KEY_PREFIX" => config.key_prefix = value,
                "RECORD_TTL_SECS" => config.record_ttl = Duration::from_secs(parse(name, &value)?),
                "SIGNAL_TTL_SECS" => config.signal_ttl = Duration::from_secs(parse(name, &value)?),
                "POLL_INTERVAL_MS" => config.poll_interval = Duration::from_millis(parse(name, &value)?),
                "WAIT_TIMEOUT_SECS" => {
                    config.default_wait_timeout = Duration::from_secs(parse(name, &value)?)
                }
                "REDIS_URL" => config.redis_url = value,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the protocol relies on.
    ///
    /// Runs in [`from_env`](Self::from_env) only. Builder values are not
    /// checked; a zero poll interval still blocks for the claim floor.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.key_prefix.is_empty() {
            return Err(DispatchError::Config("key_prefix must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::Config("poll_interval must be positive".to_string()));
        }
        if self.record_ttl.is_zero() || self.signal_ttl.is_zero() {
            return Err(DispatchError::Config("ttl values must be positive".to_string()));
        }
        Ok(())
    }

    /// Key layout for this configuration
    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn with_signal_ttl(mut self, ttl: Duration) -> Self {
        self.signal_ttl = ttl;
        self
    }

    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }
}

fn parse(name: &str, value: &str) -> DispatchResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| DispatchError::Config(format!("{}{} must be an integer, got '{}'", ENV_PREFIX, name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = DispatchConfig::default();
        assert_eq!(config.record_ttl, Duration::from_secs(90_000));
        assert_eq!(config.signal_ttl, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = DispatchConfig::from_vars([
            ("DOG_DISPATCH__KEY_PREFIX", "jobs"),
            ("DOG_DISPATCH__POLL_INTERVAL_MS", "250"),
            ("DOG_DISPATCH__RECORD_TTL_SECS", "60"),
            ("UNRELATED", "x"),
        ])
        .unwrap();

        assert_eq!(config.key_prefix, "jobs");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.record_ttl, Duration::from_secs(60));
        assert_eq!(config.signal_ttl, Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_values() {
        let err = DispatchConfig::from_vars([("DOG_DISPATCH__SIGNAL_TTL_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));

        let err = DispatchConfig::from_vars([("DOG_DISPATCH__POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
