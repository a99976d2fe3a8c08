// Copyright 2025 Locksmith Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease TTL attached to the stored key. The sole mechanism by which an
    /// abandoned lock is eventually reclaimed.
    #[serde(default = "default_ttl")]
    pub ttl: Duration,

    /// Sleep between acquisition attempts while blocking
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Upper bound on how long a blocking acquisition may wait
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Whether acquisition retries at all. When false, a contended lock
    /// fails on the first attempt instead of waiting.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            retry_interval: default_retry_interval(),
            acquire_timeout: default_acquire_timeout(),
            blocking: default_blocking(),
        }
    }
}

// Default value functions
fn default_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_blocking() -> bool {
    true
}

impl LockConfig {
    /// Create configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set lease TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set retry sleep interval
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set blocking acquisition timeout
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Fail contended acquisitions immediately instead of retrying
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Interval between lease renewals.
    ///
    /// A third of the TTL, so up to two consecutive renewal attempts can be
    /// missed before the lease can lapse.
    pub fn renewal_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(1))
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.ttl.is_zero() {
            return Err(crate::error::LockError::configuration("ttl must be greater than zero"));
        }

        if self.retry_interval.is_zero() {
            return Err(crate::error::LockError::configuration("retry interval must be greater than zero"));
        }

        if self.acquire_timeout.is_zero() {
            return Err(crate::error::LockError::configuration("acquire timeout must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert!(config.blocking);
    }

    #[test]
    fn test_renewal_interval_is_a_third_of_ttl() {
        let config = LockConfig::default().with_ttl(Duration::from_secs(30));
        assert_eq!(config.renewal_interval(), Duration::from_secs(10));

        let config = LockConfig::default().with_ttl(Duration::from_millis(300));
        assert_eq!(config.renewal_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_config_validation() {
        let config = LockConfig::default();
        assert!(config.validate().is_ok());

        let config = LockConfig::default().with_ttl(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = LockConfig::default().with_retry_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = LockConfig::default().with_acquire_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = LockConfig::new()
            .with_ttl(Duration::from_secs(3))
            .with_retry_interval(Duration::from_millis(20))
            .with_acquire_timeout(Duration::from_secs(1))
            .non_blocking();
        assert_eq!(config.ttl, Duration::from_secs(3));
        assert_eq!(config.retry_interval, Duration::from_millis(20));
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
        assert!(!config.blocking);
    }

    #[test]
    fn test_serialization() {
        let config = LockConfig::default().with_ttl(Duration::from_secs(9));
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: LockConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(config.ttl, deserialized.ttl);
        assert_eq!(config.retry_interval, deserialized.retry_interval);
        assert_eq!(config.blocking, deserialized.blocking);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let deserialized: LockConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(deserialized.ttl, Duration::from_secs(30));
        assert!(deserialized.blocking);
    }
}
