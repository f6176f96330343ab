//! Cache configuration

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of keys retained
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Default staleness window (one day)
pub const DEFAULT_STALE_AFTER_SECS: u64 = 86_400;

/// Default result field name
pub const DEFAULT_TARGET: &str = "ip2proxy";

/// Cache configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of distinct keys retained
    pub capacity: usize,
    /// Age in seconds at which an entry is refreshed before being served
    pub stale_after_secs: u64,
    /// Result field copied out of cached records
    pub target: String,
}

impl CacheConfig {
    /// Configuration with the given capacity and default everything else
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Staleness window
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Check the configuration can back a cache
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidCapacity(self.capacity));
        }
        if self.stale_after_secs == 0 {
            return Err(Error::InvalidStaleness);
        }
        if self.target.is_empty() {
            return Err(Error::InvalidTarget);
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_SIZE,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            target: DEFAULT_TARGET.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();

        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.stale_after(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.target, "ip2proxy");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        assert_eq!(CacheConfig::with_capacity(0).validate(), Err(Error::InvalidCapacity(0)));
    }

    #[test]
    fn test_validate_rejects_zero_staleness() {
        let config = CacheConfig {
            stale_after_secs: 0,
            ..CacheConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidStaleness));
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        let config = CacheConfig {
            target: String::new(),
            ..CacheConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidTarget));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig = serde_json::from_str(r#"{"capacity": 5}"#).unwrap();

        assert_eq!(config.capacity, 5);
        assert_eq!(config.stale_after_secs, DEFAULT_STALE_AFTER_SECS);
        assert_eq!(config.target, DEFAULT_TARGET);
    }
}
