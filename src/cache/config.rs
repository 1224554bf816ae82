//! Read Cache Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default total budget (256MB)
pub const DEFAULT_TOTAL_CACHE_SIZE: u64 = 256 * 1024 * 1024;

/// Default burst tier target (64MB)
pub const DEFAULT_TARGET_BURST_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// Default correlated reference window
pub const DEFAULT_CORRELATED_REFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity budgets and touch correlation window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCacheConfig {
    /// Maximum bytes cached across both tiers
    pub total_cache_size: u64,
    /// Bytes the burst tier may hold before its tail is demoted or evicted
    pub target_burst_cache_size: u64,
    /// Repeat touches inside this window are not counted
    #[serde(rename = "correlated_reference_timeout_secs", with = "duration_secs")]
    pub correlated_reference_timeout: Duration,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            total_cache_size: DEFAULT_TOTAL_CACHE_SIZE,
            target_burst_cache_size: DEFAULT_TARGET_BURST_CACHE_SIZE,
            correlated_reference_timeout: DEFAULT_CORRELATED_REFERENCE_TIMEOUT,
        }
    }
}

impl ReadCacheConfig {
    /// Configuration with the given budgets and correlation window in seconds
    pub fn new(total_cache_size: u64, target_burst_cache_size: u64, timeout_secs: u64) -> Self {
        Self {
            total_cache_size,
            target_burst_cache_size,
            correlated_reference_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_total_cache_size(mut self, bytes: u64) -> Self {
        self.total_cache_size = bytes;
        self
    }

    pub fn with_target_burst_cache_size(mut self, bytes: u64) -> Self {
        self.target_burst_cache_size = bytes;
        self
    }

    pub fn with_correlated_reference_timeout(mut self, timeout: Duration) -> Self {
        self.correlated_reference_timeout = timeout;
        self
    }

    /// Correlation window in milliseconds
    pub fn correlated_reference_timeout_ms(&self) -> u64 {
        u64::try_from(self.correlated_reference_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        validate_sizes(self.total_cache_size, self.target_burst_cache_size)
    }
}

pub(crate) fn validate_sizes(total: u64, burst_target: u64) -> Result<()> {
    if burst_target > total {
        return Err(Error::Config(format!(
            "target burst cache size {burst_target} exceeds total cache size {total}"
        )));
    }
    Ok(())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
