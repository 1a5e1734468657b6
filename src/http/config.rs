use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the relay keeps passive replicas around
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// A concluded session stays visible this long after the relay saw
    /// the conclusion
    /// Default: 300 seconds
    pub concluded_retention_secs: u64,

    /// A session nobody answers a snapshot request for is dropped after this
    /// Default: 60 seconds
    pub snapshot_timeout_secs: u64,

    /// Interval of the background sweep
    /// Default: 30 seconds
    pub sweep_interval_secs: u64,
}

impl RelayConfig {
    pub fn concluded_retention(&self) -> Duration {
        Duration::from_secs(self.concluded_retention_secs)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            concluded_retention_secs: 300,
            snapshot_timeout_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}
