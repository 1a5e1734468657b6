use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a session replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the leader waits after the first rating before raising
    /// the rating-timeout advisory
    /// Default: 120 seconds
    pub rating_timeout_secs: u64,

    /// Incremental messages held while waiting for the first snapshot;
    /// the oldest are dropped beyond this
    /// Default: 256
    pub snapshot_buffer_limit: usize,
}

impl SessionConfig {
    pub fn rating_timeout(&self) -> Duration {
        Duration::from_secs(self.rating_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rating_timeout_secs: 120,
            snapshot_buffer_limit: 256,
        }
    }
}
