use crate::clock::Lifecycle;
use crate::pace::Pace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a session for display and the relay API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,

    pub meeting_code: String,

    pub lifecycle: Lifecycle,

    /// Current section, or the first agenda section before start
    pub current_section_id: String,

    /// When the leader started the clock
    pub started_at: Option<DateTime<Utc>>,

    /// Active (unpaused) time since start
    pub active_elapsed_secs: u64,

    /// Cumulative active time in the current section
    pub section_elapsed_secs: u64,

    pub pace: Pace,

    pub leader_id: Option<String>,

    pub participant_count: usize,

    /// Number of ratings submitted so far
    pub ratings_count: usize,

    pub average_rating: Option<f64>,

    /// Every present participant has rated
    pub ratings_complete: bool,

    /// Whether this replica has current state (false while awaiting a snapshot)
    pub synchronized: bool,
}
