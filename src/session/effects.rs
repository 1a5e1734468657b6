use crate::clock::SectionTiming;
use crate::participants::Role;
use crate::sync::Envelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a transition originated on this replica or arrived from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    Local,
    Remote,
}

/// Transitions an external store may durably log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    Start,
    Pause,
    Resume,
    ChangeSection,
    Conclude,
}

/// Side-effect record for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceRecord {
    pub session_id: String,
    pub event: TransitionKind,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualRating {
    pub participant_id: String,
    /// `None` if the participant has since left
    pub display_name: Option<String>,
    pub rating: u8,
}

/// Summary handed to the conclusion collaborator when the leader concludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationPayload {
    pub session_id: String,
    pub meeting_code: String,
    pub duration_minutes: u64,
    pub duration_seconds: u64,
    pub average_rating: Option<f64>,
    pub individual_ratings: Vec<IndividualRating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_message: Option<String>,
    pub sections: Vec<SectionTiming>,
}

/// State-change notifications for the host surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        leader_id: Option<String>,
    },
    SectionChanged {
        from: Option<String>,
        to: String,
    },
    Paused {
        at_ms: i64,
    },
    Resumed {
        at_ms: i64,
        total_paused_ms: i64,
    },
    Concluded {
        at_ms: i64,
    },
    LeadershipChanged {
        leader_id: String,
        local_is_leader: bool,
    },
    ParticipantJoined {
        participant_id: String,
        role: Role,
    },
    ParticipantLeft {
        participant_id: String,
    },
    RatingSubmitted {
        participant_id: String,
        rating: u8,
        average: Option<f64>,
        complete: bool,
    },
    /// Advisory only; concluding with partial ratings is always allowed
    RatingTimeoutReached {
        submitted: usize,
        expected: usize,
    },
    FollowChanged {
        participant_id: String,
        following: bool,
    },
    NotesUpdated {
        section_id: String,
    },
    /// A snapshot replaced local state
    Synchronized,
    DesyncDetected {
        reason: String,
    },
    /// The last participant left
    TeardownEligible,
}

/// Work the host must carry out on the machine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    Broadcast(Envelope),
    Persist(PersistenceRecord),
    Finalize(FinalizationPayload),
    Notify(SessionEvent),
}

/// Outcome of applying a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    /// State changed
    Applied,
    /// Accepted, but state already matched (idempotent re-application)
    Unchanged,
    /// Sequence not newer than the last applied on its stream; dropped
    Stale,
    /// Held until the first snapshot arrives
    Buffered,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    WrongSession,
    /// The session is concluded; late messages are anomalies, not errors
    Concluded,
    /// Snapshot addressed to another participant
    NotAddressed,
    /// This replica has left the session
    Detached,
    /// Payload failed validation (unknown section, bad rating, ...)
    Invalid(String),
}
