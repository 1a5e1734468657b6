//! Session error types.
//!
//! Every error here is local and recoverable: the state machine rejects the
//! action, leaves its state untouched, and keeps running. Stale protocol
//! messages are not errors at all; they surface as
//! [`ApplyStatus::Stale`](crate::session::ApplyStatus::Stale).

use crate::clock::Lifecycle;
use std::fmt;
use thiserror::Error;

/// An action a participant can originate against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Join,
    Leave,
    ChangeSection,
    Pause,
    Resume,
    Conclude,
    SubmitRating,
    ClaimLeadership,
    UpdateNotes,
    ToggleFollow,
}

impl Action {
    /// Whether only the current leader may originate this action.
    pub fn is_leader_only(self) -> bool {
        matches!(
            self,
            Action::Start
                | Action::ChangeSection
                | Action::Pause
                | Action::Resume
                | Action::Conclude
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Join => "join",
            Action::Leave => "leave",
            Action::ChangeSection => "change-section",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Conclude => "conclude",
            Action::SubmitRating => "submit-rating",
            Action::ClaimLeadership => "claim-leadership",
            Action::UpdateNotes => "update-notes",
            Action::ToggleFollow => "toggle-follow",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The action is not permitted in the current state or by this caller.
    GuardViolation,
    /// The input itself is malformed (bad rating, unknown section, ...).
    Validation,
    /// The session is concluded; nothing further can happen to it.
    Terminal,
}

/// Session error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The action is not valid from the current lifecycle state.
    #[error("cannot {action} while session is {lifecycle}")]
    InvalidTransition { action: Action, lifecycle: Lifecycle },

    /// A follower tried to originate a leader-only action.
    #[error("{participant_id} is not the leader and cannot {action}")]
    NotLeader {
        participant_id: String,
        action: Action,
    },

    /// The local participant has not joined (or has already left).
    #[error("participant {0} is not part of this session")]
    NotJoined(String),

    /// The replica is still waiting for its first state snapshot.
    #[error("session state not yet synchronized")]
    AwaitingSnapshot,

    /// Participant id is not present in the registry.
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// Section id does not resolve to any agenda section.
    #[error("unknown section: {0}")]
    UnknownSection(String),

    /// Rating outside the 1..=10 range.
    #[error("rating {0} is out of range (1-10)")]
    RatingOutOfRange(i64),

    /// Agenda failed validation.
    #[error("invalid agenda: {0}")]
    InvalidAgenda(String),

    /// The session has concluded.
    #[error("session {0} is concluded")]
    Concluded(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidTransition { .. }
            | SessionError::NotLeader { .. }
            | SessionError::NotJoined(_)
            | SessionError::AwaitingSnapshot => ErrorKind::GuardViolation,
            SessionError::UnknownParticipant(_)
            | SessionError::UnknownSection(_)
            | SessionError::RatingOutOfRange(_)
            | SessionError::InvalidAgenda(_) => ErrorKind::Validation,
            SessionError::Concluded(_) => ErrorKind::Terminal,
        }
    }
}
