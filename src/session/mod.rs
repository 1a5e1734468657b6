//! Meeting session coordination
//!
//! This module provides the `SessionStateMachine` that owns one replica of a
//! meeting session and manages:
//! - Lifecycle transitions (start, pause, resume, conclude) and their guards
//! - Section navigation and elapsed-time accounting via the clock engine
//! - Participant presence, leadership and follow state
//! - Rating collection and the conclusion summary
//! - Applying peer messages idempotently, with snapshot-first joining
//!
//! Side effects (broadcasts, persistence records, finalization, host
//! notifications) are queued as [`SessionEffect`]s and drained by the host.

mod config;
mod effects;
mod machine;
mod state;
mod stats;

pub use config::SessionConfig;
pub use effects::{
    ApplyStatus, FinalizationPayload, IgnoreReason, IndividualRating, Origin, PersistenceRecord,
    SessionEffect, SessionEvent, TransitionKind,
};
pub use machine::{JoinMode, JoinOutcome, SessionStateMachine};
pub use state::{new_session_id, MeetingKey, SessionSnapshot};
pub use stats::SessionStatus;
