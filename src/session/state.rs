use crate::agenda::Agenda;
use crate::clock::ClockEngine;
use crate::participants::ParticipantRegistry;
use crate::rating::RatingEntry;
use crate::sync::SequenceTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The (organization, team, meeting type) triple a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingKey {
    pub organization_id: String,
    pub team_id: String,
    pub meeting_type: String,
}

impl MeetingKey {
    pub fn new(
        organization_id: impl Into<String>,
        team_id: impl Into<String>,
        meeting_type: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            team_id: team_id.into(),
            meeting_type: meeting_type.into(),
        }
    }

    /// Meeting code, e.g. `org-team-weekly-accountability`.
    pub fn code(&self) -> String {
        format!(
            "{}-{}-{}",
            self.organization_id, self.team_id, self.meeting_type
        )
    }
}

/// Generate an opaque session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Full session state as sent to a new joiner and as stored for rehydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub meeting_key: MeetingKey,
    pub agenda: Agenda,
    pub clock: ClockEngine,
    pub participants: ParticipantRegistry,
    pub ratings: Vec<RatingEntry>,
    pub notes: BTreeMap<String, String>,
    pub sequences: SequenceTable,
    pub taken_at_ms: i64,
}
