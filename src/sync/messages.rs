use super::sequencer::Stamp;
use crate::clock::ClockEngine;
use crate::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages participants exchange to keep replicas converged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// Announces a joiner; the leader answers with a `StateSnapshot`
    #[serde(rename_all = "camelCase")]
    JoinRequest {
        participant_id: String,
        display_name: String,
        joined_at_ms: i64,
    },

    /// Asks the leader for a fresh snapshot without joining
    #[serde(rename_all = "camelCase")]
    SnapshotRequest { requester_id: String },

    /// Full session state; `recipient_id = None` addresses everyone
    #[serde(rename_all = "camelCase")]
    StateSnapshot {
        recipient_id: Option<String>,
        snapshot: Box<SessionSnapshot>,
    },

    // Clock transitions carry the leader's whole clock as of `at_ms`;
    // receivers adopt it when its revision is newer than their own.
    #[serde(rename_all = "camelCase")]
    SectionChanged {
        section_id: String,
        at_ms: i64,
        clock: ClockEngine,
    },

    #[serde(rename_all = "camelCase")]
    TimerUpdate {
        started_at_epoch_ms: Option<i64>,
        paused: bool,
        total_paused_ms: i64,
        at_ms: i64,
        clock: ClockEngine,
    },

    #[serde(rename_all = "camelCase")]
    RatingSubmitted {
        participant_id: String,
        rating: u8,
        at_ms: i64,
    },

    #[serde(rename_all = "camelCase")]
    LeadershipChanged { leader_id: String },

    #[serde(rename_all = "camelCase")]
    ParticipantLeft { participant_id: String },

    #[serde(rename_all = "camelCase")]
    FollowChanged {
        participant_id: String,
        following: bool,
    },

    #[serde(rename_all = "camelCase")]
    NotesUpdated { section_id: String, content: String },

    #[serde(rename_all = "camelCase")]
    MeetingConcluded { at_ms: i64, clock: ClockEngine },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinRequest,
    SnapshotRequest,
    StateSnapshot,
    SectionChanged,
    TimerUpdate,
    RatingSubmitted,
    LeadershipChanged,
    ParticipantLeft,
    FollowChanged,
    NotesUpdated,
    MeetingConcluded,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::JoinRequest => "join-request",
            MessageKind::SnapshotRequest => "snapshot-request",
            MessageKind::StateSnapshot => "state-snapshot",
            MessageKind::SectionChanged => "section-changed",
            MessageKind::TimerUpdate => "timer-update",
            MessageKind::RatingSubmitted => "rating-submitted",
            MessageKind::LeadershipChanged => "leadership-changed",
            MessageKind::ParticipantLeft => "participant-left",
            MessageKind::FollowChanged => "follow-changed",
            MessageKind::NotesUpdated => "notes-updated",
            MessageKind::MeetingConcluded => "meeting-concluded",
        };
        f.write_str(name)
    }
}

impl SyncMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::JoinRequest { .. } => MessageKind::JoinRequest,
            SyncMessage::SnapshotRequest { .. } => MessageKind::SnapshotRequest,
            SyncMessage::StateSnapshot { .. } => MessageKind::StateSnapshot,
            SyncMessage::SectionChanged { .. } => MessageKind::SectionChanged,
            SyncMessage::TimerUpdate { .. } => MessageKind::TimerUpdate,
            SyncMessage::RatingSubmitted { .. } => MessageKind::RatingSubmitted,
            SyncMessage::LeadershipChanged { .. } => MessageKind::LeadershipChanged,
            SyncMessage::ParticipantLeft { .. } => MessageKind::ParticipantLeft,
            SyncMessage::FollowChanged { .. } => MessageKind::FollowChanged,
            SyncMessage::NotesUpdated { .. } => MessageKind::NotesUpdated,
            SyncMessage::MeetingConcluded { .. } => MessageKind::MeetingConcluded,
        }
    }

    /// Sequencing stream this message is ordered on; `None` if unsequenced.
    ///
    /// Join and leave share a per-participant presence stream so a late
    /// join cannot resurrect someone who has already left.
    pub fn stream(&self) -> Option<String> {
        match self {
            SyncMessage::SnapshotRequest { .. } | SyncMessage::StateSnapshot { .. } => None,
            SyncMessage::JoinRequest { participant_id, .. }
            | SyncMessage::ParticipantLeft { participant_id } => {
                Some(format!("presence:{participant_id}"))
            }
            SyncMessage::RatingSubmitted { participant_id, .. } => {
                Some(format!("rating:{participant_id}"))
            }
            SyncMessage::FollowChanged { participant_id, .. } => {
                Some(format!("follow:{participant_id}"))
            }
            SyncMessage::NotesUpdated { section_id, .. } => Some(format!("notes:{section_id}")),
            SyncMessage::SectionChanged { .. } => Some("section".to_string()),
            SyncMessage::TimerUpdate { .. } => Some("timer".to_string()),
            SyncMessage::LeadershipChanged { .. } => Some("leader".to_string()),
            SyncMessage::MeetingConcluded { .. } => Some("conclude".to_string()),
        }
    }

    /// Transitions only the leader may originate.
    pub fn is_leader_only(&self) -> bool {
        matches!(
            self,
            SyncMessage::SectionChanged { .. }
                | SyncMessage::TimerUpdate { .. }
                | SyncMessage::MeetingConcluded { .. }
        )
    }

    /// Streams written by exactly one participant (the subject itself).
    pub fn is_participant_owned(&self) -> bool {
        matches!(
            self,
            SyncMessage::JoinRequest { .. }
                | SyncMessage::ParticipantLeft { .. }
                | SyncMessage::RatingSubmitted { .. }
                | SyncMessage::FollowChanged { .. }
        )
    }
}

/// A message stamped for delivery to one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    pub sender_id: String,
    /// Per-stream sequence number; 0 for unsequenced messages
    pub seq: u64,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn stamp(&self) -> Stamp {
        Stamp {
            seq: self.seq,
            sender_id: self.sender_id.clone(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let envelope = Envelope {
            session_id: "s-1".to_string(),
            sender_id: "alice".to_string(),
            seq: 4,
            message: SyncMessage::TimerUpdate {
                started_at_epoch_ms: Some(1_000),
                paused: true,
                total_paused_ms: 0,
                at_ms: 5_000,
                clock: ClockEngine::new(),
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"sessionId\":\"s-1\""));
        assert!(json.contains("\"type\":\"timer-update\""));
        assert!(json.contains("\"startedAtEpochMs\":1000"));
        assert!(json.contains("\"paused\":true"));
        assert!(json.contains("\"clock\":{"));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_parse_rating_message() {
        let json = r#"{
            "sessionId": "s-1",
            "senderId": "bob",
            "seq": 2,
            "message": {"type": "rating-submitted", "participantId": "bob", "rating": 9, "atMs": 10}
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind(), MessageKind::RatingSubmitted);
        assert_eq!(envelope.message.stream().as_deref(), Some("rating:bob"));
        assert!(envelope.message.is_participant_owned());
        assert!(!envelope.message.is_leader_only());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"sessionId":"s","senderId":"a","seq":1,"message":{"type":"navigate"}}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }

    #[test]
    fn test_presence_stream_shared() {
        let join = SyncMessage::JoinRequest {
            participant_id: "carol".to_string(),
            display_name: "Carol".to_string(),
            joined_at_ms: 0,
        };
        let leave = SyncMessage::ParticipantLeft {
            participant_id: "carol".to_string(),
        };
        assert_eq!(join.stream(), leave.stream());

        let snapshot_request = SyncMessage::SnapshotRequest {
            requester_id: "relay".to_string(),
        };
        assert_eq!(snapshot_request.stream(), None);
    }
}
