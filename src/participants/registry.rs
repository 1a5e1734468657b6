use crate::error::SessionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Leader,
    Follower,
}

/// A connected meeting participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
    pub role: Role,
    pub joined_at_ms: i64,

    /// Whether the participant mirrors the leader's navigation
    pub following: bool,
}

/// Participants in join order plus the canonical leader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Participant>", into = "Vec<Participant>")]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant and return the role they hold.
    ///
    /// Joining an empty registry makes the joiner leader. Re-joining is a
    /// no-op that returns the role already held.
    pub fn join(&mut self, participant_id: &str, display_name: &str, joined_at_ms: i64) -> Role {
        if let Some(existing) = self.get(participant_id) {
            return existing.role;
        }

        let role = if self.participants.is_empty() {
            Role::Leader
        } else {
            Role::Follower
        };

        self.participants.push(Participant {
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            role,
            joined_at_ms,
            following: true,
        });

        role
    }

    /// Remove a participant.
    ///
    /// Returns `Some(new_leader_id)` when the departing participant was the
    /// leader and someone remains to be promoted.
    pub fn leave(&mut self, participant_id: &str) -> Option<String> {
        let index = self
            .participants
            .iter()
            .position(|p| p.participant_id == participant_id)?;

        let removed = self.participants.remove(index);
        if removed.role != Role::Leader {
            return None;
        }

        let next = self.participants.first_mut()?;
        next.role = Role::Leader;
        Some(next.participant_id.clone())
    }

    /// Make `participant_id` the leader. Returns `true` if leadership moved.
    pub fn set_leader(&mut self, participant_id: &str) -> Result<bool, SessionError> {
        if !self.contains(participant_id) {
            return Err(SessionError::UnknownParticipant(participant_id.to_string()));
        }
        if self.leader_id() == Some(participant_id) {
            return Ok(false);
        }

        for participant in &mut self.participants {
            participant.role = if participant.participant_id == participant_id {
                Role::Leader
            } else {
                Role::Follower
            };
        }
        Ok(true)
    }

    /// Explicit hand-off requested by a participant; always granted.
    pub fn claim_leadership(&mut self, participant_id: &str) -> Result<bool, SessionError> {
        self.set_leader(participant_id)
    }

    /// Returns `true` if the flag changed.
    pub fn set_following(&mut self, participant_id: &str, following: bool) -> Result<bool, SessionError> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.participant_id == participant_id)
            .ok_or_else(|| SessionError::UnknownParticipant(participant_id.to_string()))?;

        let changed = participant.following != following;
        participant.following = following;
        Ok(changed)
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.role == Role::Leader)
            .map(|p| p.participant_id.as_str())
    }

    pub fn is_leader(&self, participant_id: &str) -> bool {
        self.leader_id() == Some(participant_id)
    }

    pub fn get(&self, participant_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.get(participant_id).is_some()
    }

    pub fn display_name(&self, participant_id: &str) -> Option<&str> {
        self.get(participant_id).map(|p| p.display_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Enforce the single-leader invariant after loading foreign data:
    /// the first leader in join order wins, and an empty leader slot is
    /// filled by the earliest joiner.
    fn normalize(&mut self) {
        let mut seen_leader = false;
        for participant in &mut self.participants {
            if participant.role == Role::Leader {
                if seen_leader {
                    participant.role = Role::Follower;
                }
                seen_leader = true;
            }
        }
        if !seen_leader {
            if let Some(first) = self.participants.first_mut() {
                first.role = Role::Leader;
            }
        }
    }
}

impl From<Vec<Participant>> for ParticipantRegistry {
    fn from(participants: Vec<Participant>) -> Self {
        let mut registry = Self { participants };
        registry.normalize();
        registry
    }
}

impl From<ParticipantRegistry> for Vec<Participant> {
    fn from(registry: ParticipantRegistry) -> Self {
        registry.participants
    }
}
