use super::config::SessionConfig;
use super::effects::{
    ApplyStatus, FinalizationPayload, IgnoreReason, IndividualRating, Origin, PersistenceRecord,
    SessionEffect, SessionEvent, TransitionKind,
};
use super::state::{MeetingKey, SessionSnapshot};
use super::stats::SessionStatus;
use crate::agenda::Agenda;
use crate::clock::{ClockEngine, Lifecycle, SectionTiming};
use crate::error::{Action, SessionError};
use crate::pace::{self, Pace};
use crate::participants::{ParticipantRegistry, Role};
use crate::rating::RatingAggregator;
use crate::sync::{Envelope, SequenceTable, Stamp, SyncMessage};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How the local participant enters a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// No active session exists: become leader and start the clock
    Create,
    /// Join an existing session as a follower; state comes from a snapshot
    Attach,
    /// Mirror an existing session without joining the registry
    Observe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Role),
    AwaitingSnapshot,
}

#[derive(Debug)]
enum SyncPhase {
    /// Constructed but not joined
    Idle,
    AwaitingSnapshot(Vec<Envelope>),
    Synced,
    /// The local participant left
    Detached,
}

/// Authoritative local replica of one meeting session.
///
/// Every operation is synchronous against in-memory state. Local actions
/// are applied optimistically and queue a `Broadcast` effect; received
/// messages go through [`apply`](Self::apply), which filters stale and
/// duplicate deliveries by per-stream sequence. The host drains side
/// effects with [`drain_effects`](Self::drain_effects).
#[derive(Debug)]
pub struct SessionStateMachine {
    session_id: String,
    meeting_key: MeetingKey,
    local_id: String,
    config: SessionConfig,
    agenda: Agenda,
    clock: ClockEngine,
    registry: ParticipantRegistry,
    ratings: RatingAggregator,
    notes: BTreeMap<String, String>,
    sequences: SequenceTable,
    phase: SyncPhase,
    resync_requested: bool,
    effects: Vec<SessionEffect>,
}

impl SessionStateMachine {
    pub fn new(
        session_id: impl Into<String>,
        meeting_key: MeetingKey,
        local_id: impl Into<String>,
        agenda: Agenda,
        config: SessionConfig,
    ) -> Self {
        let ratings = RatingAggregator::new(config.rating_timeout());
        Self {
            session_id: session_id.into(),
            meeting_key,
            local_id: local_id.into(),
            config,
            agenda,
            clock: ClockEngine::new(),
            registry: ParticipantRegistry::new(),
            ratings,
            notes: BTreeMap::new(),
            sequences: SequenceTable::new(),
            phase: SyncPhase::Idle,
            resync_requested: false,
            effects: Vec::new(),
        }
    }

    /// Rehydrate from a stored snapshot after a process restart.
    pub fn restore(snapshot: SessionSnapshot, local_id: impl Into<String>, config: SessionConfig) -> Self {
        let mut machine = Self::new(
            snapshot.session_id.clone(),
            snapshot.meeting_key.clone(),
            local_id,
            snapshot.agenda.clone(),
            config,
        );
        let taken_at_ms = snapshot.taken_at_ms;
        machine.adopt(snapshot, taken_at_ms);
        machine.phase = SyncPhase::Synced;
        info!(
            "Restored session {} ({}, {} participants)",
            machine.session_id,
            machine.clock.lifecycle(),
            machine.registry.len()
        );
        machine
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    pub fn join(&mut self, mode: JoinMode, display_name: &str, now: i64) -> Result<JoinOutcome, SessionError> {
        self.ensure_open()
            .inspect_err(|e| warn!("Rejected {}: {}", Action::Join, e))?;

        if let Some(existing) = self.registry.get(&self.local_id) {
            return Ok(JoinOutcome::Joined(existing.role));
        }

        match mode {
            JoinMode::Create => {
                let role = self.registry.join(&self.local_id, display_name, now);
                self.phase = SyncPhase::Synced;
                info!(
                    "{} joined session {} as {:?}",
                    self.local_id, self.session_id, role
                );

                self.originate(
                    SyncMessage::JoinRequest {
                        participant_id: self.local_id.clone(),
                        display_name: display_name.to_string(),
                        joined_at_ms: now,
                    },
                    now,
                );
                self.notify(SessionEvent::ParticipantJoined {
                    participant_id: self.local_id.clone(),
                    role,
                });

                if role == Role::Leader && self.clock.lifecycle() == Lifecycle::NotStarted {
                    self.start(now)?;
                }
                Ok(JoinOutcome::Joined(role))
            }
            JoinMode::Attach => {
                self.phase = SyncPhase::AwaitingSnapshot(Vec::new());
                info!(
                    "{} attaching to session {}, awaiting snapshot",
                    self.local_id, self.session_id
                );
                self.originate(
                    SyncMessage::JoinRequest {
                        participant_id: self.local_id.clone(),
                        display_name: display_name.to_string(),
                        joined_at_ms: now,
                    },
                    now,
                );
                Ok(JoinOutcome::AwaitingSnapshot)
            }
            JoinMode::Observe => {
                self.phase = SyncPhase::AwaitingSnapshot(Vec::new());
                info!("{} observing session {}", self.local_id, self.session_id);
                self.request_snapshot(now);
                Ok(JoinOutcome::AwaitingSnapshot)
            }
        }
    }

    /// Start the clock at the first agenda section.
    ///
    /// [`JoinMode::Create`] already does this for the first joiner.
    pub fn start(&mut self, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::Start)?;
        let first = self.agenda.first().clone();
        self.clock.start(now, &first)?;
        self.clock.revise(&self.local_id);
        info!(
            "Session {} started at section {}",
            self.session_id, first.id
        );

        self.originate(self.timer_message(now), now);
        self.record(
            TransitionKind::Start,
            Origin::Local,
            now,
            json!({ "sectionId": first.id }),
        );
        self.notify(SessionEvent::Started {
            leader_id: self.registry.leader_id().map(str::to_string),
        });
        Ok(())
    }

    pub fn change_section(&mut self, section_id: &str, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::ChangeSection)?;
        self.ensure_lifecycle(Action::ChangeSection, &[Lifecycle::Active])?;

        let section = self
            .agenda
            .resolve(section_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSection(section_id.to_string()))?;

        let from = self.clock.current_section().map(str::to_string);
        if !self.clock.enter_section(&section, now) {
            debug!("Already in section {}", section.id);
            return Ok(());
        }
        self.clock.revise(&self.local_id);

        info!(
            "Section changed in {}: {} -> {}",
            self.session_id,
            from.as_deref().unwrap_or("-"),
            section.id
        );
        self.originate(
            SyncMessage::SectionChanged {
                section_id: section.id.clone(),
                at_ms: now,
                clock: self.clock.clone(),
            },
            now,
        );
        self.record(
            TransitionKind::ChangeSection,
            Origin::Local,
            now,
            json!({ "from": from, "to": section.id }),
        );
        self.notify(SessionEvent::SectionChanged {
            from,
            to: section.id,
        });
        Ok(())
    }

    pub fn pause(&mut self, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::Pause)?;
        self.clock.pause(now).inspect_err(|e| warn!("Rejected pause: {}", e))?;
        self.clock.revise(&self.local_id);

        info!("Session {} paused", self.session_id);
        self.originate(self.timer_message(now), now);
        self.record(TransitionKind::Pause, Origin::Local, now, json!({}));
        self.notify(SessionEvent::Paused { at_ms: now });
        Ok(())
    }

    pub fn resume(&mut self, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::Resume)?;
        self.clock.resume(now).inspect_err(|e| warn!("Rejected resume: {}", e))?;
        self.clock.revise(&self.local_id);

        let total_paused_ms = self.clock.total_paused_ms();
        info!(
            "Session {} resumed (paused {}ms total)",
            self.session_id, total_paused_ms
        );
        self.originate(self.timer_message(now), now);
        self.record(
            TransitionKind::Resume,
            Origin::Local,
            now,
            json!({ "totalPausedMs": total_paused_ms }),
        );
        self.notify(SessionEvent::Resumed {
            at_ms: now,
            total_paused_ms,
        });
        Ok(())
    }

    /// Conclude the meeting. Irreversible.
    ///
    /// Partial ratings are always accepted; the rating timeout is advisory.
    pub fn conclude(&mut self, cascade_message: Option<String>, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::Conclude)?;
        self.clock
            .conclude(now)
            .inspect_err(|e| warn!("Rejected conclude: {}", e))?;
        self.clock.revise(&self.local_id);

        let payload = self.finalization(cascade_message, now);
        info!(
            "Session {} concluded after {} minutes (average rating {:?})",
            self.session_id, payload.duration_minutes, payload.average_rating
        );

        self.originate(
            SyncMessage::MeetingConcluded {
                at_ms: now,
                clock: self.clock.clone(),
            },
            now,
        );
        self.record(
            TransitionKind::Conclude,
            Origin::Local,
            now,
            json!({
                "durationSeconds": payload.duration_seconds,
                "averageRating": payload.average_rating,
            }),
        );
        self.effects.push(SessionEffect::Finalize(payload));
        self.notify(SessionEvent::Concluded { at_ms: now });
        Ok(())
    }

    pub fn submit_rating(&mut self, rating: i64, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::SubmitRating)?;

        let changed = self
            .ratings
            .submit(&self.local_id, rating, now)
            .inspect_err(|e| warn!("Rejected rating from {}: {}", self.local_id, e))?;
        if !changed {
            return Ok(());
        }

        let rating = rating as u8;
        self.originate(
            SyncMessage::RatingSubmitted {
                participant_id: self.local_id.clone(),
                rating,
                at_ms: now,
            },
            now,
        );
        self.notify_rating(self.local_id.clone(), rating);
        Ok(())
    }

    pub fn claim_leadership(&mut self, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::ClaimLeadership)?;

        if self.registry.claim_leadership(&self.local_id)? {
            info!("{} claimed leadership of {}", self.local_id, self.session_id);
            self.originate(
                SyncMessage::LeadershipChanged {
                    leader_id: self.local_id.clone(),
                },
                now,
            );
            self.notify(SessionEvent::LeadershipChanged {
                leader_id: self.local_id.clone(),
                local_is_leader: true,
            });
        }
        Ok(())
    }

    /// Leave the session. A departing leader hands off to the next joiner.
    pub fn leave(&mut self, now: i64) -> Result<(), SessionError> {
        let awaiting = matches!(self.phase, SyncPhase::AwaitingSnapshot(_));
        if !awaiting && !self.registry.contains(&self.local_id) {
            warn!("Rejected {}: {} has not joined", Action::Leave, self.local_id);
            return Err(SessionError::NotJoined(self.local_id.clone()));
        }

        let promoted = self.registry.leave(&self.local_id);
        info!("{} left session {}", self.local_id, self.session_id);

        self.originate(
            SyncMessage::ParticipantLeft {
                participant_id: self.local_id.clone(),
            },
            now,
        );
        self.notify(SessionEvent::ParticipantLeft {
            participant_id: self.local_id.clone(),
        });

        if let Some(next) = promoted {
            info!("Leadership of {} passes to {}", self.session_id, next);
            self.originate(
                SyncMessage::LeadershipChanged {
                    leader_id: next.clone(),
                },
                now,
            );
            self.notify(SessionEvent::LeadershipChanged {
                leader_id: next,
                local_is_leader: false,
            });
        }
        if self.registry.is_empty() {
            self.notify(SessionEvent::TeardownEligible);
        }

        self.phase = SyncPhase::Detached;
        Ok(())
    }

    pub fn update_notes(&mut self, section_id: &str, content: &str, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::UpdateNotes)?;

        let section_id = self
            .agenda
            .resolve(section_id)
            .map(|s| s.id.clone())
            .ok_or_else(|| SessionError::UnknownSection(section_id.to_string()))?;

        if self.notes.get(&section_id).map(String::as_str) == Some(content) {
            return Ok(());
        }
        self.notes.insert(section_id.clone(), content.to_string());

        self.originate(
            SyncMessage::NotesUpdated {
                section_id: section_id.clone(),
                content: content.to_string(),
            },
            now,
        );
        self.notify(SessionEvent::NotesUpdated { section_id });
        Ok(())
    }

    pub fn set_following(&mut self, following: bool, now: i64) -> Result<(), SessionError> {
        self.authorize(Action::ToggleFollow)?;

        if self.registry.set_following(&self.local_id, following)? {
            self.originate(
                SyncMessage::FollowChanged {
                    participant_id: self.local_id.clone(),
                    following,
                },
                now,
            );
            self.notify(SessionEvent::FollowChanged {
                participant_id: self.local_id.clone(),
                following,
            });
        }
        Ok(())
    }

    /// Host-driven tick. Raises the rating-timeout advisory on the leader.
    ///
    /// Returns `true` when the advisory fired on this tick.
    pub fn tick(&mut self, now: i64) -> bool {
        if !self.is_leader() || self.clock.lifecycle() == Lifecycle::Concluded {
            return false;
        }

        let complete = self.ratings_complete();
        if !self.ratings.check_timeout(complete, now) {
            return false;
        }

        let submitted = self.ratings.len();
        let expected = self.registry.len();
        warn!(
            "Rating timeout in {}: {}/{} participants rated",
            self.session_id, submitted, expected
        );
        self.notify(SessionEvent::RatingTimeoutReached {
            submitted,
            expected,
        });
        true
    }

    // ------------------------------------------------------------------
    // Remote application
    // ------------------------------------------------------------------

    /// Apply a message received from a peer.
    pub fn apply(&mut self, envelope: Envelope, now: i64) -> ApplyStatus {
        if envelope.session_id != self.session_id {
            return ApplyStatus::Ignored(IgnoreReason::WrongSession);
        }
        if matches!(self.phase, SyncPhase::Detached) {
            return ApplyStatus::Ignored(IgnoreReason::Detached);
        }
        if self.clock.lifecycle() == Lifecycle::Concluded {
            warn!(
                "Stale-message anomaly: {} from {} after session {} concluded",
                envelope.kind(),
                envelope.sender_id,
                self.session_id
            );
            return ApplyStatus::Ignored(IgnoreReason::Concluded);
        }

        match envelope.message {
            SyncMessage::StateSnapshot {
                recipient_id,
                snapshot,
            } => {
                return self.apply_snapshot(&envelope.sender_id, recipient_id, *snapshot, now);
            }
            SyncMessage::SnapshotRequest { requester_id } => {
                if self.is_leader() && requester_id != self.local_id {
                    debug!("Answering snapshot request from {}", requester_id);
                    self.send_snapshot(Some(requester_id), now);
                }
                return ApplyStatus::Unchanged;
            }
            _ => {}
        }

        if let SyncPhase::AwaitingSnapshot(buffer) = &mut self.phase {
            if buffer.len() >= self.config.snapshot_buffer_limit {
                warn!(
                    "Snapshot buffer full for {}, dropping oldest message",
                    self.session_id
                );
                buffer.remove(0);
            }
            buffer.push(envelope);
            return ApplyStatus::Buffered;
        }

        self.apply_sequenced(envelope, now)
    }

    fn apply_sequenced(&mut self, envelope: Envelope, now: i64) -> ApplyStatus {
        let Some(stream) = envelope.message.stream() else {
            return ApplyStatus::Unchanged;
        };

        let stamp = envelope.stamp();
        if self.sequences.is_stale(&stream, &stamp) {
            debug!(
                "Dropping stale {} (seq {}) from {}",
                envelope.kind(),
                envelope.seq,
                envelope.sender_id
            );
            return ApplyStatus::Stale;
        }
        self.sequences.record(stream, stamp);

        if envelope.message.is_leader_only() && !self.registry.is_leader(&envelope.sender_id) {
            self.desync(
                format!(
                    "{} from {} who is not the known leader ({:?})",
                    envelope.kind(),
                    envelope.sender_id,
                    self.registry.leader_id()
                ),
                now,
            );
        }

        match envelope.message {
            SyncMessage::JoinRequest {
                participant_id,
                display_name,
                joined_at_ms,
            } => self.on_join(participant_id, &display_name, joined_at_ms, now),
            SyncMessage::SectionChanged {
                section_id,
                at_ms,
                clock,
            } => {
                if !self.agenda.contains(&section_id) {
                    warn!("Ignoring change to unknown section {}", section_id);
                    return ApplyStatus::Ignored(IgnoreReason::Invalid(format!(
                        "unknown section: {section_id}"
                    )));
                }
                self.adopt_clock(clock, at_ms)
            }
            SyncMessage::TimerUpdate { at_ms, clock, .. } => self.adopt_clock(clock, at_ms),
            SyncMessage::RatingSubmitted {
                participant_id,
                rating,
                at_ms,
            } => match self.ratings.receive(&participant_id, rating as i64, at_ms, now) {
                Ok(true) => {
                    self.notify_rating(participant_id, rating);
                    ApplyStatus::Applied
                }
                Ok(false) => ApplyStatus::Unchanged,
                Err(e) => {
                    warn!("Ignoring rating from {}: {}", participant_id, e);
                    ApplyStatus::Ignored(IgnoreReason::Invalid(e.to_string()))
                }
            },
            SyncMessage::LeadershipChanged { leader_id } => self.on_leadership_changed(leader_id, now),
            SyncMessage::ParticipantLeft { participant_id } => self.on_participant_left(participant_id),
            SyncMessage::FollowChanged {
                participant_id,
                following,
            } => match self.registry.set_following(&participant_id, following) {
                Ok(true) => {
                    self.notify(SessionEvent::FollowChanged {
                        participant_id,
                        following,
                    });
                    ApplyStatus::Applied
                }
                Ok(false) => ApplyStatus::Unchanged,
                Err(e) => ApplyStatus::Ignored(IgnoreReason::Invalid(e.to_string())),
            },
            SyncMessage::NotesUpdated {
                section_id,
                content,
            } => {
                if !self.agenda.contains(&section_id) {
                    return ApplyStatus::Ignored(IgnoreReason::Invalid(format!(
                        "unknown section: {section_id}"
                    )));
                }
                if self.notes.get(&section_id) == Some(&content) {
                    return ApplyStatus::Unchanged;
                }
                self.notes.insert(section_id.clone(), content);
                self.notify(SessionEvent::NotesUpdated { section_id });
                ApplyStatus::Applied
            }
            SyncMessage::MeetingConcluded { at_ms, clock } => {
                if clock.lifecycle() != Lifecycle::Concluded {
                    self.desync(
                        format!("conclusion from {} with a {} clock", envelope.sender_id, clock.lifecycle()),
                        now,
                    );
                    return ApplyStatus::Ignored(IgnoreReason::Invalid(
                        "conclusion without a concluded clock".to_string(),
                    ));
                }
                info!("Session {} concluded by {}", self.session_id, envelope.sender_id);
                self.adopt_clock(clock, at_ms)
            }
            SyncMessage::SnapshotRequest { .. } | SyncMessage::StateSnapshot { .. } => {
                ApplyStatus::Unchanged
            }
        }
    }

    fn on_join(&mut self, participant_id: String, display_name: &str, joined_at_ms: i64, now: i64) -> ApplyStatus {
        let known = self.registry.contains(&participant_id);
        let role = self.registry.join(&participant_id, display_name, joined_at_ms);

        // Answer even a repeated join: the joiner may have missed the first reply
        if self.is_leader() && participant_id != self.local_id {
            self.send_snapshot(Some(participant_id.clone()), now);
        }

        if known {
            return ApplyStatus::Unchanged;
        }
        info!(
            "{} joined session {} as {:?}",
            participant_id, self.session_id, role
        );
        self.notify(SessionEvent::ParticipantJoined {
            participant_id,
            role,
        });
        ApplyStatus::Applied
    }

    /// Take over a clock from the leader if it is later than ours, then
    /// report the transitions between the two states.
    ///
    /// A conclusion is always taken: it is terminal and ends any race.
    fn adopt_clock(&mut self, incoming: ClockEngine, at_ms: i64) -> ApplyStatus {
        let concluding = incoming.lifecycle() == Lifecycle::Concluded;
        if !concluding && !incoming.supersedes(&self.clock) {
            debug!(
                "Keeping clock revision {} over {}",
                self.clock.revision(),
                incoming.revision()
            );
            return ApplyStatus::Unchanged;
        }
        if let Some(section_id) = incoming.current_section() {
            if !self.agenda.contains(section_id) {
                warn!("Ignoring clock in unknown section {}", section_id);
                return ApplyStatus::Ignored(IgnoreReason::Invalid(format!(
                    "unknown section: {section_id}"
                )));
            }
        }

        let previous = std::mem::replace(&mut self.clock, incoming);
        let before = previous.lifecycle();
        let after = self.clock.lifecycle();

        if before == Lifecycle::NotStarted && after != Lifecycle::NotStarted {
            let started_at = self.clock.started_at_ms().unwrap_or(at_ms);
            self.record(TransitionKind::Start, Origin::Remote, started_at, json!({}));
            self.notify(SessionEvent::Started {
                leader_id: self.registry.leader_id().map(str::to_string),
            });
        }

        let from = previous.current_section().map(str::to_string);
        if let Some(to) = self.clock.current_section().map(str::to_string) {
            if from.is_some() && from.as_deref() != Some(to.as_str()) {
                self.record(
                    TransitionKind::ChangeSection,
                    Origin::Remote,
                    at_ms,
                    json!({ "from": from, "to": to }),
                );
                self.notify(SessionEvent::SectionChanged { from, to });
            }
        }

        match (before, after) {
            (Lifecycle::NotStarted | Lifecycle::Active, Lifecycle::Paused) => {
                let paused_at = self.clock.paused_at_ms().unwrap_or(at_ms);
                self.record(TransitionKind::Pause, Origin::Remote, paused_at, json!({}));
                self.notify(SessionEvent::Paused { at_ms: paused_at });
            }
            (Lifecycle::Paused, Lifecycle::Active) => {
                let total_paused_ms = self.clock.total_paused_ms();
                self.record(
                    TransitionKind::Resume,
                    Origin::Remote,
                    at_ms,
                    json!({ "totalPausedMs": total_paused_ms }),
                );
                self.notify(SessionEvent::Resumed {
                    at_ms,
                    total_paused_ms,
                });
            }
            (_, Lifecycle::Concluded) if before != Lifecycle::Concluded => {
                self.record(TransitionKind::Conclude, Origin::Remote, at_ms, json!({}));
                self.notify(SessionEvent::Concluded { at_ms });
            }
            _ => {}
        }

        ApplyStatus::Applied
    }

    fn on_leadership_changed(&mut self, leader_id: String, now: i64) -> ApplyStatus {
        match self.registry.set_leader(&leader_id) {
            Ok(true) => {
                let local_is_leader = leader_id == self.local_id;
                info!(
                    "Leadership of {} changed to {}{}",
                    self.session_id,
                    leader_id,
                    if local_is_leader { " (local)" } else { "" }
                );
                self.notify(SessionEvent::LeadershipChanged {
                    leader_id,
                    local_is_leader,
                });
                ApplyStatus::Applied
            }
            Ok(false) => ApplyStatus::Unchanged,
            Err(e) => {
                self.desync(format!("leadership change to {leader_id}: {e}"), now);
                ApplyStatus::Ignored(IgnoreReason::Invalid(e.to_string()))
            }
        }
    }

    fn on_participant_left(&mut self, participant_id: String) -> ApplyStatus {
        if !self.registry.contains(&participant_id) {
            return ApplyStatus::Unchanged;
        }

        let promoted = self.registry.leave(&participant_id);
        info!("{} left session {}", participant_id, self.session_id);
        self.notify(SessionEvent::ParticipantLeft { participant_id });

        if let Some(next) = promoted {
            let local_is_leader = next == self.local_id;
            info!("Leadership of {} passes to {}", self.session_id, next);
            self.notify(SessionEvent::LeadershipChanged {
                leader_id: next,
                local_is_leader,
            });
        }
        if self.registry.is_empty() {
            self.notify(SessionEvent::TeardownEligible);
        }
        ApplyStatus::Applied
    }

    fn apply_snapshot(
        &mut self,
        sender_id: &str,
        recipient_id: Option<String>,
        snapshot: SessionSnapshot,
        now: i64,
    ) -> ApplyStatus {
        if sender_id == self.local_id {
            return ApplyStatus::Unchanged;
        }
        if recipient_id.as_deref().is_some_and(|r| r != self.local_id) {
            return ApplyStatus::Ignored(IgnoreReason::NotAddressed);
        }
        if snapshot.session_id != self.session_id {
            return ApplyStatus::Ignored(IgnoreReason::WrongSession);
        }

        let buffered = match std::mem::replace(&mut self.phase, SyncPhase::Synced) {
            SyncPhase::AwaitingSnapshot(buffered) => buffered,
            _ => Vec::new(),
        };

        self.adopt(snapshot, now);
        self.resync_requested = false;
        info!(
            "Applied snapshot for {} from {} ({}, section {}, {} participants)",
            self.session_id,
            sender_id,
            self.clock.lifecycle(),
            self.current_section_id(),
            self.registry.len()
        );
        self.notify(SessionEvent::Synchronized);

        for envelope in buffered {
            self.apply(envelope, now);
        }
        ApplyStatus::Applied
    }

    /// Replace local state with `snapshot`, received at `now`. A clock we
    /// already hold at a later revision is kept.
    fn adopt(&mut self, snapshot: SessionSnapshot, now: i64) {
        self.meeting_key = snapshot.meeting_key;
        self.agenda = snapshot.agenda;
        if !self.clock.supersedes(&snapshot.clock) {
            self.clock = snapshot.clock;
        }
        self.registry = snapshot.participants;
        // A resync must not restart a rating window we already opened
        let window_opened = self.ratings.window_opened_at_ms().unwrap_or(now);
        self.ratings = RatingAggregator::from_entries(
            snapshot.ratings,
            self.config.rating_timeout(),
            window_opened,
        );
        self.notes = snapshot.notes;
        self.sequences = snapshot.sequences;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn snapshot(&self, now: i64) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            meeting_key: self.meeting_key.clone(),
            agenda: self.agenda.clone(),
            clock: self.clock.clone(),
            participants: self.registry.clone(),
            ratings: self.ratings.entries().cloned().collect(),
            notes: self.notes.clone(),
            sequences: self.sequences.clone(),
            taken_at_ms: now,
        }
    }

    pub fn status(&self, now: i64) -> SessionStatus {
        let current = self.current_section_id().to_string();
        SessionStatus {
            session_id: self.session_id.clone(),
            meeting_code: self.meeting_key.code(),
            lifecycle: self.clock.lifecycle(),
            started_at: self
                .clock
                .started_at_ms()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            active_elapsed_secs: self.active_elapsed_seconds(now),
            section_elapsed_secs: self.section_elapsed_seconds(&current, now),
            pace: self.pace(now),
            current_section_id: current,
            leader_id: self.leader_id().map(str::to_string),
            participant_count: self.registry.len(),
            ratings_count: self.ratings.len(),
            average_rating: self.ratings.average(),
            ratings_complete: self.ratings_complete(),
            synchronized: self.is_synchronized(),
        }
    }

    /// Drain side effects queued since the last call.
    pub fn drain_effects(&mut self) -> Vec<SessionEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn meeting_key(&self) -> &MeetingKey {
        &self.meeting_key
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn clock(&self) -> &ClockEngine {
        &self.clock
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.clock.lifecycle()
    }

    /// Current section; the first agenda section before the meeting starts.
    pub fn current_section_id(&self) -> &str {
        self.clock
            .current_section()
            .unwrap_or(self.agenda.first().id.as_str())
    }

    pub fn active_elapsed_seconds(&self, now: i64) -> u64 {
        self.clock.active_elapsed_seconds(now)
    }

    pub fn section_elapsed_seconds(&self, section_id: &str, now: i64) -> u64 {
        self.clock.section_elapsed_seconds(section_id, now)
    }

    pub fn section_timings(&self) -> &[SectionTiming] {
        self.clock.sections()
    }

    pub fn pace(&self, now: i64) -> Pace {
        pace::evaluate(
            &self.agenda,
            self.current_section_id(),
            self.active_elapsed_seconds(now),
        )
    }

    pub fn participants(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.registry.leader_id()
    }

    /// Whether the local participant currently leads.
    pub fn is_leader(&self) -> bool {
        self.registry.is_leader(&self.local_id)
    }

    pub fn ratings(&self) -> &RatingAggregator {
        &self.ratings
    }

    pub fn rating_average(&self) -> Option<f64> {
        self.ratings.average()
    }

    /// Every present participant has rated. Reads the live registry, since
    /// participants can leave mid-rating.
    pub fn ratings_complete(&self) -> bool {
        self.ratings
            .is_complete_for(self.registry.iter().map(|p| p.participant_id.as_str()))
    }

    pub fn notes(&self) -> &BTreeMap<String, String> {
        &self.notes
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self.phase, SyncPhase::Synced)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.clock.lifecycle() == Lifecycle::Concluded {
            return Err(SessionError::Concluded(self.session_id.clone()));
        }
        Ok(())
    }

    /// Reject `action` unless the local participant is a synchronized member,
    /// and the leader when the action requires it.
    fn authorize(&self, action: Action) -> Result<(), SessionError> {
        self.ensure_open()?;
        if matches!(self.phase, SyncPhase::AwaitingSnapshot(_)) {
            return Err(SessionError::AwaitingSnapshot);
        }
        if !self.registry.contains(&self.local_id) {
            warn!("Rejected {}: {} has not joined", action, self.local_id);
            return Err(SessionError::NotJoined(self.local_id.clone()));
        }
        if action.is_leader_only() && !self.is_leader() {
            warn!("Rejected {}: {} is not the leader", action, self.local_id);
            return Err(SessionError::NotLeader {
                participant_id: self.local_id.clone(),
                action,
            });
        }
        Ok(())
    }

    fn ensure_lifecycle(&self, action: Action, allowed: &[Lifecycle]) -> Result<(), SessionError> {
        let lifecycle = self.clock.lifecycle();
        if allowed.contains(&lifecycle) {
            return Ok(());
        }
        warn!("Rejected {} while {}", action, lifecycle);
        Err(SessionError::InvalidTransition { action, lifecycle })
    }

    fn timer_message(&self, now: i64) -> SyncMessage {
        SyncMessage::TimerUpdate {
            started_at_epoch_ms: self.clock.started_at_ms(),
            paused: self.clock.lifecycle() == Lifecycle::Paused,
            total_paused_ms: self.clock.total_paused_ms(),
            at_ms: now,
            clock: self.clock.clone(),
        }
    }

    /// Stamp and queue a message originated by this replica.
    ///
    /// Streams owned by a single participant are seeded from that
    /// participant's own clock, so a restarted client still outranks the
    /// messages it sent before the restart.
    fn originate(&mut self, message: SyncMessage, now: i64) {
        let seq = match message.stream() {
            Some(stream) => {
                let mut seq = self.sequences.next_seq(&stream);
                if message.is_participant_owned() {
                    seq = seq.max(now.max(0) as u64);
                }
                self.sequences.record(
                    stream,
                    Stamp {
                        seq,
                        sender_id: self.local_id.clone(),
                    },
                );
                seq
            }
            None => 0,
        };

        self.effects.push(SessionEffect::Broadcast(Envelope {
            session_id: self.session_id.clone(),
            sender_id: self.local_id.clone(),
            seq,
            message,
        }));
    }

    fn send_snapshot(&mut self, recipient_id: Option<String>, now: i64) {
        let snapshot = self.snapshot(now);
        self.originate(
            SyncMessage::StateSnapshot {
                recipient_id,
                snapshot: Box::new(snapshot),
            },
            now,
        );
    }

    fn request_snapshot(&mut self, now: i64) {
        self.resync_requested = true;
        self.originate(
            SyncMessage::SnapshotRequest {
                requester_id: self.local_id.clone(),
            },
            now,
        );
    }

    /// Log a desync anomaly and, on a non-leader, ask for a fresh snapshot.
    fn desync(&mut self, reason: String, now: i64) {
        warn!("Desync anomaly in {}: {}", self.session_id, reason);
        self.notify(SessionEvent::DesyncDetected { reason });
        if !self.is_leader() && !self.resync_requested {
            self.request_snapshot(now);
        }
    }

    fn notify_rating(&mut self, participant_id: String, rating: u8) {
        let average = self.ratings.average();
        let complete = self.ratings_complete();
        debug!(
            "Rating {} from {} (average {:?}, complete {})",
            rating, participant_id, average, complete
        );
        self.notify(SessionEvent::RatingSubmitted {
            participant_id,
            rating,
            average,
            complete,
        });
    }

    fn notify(&mut self, event: SessionEvent) {
        self.effects.push(SessionEffect::Notify(event));
    }

    fn record(&mut self, event: TransitionKind, origin: Origin, at_ms: i64, payload: serde_json::Value) {
        self.effects.push(SessionEffect::Persist(PersistenceRecord {
            session_id: self.session_id.clone(),
            event,
            timestamp: DateTime::<Utc>::from_timestamp_millis(at_ms).unwrap_or_default(),
            origin,
            payload,
        }));
    }

    fn finalization(&self, cascade_message: Option<String>, now: i64) -> FinalizationPayload {
        let duration_seconds = self.clock.active_elapsed_seconds(now);
        FinalizationPayload {
            session_id: self.session_id.clone(),
            meeting_code: self.meeting_key.code(),
            // Nearest whole minute
            duration_minutes: (duration_seconds + 30) / 60,
            duration_seconds,
            average_rating: self.ratings.average(),
            individual_ratings: self
                .ratings
                .entries()
                .map(|entry| IndividualRating {
                    participant_id: entry.participant_id.clone(),
                    display_name: self
                        .registry
                        .display_name(&entry.participant_id)
                        .map(str::to_string),
                    rating: entry.rating,
                })
                .collect(),
            cascade_message,
            sections: self.clock.sections().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const SECOND: i64 = 1_000;

    fn machine(local_id: &str) -> SessionStateMachine {
        SessionStateMachine::new(
            "s-1",
            MeetingKey::new("org", "team", "weekly"),
            local_id,
            Agenda::weekly(),
            SessionConfig::default(),
        )
    }

    fn broadcasts(machine: &mut SessionStateMachine) -> Vec<Envelope> {
        machine
            .drain_effects()
            .into_iter()
            .filter_map(|effect| match effect {
                SessionEffect::Broadcast(envelope) => Some(envelope),
                _ => None,
            })
            .collect()
    }

    /// Deliver every pending broadcast to every other machine until quiet.
    fn exchange(machines: &mut [&mut SessionStateMachine], now: i64) {
        for _ in 0..10 {
            let outgoing: Vec<Vec<Envelope>> = machines.iter_mut().map(|m| broadcasts(m)).collect();
            if outgoing.iter().all(Vec::is_empty) {
                return;
            }
            for (from, envelopes) in outgoing.into_iter().enumerate() {
                for envelope in envelopes {
                    for (to, machine) in machines.iter_mut().enumerate() {
                        if to != from {
                            machine.apply(envelope.clone(), now);
                        }
                    }
                }
            }
        }
    }

    /// Leader `alice` plus followers, all synchronized.
    fn meeting(followers: &[&str]) -> (SessionStateMachine, Vec<SessionStateMachine>) {
        let mut leader = machine("alice");
        leader.join(JoinMode::Create, "Alice", T0).unwrap();

        let mut others: Vec<SessionStateMachine> = Vec::new();
        for (i, id) in followers.iter().enumerate() {
            let now = T0 + (i as i64 + 1) * SECOND;
            let mut follower = machine(id);
            assert_eq!(
                follower.join(JoinMode::Attach, id, now).unwrap(),
                JoinOutcome::AwaitingSnapshot
            );
            others.push(follower);

            let mut all: Vec<&mut SessionStateMachine> = vec![&mut leader];
            all.extend(others.iter_mut());
            exchange(&mut all, now);
        }
        (leader, others)
    }

    #[test]
    fn test_create_starts_clock_as_leader() {
        let mut m = machine("alice");
        let outcome = m.join(JoinMode::Create, "Alice", T0).unwrap();

        assert_eq!(outcome, JoinOutcome::Joined(Role::Leader));
        assert_eq!(m.lifecycle(), Lifecycle::Active);
        assert_eq!(m.current_section_id(), "good-news");
        assert!(m.is_leader());
        assert!(m.is_synchronized());

        let effects = m.drain_effects();
        assert!(effects.iter().any(|e| matches!(
            e,
            SessionEffect::Persist(PersistenceRecord {
                event: TransitionKind::Start,
                origin: Origin::Local,
                ..
            })
        )));
        assert!(effects.iter().any(|e| matches!(
            e,
            SessionEffect::Notify(SessionEvent::Started { leader_id: Some(id) }) if id == "alice"
        )));
    }

    #[test]
    fn test_attach_receives_snapshot() {
        let (leader, followers) = meeting(&["bob"]);
        let bob = &followers[0];

        assert!(bob.is_synchronized());
        assert!(!bob.is_leader());
        assert_eq!(bob.leader_id(), Some("alice"));
        assert_eq!(bob.lifecycle(), Lifecycle::Active);
        assert_eq!(bob.participants().len(), 2);
        assert_eq!(
            bob.active_elapsed_seconds(T0 + 30 * SECOND),
            leader.active_elapsed_seconds(T0 + 30 * SECOND)
        );
    }

    #[test]
    fn test_actions_rejected_while_awaiting_snapshot() {
        let mut bob = machine("bob");
        bob.join(JoinMode::Attach, "Bob", T0).unwrap();

        assert_eq!(bob.submit_rating(7, T0), Err(SessionError::AwaitingSnapshot));
        assert!(!bob.is_synchronized());
    }

    #[test]
    fn test_incremental_messages_buffered_until_snapshot() {
        let mut alice = machine("alice");
        alice.join(JoinMode::Create, "Alice", T0).unwrap();
        broadcasts(&mut alice);

        let mut bob = machine("bob");
        bob.join(JoinMode::Attach, "Bob", T0 + SECOND).unwrap();
        let join = broadcasts(&mut bob);

        alice.change_section("scorecard", T0 + 60 * SECOND).unwrap();
        let change = broadcasts(&mut alice);
        assert_eq!(bob.apply(change[0].clone(), T0 + 60 * SECOND), ApplyStatus::Buffered);

        // Snapshot predates the section change
        for envelope in join {
            alice.apply(envelope, T0 + 61 * SECOND);
        }
        let mut reply = broadcasts(&mut alice);
        if let SyncMessage::StateSnapshot { snapshot, .. } = &mut reply[0].message {
            snapshot.clock = ClockEngine::new();
            snapshot.clock.start(T0, Agenda::weekly().first()).unwrap();
            snapshot.sequences = SequenceTable::new();
        }

        assert_eq!(bob.apply(reply.remove(0), T0 + 61 * SECOND), ApplyStatus::Applied);
        assert_eq!(bob.current_section_id(), "scorecard");
    }

    #[test]
    fn test_snapshot_buffer_drops_oldest() {
        let config = SessionConfig {
            snapshot_buffer_limit: 2,
            ..SessionConfig::default()
        };
        let mut bob = SessionStateMachine::new(
            "s-1",
            MeetingKey::new("org", "team", "weekly"),
            "bob",
            Agenda::weekly(),
            config,
        );
        bob.join(JoinMode::Attach, "Bob", T0).unwrap();

        for seq in 1..=3 {
            let envelope = Envelope {
                session_id: "s-1".to_string(),
                sender_id: "alice".to_string(),
                seq,
                message: SyncMessage::NotesUpdated {
                    section_id: "issues".to_string(),
                    content: format!("v{seq}"),
                },
            };
            assert_eq!(bob.apply(envelope, T0), ApplyStatus::Buffered);
        }
        match &bob.phase {
            SyncPhase::AwaitingSnapshot(buffer) => {
                assert_eq!(buffer.len(), 2);
                assert_eq!(buffer[0].seq, 2);
            }
            other => panic!("unexpected phase {:?}", other),
        }
    }

    #[test]
    fn test_follower_cannot_originate_leader_actions() {
        let (_, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        let err = bob.change_section("scorecard", T0 + 10 * SECOND).unwrap_err();
        assert!(matches!(err, SessionError::NotLeader { action: Action::ChangeSection, .. }));
        assert_eq!(bob.pause(T0).unwrap_err().kind(), crate::error::ErrorKind::GuardViolation);
        assert!(bob.conclude(None, T0).is_err());
        assert_eq!(bob.current_section_id(), "good-news");
        assert_eq!(bob.lifecycle(), Lifecycle::Active);
        assert!(bob.drain_effects().is_empty());
    }

    #[test]
    fn test_change_section_resolves_aliases() {
        let mut m = machine("alice");
        m.join(JoinMode::Create, "Alice", T0).unwrap();

        m.change_section("rocks", T0 + 300 * SECOND).unwrap();
        assert_eq!(m.current_section_id(), "priorities");

        m.drain_effects();
        m.change_section("priorities", T0 + 301 * SECOND).unwrap();
        assert!(m.drain_effects().is_empty());

        assert_eq!(
            m.change_section("standup", T0 + 302 * SECOND),
            Err(SessionError::UnknownSection("standup".to_string()))
        );
        assert_eq!(m.current_section_id(), "priorities");
    }

    #[test]
    fn test_pause_twice_is_guard_violation() {
        let mut m = machine("alice");
        m.join(JoinMode::Create, "Alice", T0).unwrap();

        m.pause(T0 + 10 * SECOND).unwrap();
        let err = m.pause(T0 + 20 * SECOND).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                action: Action::Pause,
                lifecycle: Lifecycle::Paused,
            }
        );
        assert_eq!(m.lifecycle(), Lifecycle::Paused);
        assert_eq!(m.clock().paused_at_ms(), Some(T0 + 10 * SECOND));
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        alice.change_section("scorecard", T0 + 300 * SECOND).unwrap();
        alice.update_notes("scorecard", "all green", T0 + 310 * SECOND).unwrap();
        alice.submit_rating(8, T0 + 320 * SECOND).unwrap();
        let envelopes = broadcasts(&mut alice);

        for envelope in &envelopes {
            bob.apply(envelope.clone(), T0 + 330 * SECOND);
        }
        let once = bob.snapshot(T0 + 330 * SECOND);

        for envelope in &envelopes {
            assert_eq!(bob.apply(envelope.clone(), T0 + 330 * SECOND), ApplyStatus::Stale);
        }
        assert_eq!(bob.snapshot(T0 + 330 * SECOND), once);
        assert_eq!(bob.notes().get("scorecard").map(String::as_str), Some("all green"));
        assert_eq!(bob.rating_average(), Some(8.0));
    }

    #[test]
    fn test_every_message_kind_is_idempotent() {
        let (mut alice, mut followers) = meeting(&["bob", "carol"]);
        let mut carol = followers.pop().unwrap();
        let mut bob = followers.pop().unwrap();
        let mut dave = machine("dave");
        let t = T0 + 100 * SECOND;

        let mut envelopes = Vec::new();
        dave.join(JoinMode::Attach, "Dave", t).unwrap();
        envelopes.extend(broadcasts(&mut dave));

        alice.pause(t).unwrap();
        let pause = broadcasts(&mut alice);
        for envelope in &pause {
            bob.apply(envelope.clone(), t);
        }
        envelopes.extend(pause);

        bob.set_following(false, t).unwrap();
        bob.claim_leadership(t).unwrap();
        bob.resume(t + 30 * SECOND).unwrap();
        bob.change_section("scorecard", t + 40 * SECOND).unwrap();
        bob.update_notes("scorecard", "on target", t + 41 * SECOND).unwrap();
        bob.submit_rating(7, t + 42 * SECOND).unwrap();
        envelopes.extend(broadcasts(&mut bob));
        envelopes.push(Envelope {
            session_id: "s-1".to_string(),
            sender_id: "bob".to_string(),
            seq: 0,
            message: SyncMessage::StateSnapshot {
                recipient_id: None,
                snapshot: Box::new(bob.snapshot(t + 45 * SECOND)),
            },
        });

        alice.leave(t + 50 * SECOND).unwrap();
        envelopes.extend(broadcasts(&mut alice));
        bob.conclude(None, t + 60 * SECOND).unwrap();
        envelopes.extend(broadcasts(&mut bob));

        let kinds: std::collections::HashSet<_> = envelopes.iter().map(Envelope::kind).collect();
        assert_eq!(kinds.len(), 10);

        let now = t + 70 * SECOND;
        for envelope in &envelopes {
            carol.apply(envelope.clone(), now);
            let once = carol.snapshot(now);
            carol.apply(envelope.clone(), now);
            assert_eq!(carol.snapshot(now), once, "{} applied twice", envelope.kind());
        }
        assert_eq!(carol.lifecycle(), Lifecycle::Concluded);
        assert_eq!(carol.notes().get("scorecard").map(String::as_str), Some("on target"));
    }

    #[test]
    fn test_stale_resume_after_newer_pause() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        alice.pause(T0 + 60 * SECOND).unwrap();
        alice.resume(T0 + 90 * SECOND).unwrap();
        alice.pause(T0 + 120 * SECOND).unwrap();
        let mut timer = broadcasts(&mut alice);
        timer.reverse();

        assert_eq!(bob.apply(timer[0].clone(), T0 + 121 * SECOND), ApplyStatus::Applied);
        assert_eq!(bob.apply(timer[1].clone(), T0 + 121 * SECOND), ApplyStatus::Stale);
        assert_eq!(bob.apply(timer[2].clone(), T0 + 121 * SECOND), ApplyStatus::Stale);

        assert_eq!(bob.lifecycle(), Lifecycle::Paused);
        let later = T0 + 200 * SECOND;
        assert_eq!(bob.active_elapsed_seconds(later), 90);
        assert_eq!(alice.active_elapsed_seconds(later), 90);
        assert_eq!(bob.section_elapsed_seconds("good-news", later), 90);
        assert_eq!(alice.section_elapsed_seconds("good-news", later), 90);
        assert_eq!(bob.section_timings(), alice.section_timings());
    }

    #[test]
    fn test_section_change_overtaking_timer_updates() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        alice.pause(T0 + 200 * SECOND).unwrap();
        alice.resume(T0 + 250 * SECOND).unwrap();
        alice.change_section("scorecard", T0 + 300 * SECOND).unwrap();
        let mut envelopes = broadcasts(&mut alice);
        assert_eq!(envelopes.len(), 3);

        // The section change arrives ahead of the pause and resume
        envelopes.rotate_right(1);
        assert_eq!(bob.apply(envelopes[0].clone(), T0 + 301 * SECOND), ApplyStatus::Applied);
        assert_eq!(bob.apply(envelopes[1].clone(), T0 + 302 * SECOND), ApplyStatus::Unchanged);
        assert_eq!(bob.apply(envelopes[2].clone(), T0 + 303 * SECOND), ApplyStatus::Unchanged);

        let later = T0 + 400 * SECOND;
        assert_eq!(bob.lifecycle(), Lifecycle::Active);
        assert_eq!(bob.current_section_id(), "scorecard");
        assert_eq!(bob.section_elapsed_seconds("good-news", later), 250);
        assert_eq!(bob.section_elapsed_seconds("scorecard", later), 100);
        assert_eq!(bob.active_elapsed_seconds(later), 350);
        for section in ["good-news", "scorecard"] {
            assert_eq!(
                bob.section_elapsed_seconds(section, later),
                alice.section_elapsed_seconds(section, later)
            );
        }
    }

    #[test]
    fn test_leader_only_message_from_non_leader_requests_snapshot() {
        let (_, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        let mut clock = bob.clock().clone();
        let issues = bob.agenda().get("issues").cloned().unwrap();
        clock.enter_section(&issues, T0 + 10 * SECOND);
        clock.revise("mallory");

        let rogue = Envelope {
            session_id: "s-1".to_string(),
            sender_id: "mallory".to_string(),
            seq: 50,
            message: SyncMessage::SectionChanged {
                section_id: "issues".to_string(),
                at_ms: T0 + 10 * SECOND,
                clock,
            },
        };
        assert_eq!(bob.apply(rogue, T0 + 10 * SECOND), ApplyStatus::Applied);
        assert_eq!(bob.current_section_id(), "issues");

        let effects = bob.drain_effects();
        assert!(effects
            .iter()
            .any(|e| matches!(e, SessionEffect::Notify(SessionEvent::DesyncDetected { .. }))));
        assert!(effects.iter().any(|e| matches!(
            e,
            SessionEffect::Broadcast(Envelope {
                message: SyncMessage::SnapshotRequest { .. },
                ..
            })
        )));
    }

    #[test]
    fn test_leader_leave_promotes_next_joiner() {
        let (mut alice, mut followers) = meeting(&["bob", "carol"]);
        let now = T0 + 60 * SECOND;

        alice.leave(now).unwrap();
        let departing = broadcasts(&mut alice);
        assert!(departing.iter().any(|e| matches!(
            &e.message,
            SyncMessage::LeadershipChanged { leader_id } if leader_id == "bob"
        )));

        for follower in followers.iter_mut() {
            for envelope in &departing {
                follower.apply(envelope.clone(), now);
            }
        }

        let bob = &followers[0];
        assert!(bob.is_leader());
        assert_eq!(followers[1].leader_id(), Some("bob"));
        assert_eq!(followers[1].participants().len(), 2);

        followers[0].change_section("scorecard", now + 10 * SECOND).unwrap();
        assert!(matches!(
            followers[1].change_section("headlines", now + 10 * SECOND),
            Err(SessionError::NotLeader { .. })
        ));
    }

    #[test]
    fn test_last_leave_is_teardown_eligible() {
        let mut m = machine("alice");
        m.join(JoinMode::Create, "Alice", T0).unwrap();
        m.drain_effects();

        m.leave(T0 + SECOND).unwrap();
        assert!(m
            .drain_effects()
            .contains(&SessionEffect::Notify(SessionEvent::TeardownEligible)));
        assert!(!m.is_synchronized());
    }

    #[test]
    fn test_terminal_state_ignores_everything() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        alice.pause(T0 + 60 * SECOND).unwrap();
        let late_pause = broadcasts(&mut alice);
        alice.resume(T0 + 70 * SECOND).unwrap();
        alice.conclude(None, T0 + 100 * SECOND).unwrap();

        assert_eq!(
            alice.pause(T0 + 110 * SECOND),
            Err(SessionError::Concluded("s-1".to_string()))
        );
        assert!(alice.resume(T0 + 110 * SECOND).is_err());
        assert!(alice.change_section("issues", T0 + 110 * SECOND).is_err());
        assert_eq!(alice.lifecycle(), Lifecycle::Concluded);

        let bob = &mut followers[0];
        let mut all: Vec<&mut SessionStateMachine> = vec![&mut alice, bob];
        exchange(&mut all, T0 + 100 * SECOND);
        let bob = &mut followers[0];
        assert_eq!(bob.lifecycle(), Lifecycle::Concluded);
        assert_eq!(
            bob.apply(late_pause[0].clone(), T0 + 120 * SECOND),
            ApplyStatus::Ignored(IgnoreReason::Concluded)
        );
        assert_eq!(bob.lifecycle(), Lifecycle::Concluded);
    }

    #[test]
    fn test_conclude_emits_finalization() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        followers[0].submit_rating(6, T0 + 80 * SECOND).unwrap();
        alice.submit_rating(9, T0 + 80 * SECOND).unwrap();
        {
            let mut all: Vec<&mut SessionStateMachine> = vec![&mut alice, &mut followers[0]];
            exchange(&mut all, T0 + 80 * SECOND);
        }
        assert!(alice.ratings_complete());

        alice
            .conclude(Some("Ship it".to_string()), T0 + 45 * 60 * SECOND + 40 * SECOND)
            .unwrap();
        let effects = alice.drain_effects();
        let payload = effects
            .iter()
            .find_map(|e| match e {
                SessionEffect::Finalize(payload) => Some(payload.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(payload.duration_seconds, 45 * 60 + 40);
        assert_eq!(payload.duration_minutes, 46);
        assert_eq!(payload.average_rating, Some(7.5));
        assert_eq!(payload.meeting_code, "org-team-weekly");
        assert_eq!(payload.cascade_message.as_deref(), Some("Ship it"));
        assert_eq!(payload.individual_ratings.len(), 2);
        assert!(payload
            .individual_ratings
            .iter()
            .any(|r| r.participant_id == "bob" && r.display_name.as_deref() == Some("bob")));

        // Followers apply the conclusion but never finalize
        let bob = &mut followers[0];
        for effect in effects {
            if let SessionEffect::Broadcast(envelope) = effect {
                bob.apply(envelope, T0 + 46 * 60 * SECOND);
            }
        }
        assert_eq!(bob.lifecycle(), Lifecycle::Concluded);
        let follower_effects = bob.drain_effects();
        assert!(follower_effects
            .iter()
            .any(|e| matches!(e, SessionEffect::Notify(SessionEvent::Concluded { .. }))));
        assert!(!follower_effects
            .iter()
            .any(|e| matches!(e, SessionEffect::Finalize(_))));
    }

    #[test]
    fn test_rating_timeout_is_one_shot() {
        let (mut alice, _followers) = meeting(&["bob"]);
        alice.submit_rating(8, T0 + 100 * SECOND).unwrap();

        assert!(!alice.tick(T0 + 219 * SECOND));
        assert!(alice.tick(T0 + 220 * SECOND));
        assert!(!alice.tick(T0 + 230 * SECOND));
        assert!(alice.drain_effects().contains(&SessionEffect::Notify(
            SessionEvent::RatingTimeoutReached {
                submitted: 1,
                expected: 2,
            }
        )));

        // Partial ratings never block conclusion
        alice.conclude(None, T0 + 240 * SECOND).unwrap();
    }

    #[test]
    fn test_rating_timeout_measured_from_receipt() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        // bob's clock runs 200s behind alice's
        bob.submit_rating(6, T0 - 190 * SECOND).unwrap();
        for envelope in broadcasts(bob) {
            alice.apply(envelope, T0 + 10 * SECOND);
        }
        assert_eq!(alice.ratings().window_opened_at_ms(), Some(T0 + 10 * SECOND));

        assert!(!alice.tick(T0 + 11 * SECOND));
        assert!(!alice.tick(T0 + 129 * SECOND));
        assert!(alice.tick(T0 + 130 * SECOND));
    }

    #[test]
    fn test_invalid_rating_leaves_state_unchanged() {
        let mut m = machine("alice");
        m.join(JoinMode::Create, "Alice", T0).unwrap();
        m.drain_effects();

        assert_eq!(m.submit_rating(11, T0), Err(SessionError::RatingOutOfRange(11)));
        assert_eq!(m.submit_rating(0, T0), Err(SessionError::RatingOutOfRange(0)));
        assert!(m.ratings().is_empty());
        assert!(m.drain_effects().is_empty());
    }

    #[test]
    fn test_claim_leadership_converges() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        followers[0].claim_leadership(T0 + 10 * SECOND).unwrap();
        assert!(followers[0].is_leader());

        let mut all: Vec<&mut SessionStateMachine> = vec![&mut alice, &mut followers[0]];
        exchange(&mut all, T0 + 10 * SECOND);

        assert!(!alice.is_leader());
        assert_eq!(alice.leader_id(), Some("bob"));
        assert!(alice.pause(T0 + 20 * SECOND).is_err());
        followers[0].pause(T0 + 20 * SECOND).unwrap();
    }

    #[test]
    fn test_restore_from_snapshot() {
        let (mut alice, _) = meeting(&["bob"]);
        alice.change_section("headlines", T0 + 100 * SECOND).unwrap();
        let stored = alice.snapshot(T0 + 120 * SECOND);

        let restored = SessionStateMachine::restore(stored, "alice", SessionConfig::default());
        assert!(restored.is_leader());
        assert!(restored.is_synchronized());
        assert_eq!(restored.current_section_id(), "headlines");
        assert_eq!(
            restored.active_elapsed_seconds(T0 + 150 * SECOND),
            alice.active_elapsed_seconds(T0 + 150 * SECOND)
        );
    }

    #[test]
    fn test_follow_and_notes() {
        let (mut alice, mut followers) = meeting(&["bob"]);
        let bob = &mut followers[0];

        bob.set_following(false, T0 + 5 * SECOND).unwrap();
        bob.update_notes("todo", "ship release", T0 + 6 * SECOND).unwrap();
        let envelopes = broadcasts(bob);
        for envelope in envelopes {
            alice.apply(envelope, T0 + 6 * SECOND);
        }

        assert_eq!(alice.participants().get("bob").map(|p| p.following), Some(false));
        assert_eq!(alice.notes().get("todos").map(String::as_str), Some("ship release"));
    }

    #[test]
    fn test_status_reports_pace() {
        let mut m = machine("alice");
        m.join(JoinMode::Create, "Alice", T0).unwrap();

        let status = m.status(T0 + 4 * 60 * SECOND);
        assert_eq!(status.current_section_id, "good-news");
        assert_eq!(status.active_elapsed_secs, 240);
        assert_eq!(status.pace, Pace::OnTrack);
        assert_eq!(status.leader_id.as_deref(), Some("alice"));
        assert!(status.synchronized);
    }
}
