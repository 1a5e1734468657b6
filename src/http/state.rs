use super::config::RelayConfig;
use crate::agenda::Agenda;
use crate::clock::{Lifecycle, SystemClock, TimeSource};
use crate::session::{
    ApplyStatus, JoinMode, MeetingKey, SessionConfig, SessionEffect, SessionEvent,
    SessionStateMachine,
};
use crate::sync::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A passive replica plus the relay's bookkeeping for evicting it
#[derive(Debug)]
pub struct ObservedSession {
    pub machine: SessionStateMachine,
    /// Relay time of the first message, when the snapshot was requested
    pub first_seen_ms: i64,
    /// Relay time the conclusion was seen
    pub concluded_seen_ms: Option<i64>,
}

impl ObservedSession {
    /// Whether the relay should stop tracking this session at `now`.
    fn expired(&self, relay: &RelayConfig, now: i64) -> bool {
        if let Some(concluded) = self.concluded_seen_ms {
            return now - concluded >= relay.concluded_retention().as_millis() as i64;
        }
        !self.machine.is_synchronized()
            && now - self.first_seen_ms >= relay.snapshot_timeout().as_millis() as i64
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Observed sessions (session_id → passive replica)
    pub sessions: Arc<RwLock<HashMap<String, ObservedSession>>>,

    /// Participant id the relay uses when requesting snapshots
    pub observer_id: String,

    pub session_config: SessionConfig,

    pub relay_config: RelayConfig,

    pub clock: Arc<dyn TimeSource>,
}

impl AppState {
    pub fn new(
        observer_id: impl Into<String>,
        session_config: SessionConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            observer_id: observer_id.into(),
            session_config,
            relay_config: RelayConfig::default(),
            clock,
        }
    }

    pub fn with_relay_config(mut self, relay_config: RelayConfig) -> Self {
        self.relay_config = relay_config;
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Feed one received envelope to the passive replica of its session,
    /// creating the replica on first sight.
    ///
    /// Returns the effects the host must dispatch (snapshot requests).
    pub async fn observe(&self, envelope: Envelope, now: i64) -> Vec<SessionEffect> {
        let session_id = envelope.session_id.clone();
        let mut sessions = self.sessions.write().await;

        let observed = sessions.entry(session_id.clone()).or_insert_with(|| {
            info!("Observing new session {}", session_id);
            // Key and agenda are placeholders until the first snapshot lands
            let mut machine = SessionStateMachine::new(
                session_id.clone(),
                MeetingKey::new("", "", ""),
                self.observer_id.clone(),
                Agenda::default(),
                self.session_config.clone(),
            );
            // Observe cannot fail on a fresh, unconcluded machine
            let _ = machine.join(JoinMode::Observe, "relay", now);
            ObservedSession {
                machine,
                first_seen_ms: now,
                concluded_seen_ms: None,
            }
        });

        let status = observed.machine.apply(envelope, now);
        if status != ApplyStatus::Unchanged {
            debug!("Relay applied message for {}: {:?}", session_id, status);
        }
        if observed.concluded_seen_ms.is_none() && observed.machine.lifecycle() == Lifecycle::Concluded {
            info!("Session {} concluded, retaining for {:?}", session_id, self.relay_config.concluded_retention());
            observed.concluded_seen_ms = Some(now);
        }

        let effects = observed.machine.drain_effects();
        let teardown = effects
            .iter()
            .any(|e| matches!(e, SessionEffect::Notify(SessionEvent::TeardownEligible)));
        if teardown {
            info!("Session {} is empty, no longer observing", session_id);
            sessions.remove(&session_id);
        }

        effects
    }

    /// Drop concluded sessions past their retention and sessions that never
    /// synchronized. Returns how many were dropped.
    pub async fn prune(&self, now: i64) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, observed| {
            let expired = observed.expired(&self.relay_config, now);
            if expired {
                info!(
                    "No longer observing session {} ({})",
                    session_id,
                    observed.machine.lifecycle()
                );
            }
            !expired
        });
        before - sessions.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            format!("relay-{}", uuid::Uuid::new_v4()),
            SessionConfig::default(),
            Arc::new(SystemClock),
        )
    }
}
