use super::transport::Transport;
use crate::clock::TimeSource;
use crate::error::SessionError;
use crate::session::{
    FinalizationPayload, JoinMode, JoinOutcome, PersistenceRecord, SessionEffect, SessionEvent,
    SessionSnapshot, SessionStateMachine, SessionStatus,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Collaborator that receives persistence, finalization and notifications.
#[async_trait::async_trait]
pub trait SessionSink: Send + Sync {
    /// Durably log a lifecycle transition
    async fn persist(&self, record: PersistenceRecord) -> Result<()>;

    /// Hand off the conclusion summary
    async fn finalize(&self, payload: FinalizationPayload) -> Result<()>;

    async fn on_event(&self, _event: &SessionEvent) {}
}

/// Sink that only logs
pub struct TracingSink;

#[async_trait::async_trait]
impl SessionSink for TracingSink {
    async fn persist(&self, record: PersistenceRecord) -> Result<()> {
        info!(
            "Transition {:?} in {} ({:?}) at {}",
            record.event, record.session_id, record.origin, record.timestamp
        );
        Ok(())
    }

    async fn finalize(&self, payload: FinalizationPayload) -> Result<()> {
        info!(
            "Meeting {} finalized: {} minutes, average rating {:?}, {} ratings",
            payload.meeting_code,
            payload.duration_minutes,
            payload.average_rating,
            payload.individual_ratings.len()
        );
        Ok(())
    }

    async fn on_event(&self, event: &SessionEvent) {
        debug!("Session event: {:?}", event);
    }
}

#[derive(Clone)]
struct Dispatcher {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn SessionSink>,
}

impl Dispatcher {
    /// Route drained effects. Failures are logged; local state stays as applied.
    async fn dispatch(&self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::Broadcast(envelope) => {
                    let kind = envelope.kind();
                    if let Err(e) = self.transport.broadcast(envelope) {
                        error!(
                            "Failed to broadcast {} over {}: {}",
                            kind,
                            self.transport.name(),
                            e
                        );
                    }
                }
                SessionEffect::Persist(record) => {
                    if let Err(e) = self.sink.persist(record).await {
                        error!("Failed to persist transition: {}", e);
                    }
                }
                SessionEffect::Finalize(payload) => {
                    if let Err(e) = self.sink.finalize(payload).await {
                        error!("Failed to finalize meeting: {}", e);
                    }
                }
                SessionEffect::Notify(event) => self.sink.on_event(&event).await,
            }
        }
    }
}

/// A session state machine wired to a transport, a sink and a time source.
///
/// Every call locks the machine, applies the operation at the current time,
/// drains the effect outbox and dispatches it after releasing the lock.
pub struct SessionReplica {
    machine: Arc<Mutex<SessionStateMachine>>,
    dispatcher: Dispatcher,
    clock: Arc<dyn TimeSource>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionReplica {
    pub fn new(
        machine: SessionStateMachine,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn SessionSink>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            dispatcher: Dispatcher { transport, sink },
            clock,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the session and start applying incoming messages.
    ///
    /// Call before [`join`](Self::join) so the snapshot reply is not missed.
    pub async fn connect(&self) -> Result<()> {
        let session_id = self.machine.lock().await.session_id().to_string();
        let mut rx = self
            .dispatcher
            .transport
            .subscribe(&session_id)
            .await
            .with_context(|| format!("Failed to subscribe to session {}", session_id))?;

        info!(
            "Listening for session {} over {}",
            session_id,
            self.dispatcher.transport.name()
        );

        let machine = Arc::clone(&self.machine);
        let dispatcher = self.dispatcher.clone();
        let clock = Arc::clone(&self.clock);

        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let effects = {
                    let mut machine = machine.lock().await;
                    let status = machine.apply(envelope, clock.now_ms());
                    debug!("Applied message: {:?}", status);
                    machine.drain_effects()
                };
                dispatcher.dispatch(effects).await;
            }
            debug!("Subscription for session {} closed", session_id);
        });

        self.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Drive the rating-timeout advisory every `interval`.
    pub async fn spawn_ticker(&self, interval: Duration) {
        let machine = Arc::clone(&self.machine);
        let dispatcher = self.dispatcher.clone();
        let clock = Arc::clone(&self.clock);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let effects = {
                    let mut machine = machine.lock().await;
                    machine.tick(clock.now_ms());
                    machine.drain_effects()
                };
                dispatcher.dispatch(effects).await;
            }
        });

        self.tasks.lock().await.push(handle);
    }

    /// Stop background tasks. The machine keeps its last state.
    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
    }

    async fn run<T>(
        &self,
        op: impl FnOnce(&mut SessionStateMachine, i64) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let (result, effects) = {
            let mut machine = self.machine.lock().await;
            let result = op(&mut *machine, self.clock.now_ms());
            (result, machine.drain_effects())
        };
        self.dispatcher.dispatch(effects).await;
        result
    }

    pub async fn join(&self, mode: JoinMode, display_name: &str) -> Result<JoinOutcome, SessionError> {
        self.run(|m, now| m.join(mode, display_name, now)).await
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.run(|m, now| m.start(now)).await
    }

    pub async fn change_section(&self, section_id: &str) -> Result<(), SessionError> {
        self.run(|m, now| m.change_section(section_id, now)).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.run(|m, now| m.pause(now)).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.run(|m, now| m.resume(now)).await
    }

    pub async fn conclude(&self, cascade_message: Option<String>) -> Result<(), SessionError> {
        self.run(|m, now| m.conclude(cascade_message, now)).await
    }

    pub async fn submit_rating(&self, rating: i64) -> Result<(), SessionError> {
        self.run(|m, now| m.submit_rating(rating, now)).await
    }

    pub async fn claim_leadership(&self) -> Result<(), SessionError> {
        self.run(|m, now| m.claim_leadership(now)).await
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.run(|m, now| m.leave(now)).await
    }

    pub async fn update_notes(&self, section_id: &str, content: &str) -> Result<(), SessionError> {
        self.run(|m, now| m.update_notes(section_id, content, now))
            .await
    }

    pub async fn set_following(&self, following: bool) -> Result<(), SessionError> {
        self.run(|m, now| m.set_following(following, now)).await
    }

    pub async fn tick(&self) -> bool {
        self.run(|m, now| Ok(m.tick(now))).await.unwrap_or(false)
    }

    pub async fn status(&self) -> SessionStatus {
        self.machine.lock().await.status(self.clock.now_ms())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.machine.lock().await.snapshot(self.clock.now_ms())
    }

    pub async fn is_leader(&self) -> bool {
        self.machine.lock().await.is_leader()
    }

    /// Run a read-only query against the machine.
    pub async fn inspect<T>(&self, query: impl FnOnce(&SessionStateMachine) -> T) -> T {
        let machine = self.machine.lock().await;
        query(&*machine)
    }
}
