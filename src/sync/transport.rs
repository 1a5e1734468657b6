use super::messages::Envelope;
use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Broadcast primitive connecting replicas of a session.
///
/// Delivery is at-least-once with no ordering guarantee; replicas drop
/// duplicates and stale messages themselves.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch to every subscriber of the envelope's session and continue.
    ///
    /// Must not wait for delivery.
    fn broadcast(&self, envelope: Envelope) -> Result<()>;

    /// Receive every envelope published for `session_id`, own ones included
    async fn subscribe(&self, session_id: &str) -> Result<mpsc::Receiver<Envelope>>;

    fn name(&self) -> &str;
}

/// In-process transport for tests and single-process hosts
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait::async_trait]
impl Transport for LocalBus {
    fn broadcast(&self, envelope: Envelope) -> Result<()> {
        // No receivers is not an error: nobody is listening yet
        if self.tx.send(envelope).is_err() {
            debug!("Local bus has no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<mpsc::Receiver<Envelope>> {
        let mut bus_rx = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(256);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(envelope) => {
                        if envelope.session_id != session_id {
                            continue;
                        }
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Local bus subscriber lagged, {} messages skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncMessage;

    fn envelope(session_id: &str) -> Envelope {
        Envelope {
            session_id: session_id.to_string(),
            sender_id: "alice".to_string(),
            seq: 1,
            message: SyncMessage::LeadershipChanged {
                leader_id: "alice".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_local_bus_filters_by_session() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe("s-1").await.unwrap();

        bus.broadcast(envelope("s-2")).unwrap();
        bus.broadcast(envelope("s-1")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, "s-1");
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let bus = LocalBus::default();
        assert!(bus.broadcast(envelope("s-1")).is_ok());
    }
}
