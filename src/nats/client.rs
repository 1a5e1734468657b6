use crate::sync::{Envelope, Transport};
use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Session transport over NATS subjects.
///
/// Each session publishes on `{prefix}.{session_id}`. Publishing goes through
/// a background task so `broadcast` never waits on the network.
pub struct NatsTransport {
    client: Client,
    subject_prefix: String,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl NatsTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let publisher = client.clone();

        // Spawn publisher task
        tokio::spawn(async move {
            while let Some((subject, payload)) = outbound_rx.recv().await {
                if let Err(e) = publisher.publish(subject.clone(), payload.into()).await {
                    error!("Failed to publish to {}: {}", subject, e);
                }
            }
            debug!("NATS publisher stopped");
        });

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
            outbound,
        })
    }

    /// Subject carrying one session's messages
    pub fn subject(&self, session_id: &str) -> String {
        session_subject(&self.subject_prefix, session_id)
    }

    /// Receive envelopes for every session under the prefix
    pub async fn subscribe_all(&self) -> Result<mpsc::Receiver<Envelope>> {
        self.subscribe_subject(format!("{}.>", self.subject_prefix))
            .await
    }

    async fn subscribe_subject(&self, subject: String) -> Result<mpsc::Receiver<Envelope>> {
        info!("Subscribing to session messages on {}", subject);

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to session messages")?;
        let (tx, rx) = mpsc::channel(256);

        // Spawn listener task
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<Envelope>(&msg.payload) {
                    Ok(envelope) => {
                        debug!(
                            "Received {} (seq {}) from {} on {}",
                            envelope.kind(),
                            envelope.seq,
                            envelope.sender_id,
                            msg.subject
                        );
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to parse session message on {}: {}", msg.subject, e);
                    }
                }
            }
            debug!("Subscription to {} closed", subject);
        });

        Ok(rx)
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    fn broadcast(&self, envelope: Envelope) -> Result<()> {
        let subject = self.subject(&envelope.session_id);
        let payload = serde_json::to_vec(&envelope).context("Failed to encode envelope")?;

        self.outbound
            .send((subject, payload))
            .context("NATS publisher has stopped")?;
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<mpsc::Receiver<Envelope>> {
        self.subscribe_subject(self.subject(session_id)).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}

pub fn session_subject(prefix: &str, session_id: &str) -> String {
    format!("{}.{}", prefix, session_id)
}
