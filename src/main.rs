use anyhow::{Context, Result};
use clap::Parser;
use meeting_coordinator::clock::SystemClock;
use meeting_coordinator::nats::NatsTransport;
use meeting_coordinator::session::SessionEffect;
use meeting_coordinator::sync::Transport;
use meeting_coordinator::{create_router, AppState, Config};
use std::sync::Arc;
use tracing::{error, info};

/// Relay that mirrors live meeting sessions from NATS and serves their state
#[derive(Parser)]
#[command(name = "meeting-relay", version)]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/meeting-coordinator")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Meeting relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let transport = Arc::new(NatsTransport::connect(&cfg.nats.url, cfg.nats.subject_prefix.clone()).await?);
    let state = AppState::new(
        format!("relay-{}", uuid::Uuid::new_v4()),
        cfg.session.clone(),
        Arc::new(SystemClock),
    )
    .with_relay_config(cfg.relay.clone());

    // Spawn observer task
    let mut incoming = transport.subscribe_all().await?;
    let observer_state = state.clone();
    let observer_transport = Arc::clone(&transport);
    tokio::spawn(async move {
        while let Some(envelope) = incoming.recv().await {
            let now = observer_state.now_ms();
            for effect in observer_state.observe(envelope, now).await {
                if let SessionEffect::Broadcast(envelope) = effect {
                    if let Err(e) = observer_transport.broadcast(envelope) {
                        error!("Failed to broadcast from relay: {}", e);
                    }
                }
            }
        }
        info!("Session subscription closed");
    });

    // Spawn eviction sweep
    let sweep_state = state.clone();
    let sweep_interval = cfg.relay.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let dropped = sweep_state.prune(sweep_state.now_ms()).await;
            if dropped > 0 {
                info!("Dropped {} observed sessions", dropped);
            }
        }
    });

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("HTTP server failed")?;

    Ok(())
}
