//! Read-only HTTP API served by the relay
//!
//! The relay mirrors every session it sees on NATS as a passive replica and
//! exposes it:
//! - GET /meetings - List synchronized sessions
//! - GET /meetings/:session_id/status - Live status (clock, pace, ratings)
//! - GET /meetings/:session_id/snapshot - Full replicated state
//! - GET /meetings/by-code/:code - Running session for a meeting code
//! - GET /health - Health check

mod config;
mod handlers;
mod routes;
mod state;

pub use config::RelayConfig;
pub use handlers::{ErrorResponse, MeetingSummary};
pub use routes::create_router;
pub use state::{AppState, ObservedSession};
