pub mod agenda;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod nats;
pub mod pace;
pub mod participants;
pub mod rating;
pub mod session;
pub mod sync;

pub use agenda::{Agenda, AgendaItem, AgendaSection};
pub use clock::{ClockEngine, Lifecycle, ManualClock, SectionTiming, SystemClock, TimeSource};
pub use config::Config;
pub use error::{Action, ErrorKind, SessionError};
pub use http::{create_router, AppState, RelayConfig};
pub use nats::NatsTransport;
pub use pace::Pace;
pub use participants::{Participant, ParticipantRegistry, Role};
pub use rating::{RatingAggregator, RatingEntry};
pub use session::{
    ApplyStatus, JoinMode, JoinOutcome, MeetingKey, SessionConfig, SessionEffect, SessionEvent,
    SessionSnapshot, SessionStateMachine, SessionStatus,
};
pub use sync::{Envelope, LocalBus, SessionReplica, SessionSink, SyncMessage, Transport};
