//! Replica synchronization
//!
//! - Wire messages and envelopes exchanged between replicas
//! - Per-stream sequencing for stale and duplicate detection
//! - The `Transport` seam with an in-process `LocalBus`
//! - `SessionReplica`, which wires a state machine to a transport

mod messages;
mod replica;
mod sequencer;
mod transport;

pub use messages::{Envelope, MessageKind, SyncMessage};
pub use replica::{SessionReplica, SessionSink, TracingSink};
pub use sequencer::{SequenceTable, Stamp};
pub use transport::{LocalBus, Transport};
