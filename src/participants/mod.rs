//! Session membership and leadership
//!
//! Exactly one participant holds [`Role::Leader`] while the registry is
//! non-empty. The first joiner leads; leadership moves by explicit claim or
//! by promotion of the next-by-join-order participant when the leader leaves.

mod registry;

pub use registry::{Participant, ParticipantRegistry, Role};
