pub mod client;

pub use client::{session_subject, NatsTransport};
