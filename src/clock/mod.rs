//! Wall-clock accounting for a meeting session
//!
//! This module provides:
//! - `ClockEngine`: active elapsed time with pause/resume bookkeeping
//! - `SectionTiming`: cumulative time banked per agenda section
//! - `TimeSource`: the injected `now()` used by hosts and tests
//!
//! The engine never reads the wall clock itself; every call takes `now` in
//! epoch milliseconds so replicas can replay the leader's timestamps.

mod engine;
mod section;

pub use engine::ClockEngine;
pub use section::SectionTiming;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Session lifecycle. `Active` and `Paused` alternate; `Concluded` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    #[default]
    NotStarted,
    Active,
    Paused,
    Concluded,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::NotStarted => "not started",
            Lifecycle::Active => "active",
            Lifecycle::Paused => "paused",
            Lifecycle::Concluded => "concluded",
        };
        f.write_str(name)
    }
}

/// Source of the current time in epoch milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven time source for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
