//! Meeting pace: how far actual elapsed time has drifted from the agenda.

use crate::agenda::Agenda;
use serde::{Deserialize, Serialize};

/// Running long by more than this share of the agenda is `Behind`.
const BEHIND_PCT: u64 = 10;
/// Running long by more than this share of the agenda is `Critical`.
const CRITICAL_PCT: u64 = 20;
/// Running short by more than this share of the agenda is `Ahead`.
const AHEAD_PCT: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pace {
    Ahead,
    OnTrack,
    Behind,
    Critical,
}

/// Classify pace from the expected-by-now baseline.
///
/// The baseline is the allocation of every section up to and including the
/// current one. Deviation is expressed as a percentage of the whole agenda.
/// An unknown section or an agenda with no allocated time reads as on-track.
pub fn evaluate(agenda: &Agenda, current_section_id: &str, active_elapsed_seconds: u64) -> Pace {
    let total = agenda.total_allocated_seconds();
    let Some(expected) = agenda.expected_elapsed_through(current_section_id) else {
        return Pace::OnTrack;
    };
    if total == 0 {
        return Pace::OnTrack;
    }

    // Compare `deviation / total * 100 > pct` as `deviation * 100 > pct * total`
    // so threshold boundaries are exact.
    let exceeds = |deviation: u64, pct: u64| deviation.saturating_mul(100) > pct * total;

    if active_elapsed_seconds > expected {
        let deviation = active_elapsed_seconds - expected;
        if exceeds(deviation, CRITICAL_PCT) {
            Pace::Critical
        } else if exceeds(deviation, BEHIND_PCT) {
            Pace::Behind
        } else {
            Pace::OnTrack
        }
    } else {
        let deviation = expected - active_elapsed_seconds;
        if exceeds(deviation, AHEAD_PCT) {
            Pace::Ahead
        } else {
            Pace::OnTrack
        }
    }
}
