use super::section::SectionTiming;
use super::Lifecycle;
use crate::agenda::AgendaSection;
use crate::error::{Action, SessionError};
use serde::{Deserialize, Serialize};

/// Elapsed-time accounting for one session.
///
/// Active time is `end - started_at - total_paused`, where `end` is `now`
/// while active and frozen at the pause (or conclusion) instant otherwise.
/// Section time is banked into [`SectionTiming`] on every section change,
/// pause and conclusion; a fresh anchor is taken on every entry and resume,
/// so a paused interval is never counted as section time.
///
/// Every transition the leader makes bumps `revision`. Followers replace
/// their clock wholesale with any later revision they receive, so missed or
/// reordered timer messages cannot leave section time skewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockEngine {
    lifecycle: Lifecycle,
    started_at_ms: Option<i64>,
    paused_at_ms: Option<i64>,
    concluded_at_ms: Option<i64>,
    total_paused_ms: i64,
    current_section: Option<String>,
    section_anchor_ms: Option<i64>,
    sections: Vec<SectionTiming>,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    revised_by: Option<String>,
}

impl ClockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `NotStarted -> Active`, entering `first_section` at `now`.
    pub fn start(&mut self, now: i64, first_section: &AgendaSection) -> Result<(), SessionError> {
        self.expect(Lifecycle::NotStarted, Action::Start)?;

        self.started_at_ms = Some(now);
        self.lifecycle = Lifecycle::Active;

        // A section picked before start is kept; otherwise begin at the first one
        match self.current_section.clone() {
            Some(current) => {
                self.section_anchor_ms = Some(now);
                if let Some(timing) = self.timing_mut(&current) {
                    timing.ended_at_ms = None;
                }
            }
            None => {
                self.enter_section(first_section, now);
            }
        }

        Ok(())
    }

    /// `Active -> Paused`; banks the running section stretch.
    pub fn pause(&mut self, now: i64) -> Result<(), SessionError> {
        self.expect(Lifecycle::Active, Action::Pause)?;

        self.bank_section(now);
        self.paused_at_ms = Some(now);
        self.lifecycle = Lifecycle::Paused;
        Ok(())
    }

    /// `Paused -> Active`; adds the paused interval and re-anchors the section.
    pub fn resume(&mut self, now: i64) -> Result<(), SessionError> {
        self.expect(Lifecycle::Paused, Action::Resume)?;

        if let Some(paused_at) = self.paused_at_ms.take() {
            self.total_paused_ms += (now - paused_at).max(0);
        }
        self.lifecycle = Lifecycle::Active;
        if self.current_section.is_some() {
            self.section_anchor_ms = Some(now);
        }
        Ok(())
    }

    /// `Active | Paused -> Concluded`; freezes every counter.
    pub fn conclude(&mut self, now: i64) -> Result<(), SessionError> {
        let frozen_at = match self.lifecycle {
            Lifecycle::Active => {
                self.bank_section(now);
                now
            }
            Lifecycle::Paused => self.paused_at_ms.unwrap_or(now),
            lifecycle => {
                return Err(SessionError::InvalidTransition {
                    action: Action::Conclude,
                    lifecycle,
                })
            }
        };

        if let Some(timing) = self.current_timing_mut() {
            timing.ended_at_ms.get_or_insert(frozen_at);
        }
        self.concluded_at_ms = Some(frozen_at);
        self.lifecycle = Lifecycle::Concluded;
        Ok(())
    }

    /// Make `section` current. Returns `false` if it already was.
    ///
    /// Time only starts accruing for the new section if the clock is active;
    /// while paused the anchor is taken on resume instead.
    pub fn enter_section(&mut self, section: &AgendaSection, now: i64) -> bool {
        if self.current_section.as_deref() == Some(section.id.as_str()) {
            return false;
        }

        self.bank_section(now);
        if let Some(previous) = self.current_timing_mut() {
            previous.ended_at_ms = Some(now);
        }

        match self.timing_mut(&section.id) {
            Some(timing) => {
                timing.visits += 1;
                timing.ended_at_ms = None;
            }
            None => self.sections.push(SectionTiming::first_visit(
                section.id.clone(),
                section.allocated_seconds,
                now,
            )),
        }

        self.current_section = Some(section.id.clone());
        self.section_anchor_ms = (self.lifecycle == Lifecycle::Active).then_some(now);
        true
    }

    /// Stamp a transition `author` just made on this clock.
    pub fn revise(&mut self, author: &str) {
        self.revision += 1;
        self.revised_by = Some(author.to_string());
    }

    /// Whether this is a later clock state than `other`. Competing leaders
    /// that reach the same revision are ordered by author id.
    pub fn supersedes(&self, other: &ClockEngine) -> bool {
        (self.revision, self.revised_by.as_deref()) > (other.revision, other.revised_by.as_deref())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn active_elapsed_ms(&self, now: i64) -> i64 {
        let Some(started_at) = self.started_at_ms else {
            return 0;
        };

        let end = match self.lifecycle {
            Lifecycle::NotStarted => return 0,
            Lifecycle::Active => now,
            Lifecycle::Paused => self.paused_at_ms.unwrap_or(now),
            Lifecycle::Concluded => self.concluded_at_ms.unwrap_or(now),
        };

        (end - started_at - self.total_paused_ms).max(0)
    }

    pub fn active_elapsed_seconds(&self, now: i64) -> u64 {
        (self.active_elapsed_ms(now) / 1000) as u64
    }

    /// Banked time for `section_id` plus the running stretch if it is current.
    pub fn section_elapsed_ms(&self, section_id: &str, now: i64) -> i64 {
        let banked = self
            .timing(section_id)
            .map(|t| t.cumulative_active_ms)
            .unwrap_or(0);

        let running = match (&self.current_section, self.section_anchor_ms) {
            (Some(current), Some(anchor))
                if current == section_id && self.lifecycle == Lifecycle::Active =>
            {
                (now - anchor).max(0)
            }
            _ => 0,
        };

        banked + running
    }

    pub fn section_elapsed_seconds(&self, section_id: &str, now: i64) -> u64 {
        (self.section_elapsed_ms(section_id, now) / 1000) as u64
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn started_at_ms(&self) -> Option<i64> {
        self.started_at_ms
    }

    pub fn paused_at_ms(&self) -> Option<i64> {
        self.paused_at_ms
    }

    pub fn total_paused_ms(&self) -> i64 {
        self.total_paused_ms
    }

    pub fn current_section(&self) -> Option<&str> {
        self.current_section.as_deref()
    }

    /// Timings in first-visit order.
    pub fn sections(&self) -> &[SectionTiming] {
        &self.sections
    }

    pub fn timing(&self, section_id: &str) -> Option<&SectionTiming> {
        self.sections.iter().find(|t| t.section_id == section_id)
    }

    fn timing_mut(&mut self, section_id: &str) -> Option<&mut SectionTiming> {
        self.sections.iter_mut().find(|t| t.section_id == section_id)
    }

    fn current_timing_mut(&mut self) -> Option<&mut SectionTiming> {
        let current = self.current_section.clone()?;
        self.timing_mut(&current)
    }

    fn bank_section(&mut self, now: i64) {
        let Some(anchor) = self.section_anchor_ms.take() else {
            return;
        };
        if let Some(timing) = self.current_timing_mut() {
            timing.cumulative_active_ms += (now - anchor).max(0);
        }
    }

    fn expect(&self, expected: Lifecycle, action: Action) -> Result<(), SessionError> {
        if self.lifecycle == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                lifecycle: self.lifecycle,
            })
        }
    }
}
