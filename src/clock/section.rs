use serde::{Deserialize, Serialize};

/// Time spent in one agenda section, across every visit to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTiming {
    /// Agenda section id
    pub section_id: String,

    /// Allocation copied from the agenda at first visit
    pub allocated_seconds: u64,

    /// Active time banked so far; excludes the currently running stretch
    pub cumulative_active_ms: i64,

    /// First time the section was entered
    pub started_at_ms: i64,

    /// When the section was last left; `None` while it is current
    pub ended_at_ms: Option<i64>,

    /// Number of times the section has been entered
    pub visits: u32,
}

impl SectionTiming {
    pub(crate) fn first_visit(section_id: String, allocated_seconds: u64, now_ms: i64) -> Self {
        Self {
            section_id,
            allocated_seconds,
            cumulative_active_ms: 0,
            started_at_ms: now_ms,
            ended_at_ms: None,
            visits: 1,
        }
    }

    pub fn cumulative_active_seconds(&self) -> u64 {
        (self.cumulative_active_ms.max(0) / 1000) as u64
    }

    /// Seconds spent beyond the allocation, based on banked time only.
    pub fn overrun_seconds(&self) -> u64 {
        self.cumulative_active_seconds()
            .saturating_sub(self.allocated_seconds)
    }

    pub fn is_open(&self) -> bool {
        self.ended_at_ms.is_none()
    }
}
