use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

/// A participant's rating of the meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingEntry {
    pub participant_id: String,
    pub rating: u8,
    /// Submitter's own clock; for display only
    pub submitted_at_ms: i64,
}

/// Latest rating per participant.
///
/// The timeout window is measured on the local clock from when this replica
/// first saw a rating, never from a submitter's timestamp.
#[derive(Debug, Clone)]
pub struct RatingAggregator {
    entries: BTreeMap<String, RatingEntry>,
    timeout: Duration,
    window_opened_ms: Option<i64>,
    timeout_raised: bool,
}

impl RatingAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            timeout,
            window_opened_ms: None,
            timeout_raised: false,
        }
    }

    /// Rebuild from snapshot entries received at `received_at_ms`. Later
    /// duplicates overwrite earlier ones.
    pub fn from_entries(entries: Vec<RatingEntry>, timeout: Duration, received_at_ms: i64) -> Self {
        let mut aggregator = Self::new(timeout);
        for entry in entries {
            aggregator
                .entries
                .insert(entry.participant_id.clone(), entry);
        }
        if !aggregator.entries.is_empty() {
            aggregator.window_opened_ms = Some(received_at_ms);
        }
        aggregator
    }

    pub fn validate(rating: i64) -> Result<u8, SessionError> {
        if (MIN_RATING as i64..=MAX_RATING as i64).contains(&rating) {
            Ok(rating as u8)
        } else {
            Err(SessionError::RatingOutOfRange(rating))
        }
    }

    /// Record a rating, replacing any earlier one from the same participant.
    ///
    /// Returns `true` if the stored value changed. Out-of-range input is
    /// rejected without touching state.
    pub fn submit(&mut self, participant_id: &str, rating: i64, now_ms: i64) -> Result<bool, SessionError> {
        self.receive(participant_id, rating, now_ms, now_ms)
    }

    /// [`submit`](Self::submit) for a rating stamped by another replica.
    pub fn receive(
        &mut self,
        participant_id: &str,
        rating: i64,
        submitted_at_ms: i64,
        received_at_ms: i64,
    ) -> Result<bool, SessionError> {
        let rating = Self::validate(rating)?;

        if let Some(existing) = self.entries.get(participant_id) {
            if existing.rating == rating {
                return Ok(false);
            }
        }

        self.entries.insert(
            participant_id.to_string(),
            RatingEntry {
                participant_id: participant_id.to_string(),
                rating,
                submitted_at_ms,
            },
        );
        self.window_opened_ms.get_or_insert(received_at_ms);
        Ok(true)
    }

    /// Mean of the latest rating per participant; `None` with no ratings.
    pub fn average(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: u32 = self.entries.values().map(|e| e.rating as u32).sum();
        Some(sum as f64 / self.entries.len() as f64)
    }

    /// `true` once at least `total_participants` distinct participants rated.
    ///
    /// `>=` rather than `==` so a rater who later leaves does not keep the
    /// round open forever.
    pub fn is_complete(&self, total_participants: usize) -> bool {
        total_participants > 0 && self.entries.len() >= total_participants
    }

    /// `true` when every id in `participant_ids` has rated.
    pub fn is_complete_for<'a>(&self, mut participant_ids: impl Iterator<Item = &'a str>) -> bool {
        let mut any = false;
        let all = participant_ids.all(|id| {
            any = true;
            self.entries.contains_key(id)
        });
        any && all
    }

    /// Local time the first rating of the round was seen.
    pub fn window_opened_at_ms(&self) -> Option<i64> {
        self.window_opened_ms
    }

    /// One-shot advisory: `true` the first time the round is still open
    /// `timeout` after the first rating arrived.
    pub fn check_timeout(&mut self, complete: bool, now_ms: i64) -> bool {
        if complete || self.timeout_raised {
            return false;
        }
        let Some(first) = self.window_opened_ms else {
            return false;
        };

        if now_ms - first >= self.timeout.as_millis() as i64 {
            self.timeout_raised = true;
            return true;
        }
        false
    }

    pub fn timeout_raised(&self) -> bool {
        self.timeout_raised
    }

    pub fn get(&self, participant_id: &str) -> Option<&RatingEntry> {
        self.entries.get(participant_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RatingEntry> {
        self.entries.values()
    }
}
