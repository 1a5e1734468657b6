use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordering stamp: sequence first, sender id breaks ties.
///
/// Two replicas originating on the same stream with the same `seq` resolve
/// identically everywhere because the sender id gives a total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub seq: u64,
    pub sender_id: String,
}

/// Last applied stamp per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceTable {
    last: BTreeMap<String, Stamp>,
}

impl SequenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number to originate on `stream`.
    pub fn next_seq(&self, stream: &str) -> u64 {
        self.last.get(stream).map(|s| s.seq + 1).unwrap_or(1)
    }

    /// `true` if `stamp` is not newer than the last applied on `stream`.
    pub fn is_stale(&self, stream: &str, stamp: &Stamp) -> bool {
        self.last.get(stream).is_some_and(|last| stamp <= last)
    }

    /// Record `stamp` as applied, never moving a stream backwards.
    pub fn record(&mut self, stream: String, stamp: Stamp) {
        match self.last.get_mut(&stream) {
            Some(last) if *last >= stamp => {}
            Some(last) => *last = stamp,
            None => {
                self.last.insert(stream, stamp);
            }
        }
    }

    pub fn last(&self, stream: &str) -> Option<&Stamp> {
        self.last.get(stream)
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
