//! End-of-meeting ratings
//!
//! One rating (1-10) per participant, latest submission wins. The
//! aggregator also tracks the advisory completion timeout the leader uses
//! to offer a "send anyway" override.

mod aggregator;

pub use aggregator::{RatingAggregator, RatingEntry, MAX_RATING, MIN_RATING};
