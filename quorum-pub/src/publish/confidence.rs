//! Confidence computation
//!
//! A group of `count` identical occurrences, `uncertain` of which were
//! flagged, out of `n` occurrences in total:
//! - grouped policy: one record, confidence `(uncertain * 0.5 + certain) / n`
//! - raw policy: one record per occurrence, 1.0 when certain, 0.5 otherwise

use serde::{Deserialize, Serialize};

/// Weight of an occurrence flagged uncertain
pub const UNCERTAIN_WEIGHT: f64 = 0.5;

/// How groups turn into records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationPolicy {
    #[default]
    Grouped,
    Raw,
}

/// Confidence of a group under the grouped policy, clamped to [0, 1]
pub fn grouped_confidence(count: usize, uncertain: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let uncertain = uncertain.min(count);
    let certain = count - uncertain;
    let weighted = uncertain as f64 * UNCERTAIN_WEIGHT + certain as f64;
    (weighted / total as f64).clamp(0.0, 1.0)
}

/// Confidence of every record a group produces
///
/// Under the raw policy certain occurrences come first.
pub fn confidences(
    policy: PublicationPolicy,
    count: usize,
    uncertain: usize,
    total: usize,
) -> Vec<f64> {
    match policy {
        PublicationPolicy::Grouped => vec![grouped_confidence(count, uncertain, total)],
        PublicationPolicy::Raw => {
            let uncertain = uncertain.min(count);
            let mut records = vec![1.0; count - uncertain];
            records.extend(std::iter::repeat(UNCERTAIN_WEIGHT).take(uncertain));
            records
        }
    }
}
