//! Which gold values and slots the tracker misses most often.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::metrics::slot_of;
use crate::error::{DstError, DstResult};

/// Number of entries kept in each ranking.
pub const TOP_K: usize = 10;

/// Most frequently missed values and slots, as fractions of all misses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrongCounts {
    /// `domain-slot-value` entries, highest miss share first.
    pub values: Vec<(String, f64)>,
    /// `domain-slot` pairs, highest miss share first.
    pub slots: Vec<(String, f64)>,
    /// Total gold entries missed across all turns.
    pub total_misses: usize,
}

/// Count gold entries absent from the prediction of the same turn.
///
/// Turns present only in `predictions` are ignored. A labelled turn without
/// a prediction fails with [`DstError::MissingPrediction`], as in
/// `evaluate_predictions`.
pub fn wrong_value_counts(
    predictions: &BTreeMap<String, Vec<String>>,
    labels: &BTreeMap<String, Vec<String>>,
) -> DstResult<WrongCounts> {
    let mut by_value: HashMap<&str, usize> = HashMap::new();
    let mut by_slot: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;

    for (turn_id, gold) in labels {
        let pred: HashSet<&str> = predictions
            .get(turn_id)
            .ok_or_else(|| DstError::MissingPrediction {
                turn_id: turn_id.clone(),
            })?
            .iter()
            .map(String::as_str)
            .collect();

        for label in gold {
            if !pred.contains(label.as_str()) {
                *by_value.entry(label.as_str()).or_default() += 1;
                *by_slot.entry(slot_of(label)).or_default() += 1;
                total += 1;
            }
        }
    }

    Ok(WrongCounts {
        values: top_fractions(by_value, total),
        slots: top_fractions(by_slot, total),
        total_misses: total,
    })
}

fn top_fractions(counts: HashMap<&str, usize>, total: usize) -> Vec<(String, f64)> {
    if total == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(TOP_K)
        .map(|(key, count)| (key.to_string(), count as f64 / total as f64))
        .collect()
}
