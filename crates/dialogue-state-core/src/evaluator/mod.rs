//! Belief-state evaluation: joint goal accuracy, turn slot accuracy and turn slot F1.
//!
//! Predictions and gold labels are collections of `domain-slot-value`
//! strings. All comparisons are set-based; entry order never matters.
//!
//! # Aggregation
//!
//! Joint goal and turn slot accuracy are averaged over the number of turns
//! seen. Slot F1 is averaged over the accumulated per-turn F1 count, which
//! is tracked separately.

pub mod diagnostics;
pub mod metrics;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DstError, DstResult};
use crate::slot::SlotCatalog;

pub use diagnostics::{wrong_value_counts, WrongCounts, TOP_K};
pub use metrics::{slot_of, turn_slot_accuracy, turn_slot_prf, PrfScore};

/// Aggregate evaluation result, persisted per checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub joint_goal_accuracy: f64,
    pub turn_slot_accuracy: f64,
    pub turn_slot_f1: f64,
}

impl MetricSummary {
    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            "JGA={:.4} SlotAcc={:.4} SlotF1={:.4}",
            self.joint_goal_accuracy, self.turn_slot_accuracy, self.turn_slot_f1
        )
    }

    pub fn save(&self, path: &Path) -> DstResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> DstResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Running accumulator over evaluated turns.
#[derive(Debug, Clone)]
pub struct DstEvaluator {
    n_slots: usize,
    joint_goal_hit: usize,
    all_hit: usize,
    slot_turn_acc: f64,
    slot_f1_pred: f64,
    slot_f1_count: usize,
}

impl DstEvaluator {
    pub fn new(catalog: &SlotCatalog) -> Self {
        Self::with_slot_count(catalog.len())
    }

    pub fn with_slot_count(n_slots: usize) -> Self {
        Self {
            n_slots,
            joint_goal_hit: 0,
            all_hit: 0,
            slot_turn_acc: 0.0,
            slot_f1_pred: 0.0,
            slot_f1_count: 0,
        }
    }

    /// Clear all running sums.
    pub fn reset(&mut self) {
        *self = Self::with_slot_count(self.n_slots);
    }

    /// Score one turn.
    pub fn update<S: AsRef<str>>(&mut self, gold: &[S], pred: &[S]) {
        self.all_hit += 1;

        let gold_set: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();
        let pred_set: HashSet<&str> = pred.iter().map(AsRef::as_ref).collect();
        if gold_set == pred_set {
            self.joint_goal_hit += 1;
        }

        self.slot_turn_acc += turn_slot_accuracy(gold, pred, self.n_slots);

        let prf = turn_slot_prf(gold, pred);
        self.slot_f1_pred += prf.f1;
        self.slot_f1_count += prf.count;
    }

    pub fn turns(&self) -> usize {
        self.all_hit
    }

    /// Averages over everything seen so far. All zeros before the first turn.
    pub fn compute(&self) -> MetricSummary {
        if self.all_hit == 0 {
            warn!("Evaluator computed with no turns");
            return MetricSummary::default();
        }

        let turns = self.all_hit as f64;
        let turn_slot_f1 = if self.slot_f1_count == 0 {
            0.0
        } else {
            self.slot_f1_pred / self.slot_f1_count as f64
        };

        MetricSummary {
            joint_goal_accuracy: self.joint_goal_hit as f64 / turns,
            turn_slot_accuracy: self.slot_turn_acc / turns,
            turn_slot_f1,
        }
    }
}

/// Evaluate predictions keyed by turn id against gold labels.
///
/// Every labelled turn must have a prediction.
pub fn evaluate_predictions(
    predictions: &BTreeMap<String, Vec<String>>,
    labels: &BTreeMap<String, Vec<String>>,
    catalog: &SlotCatalog,
) -> DstResult<MetricSummary> {
    let mut evaluator = DstEvaluator::new(catalog);

    for (turn_id, gold) in labels {
        let pred = predictions
            .get(turn_id)
            .ok_or_else(|| DstError::MissingPrediction {
                turn_id: turn_id.clone(),
            })?;
        evaluator.update(gold, pred);
    }

    let summary = evaluator.compute();
    info!(
        turns = evaluator.turns(),
        joint_goal_accuracy = summary.joint_goal_accuracy,
        turn_slot_accuracy = summary.turn_slot_accuracy,
        turn_slot_f1 = summary.turn_slot_f1,
        "Evaluation complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: [&str; 0] = [];

    #[test]
    fn test_joint_goal_is_order_independent() {
        let mut evaluator = DstEvaluator::with_slot_count(30);
        evaluator.update(
            &["hotel-area-north", "hotel-stars-4"],
            &["hotel-stars-4", "hotel-area-north"],
        );
        evaluator.update(&["hotel-area-north"], &["hotel-area-south"]);

        let summary = evaluator.compute();
        assert_eq!(summary.joint_goal_accuracy, 0.5);
    }

    #[test]
    fn test_empty_turns_average() {
        let mut evaluator = DstEvaluator::with_slot_count(10);
        evaluator.update(&EMPTY, &EMPTY);
        evaluator.update(&EMPTY, &["x-y-z"]);

        let summary = evaluator.compute();
        assert_eq!(summary.joint_goal_accuracy, 0.5);
        assert_eq!(summary.turn_slot_f1, 0.5);
        assert!((summary.turn_slot_accuracy - (1.0 + 0.9) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_without_turns() {
        let evaluator = DstEvaluator::with_slot_count(10);
        assert_eq!(evaluator.compute(), MetricSummary::default());
    }

    #[test]
    fn test_reset() {
        let mut evaluator = DstEvaluator::with_slot_count(10);
        evaluator.update(&["a-b-c"], &["a-b-c"]);
        evaluator.reset();
        assert_eq!(evaluator.turns(), 0);
    }

    #[test]
    fn test_summary_json_keys() {
        let summary = MetricSummary {
            joint_goal_accuracy: 0.5,
            turn_slot_accuracy: 0.9,
            turn_slot_f1: 0.75,
        };
        let json: serde_json::Value = serde_json::to_value(summary).unwrap();
        assert_eq!(json["joint_goal_accuracy"], 0.5);
        assert_eq!(json["turn_slot_accuracy"], 0.9);
        assert_eq!(json["turn_slot_f1"], 0.75);
    }
}
