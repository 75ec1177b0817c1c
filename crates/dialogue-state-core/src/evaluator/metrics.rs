//! Per-turn slot metrics over `domain-slot-value` entries.

use std::collections::HashSet;

/// `domain-slot` part of a `domain-slot-value` entry (everything before the last `-`).
pub fn slot_of(entry: &str) -> &str {
    entry.rsplit_once('-').map(|(slot, _)| slot).unwrap_or(entry)
}

/// Turn slot accuracy.
///
/// Every catalog slot starts correct. A gold entry missing from the
/// prediction costs one slot; a predicted entry absent from gold costs one
/// slot unless its `domain-slot` was already charged as missing.
pub fn turn_slot_accuracy<S: AsRef<str>>(gold: &[S], pred: &[S], n_slots: usize) -> f64 {
    if n_slots == 0 {
        return 0.0;
    }

    let gold_set: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();
    let pred_set: HashSet<&str> = pred.iter().map(AsRef::as_ref).collect();

    let mut missed_gold = 0usize;
    let mut missed_slots: HashSet<&str> = HashSet::new();
    for g in gold.iter().map(AsRef::as_ref) {
        if !pred_set.contains(g) {
            missed_gold += 1;
            missed_slots.insert(slot_of(g));
        }
    }

    let wrong_pred = pred
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !gold_set.contains(p) && !missed_slots.contains(slot_of(p)))
        .count();

    (n_slots as f64 - missed_gold as f64 - wrong_pred as f64) / n_slots as f64
}

/// Precision, recall and F1 of one turn, with the count it contributes to
/// the F1 denominator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrfScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub count: usize,
}

/// Turn slot precision/recall/F1.
///
/// Empty gold with empty prediction scores 1 across the board; empty gold
/// with any prediction scores 0. Zero denominators yield 0. Each turn
/// contributes a count of 1.
pub fn turn_slot_prf<S: AsRef<str>>(gold: &[S], pred: &[S]) -> PrfScore {
    if gold.is_empty() {
        let score = if pred.is_empty() { 1.0 } else { 0.0 };
        return PrfScore {
            precision: score,
            recall: score,
            f1: score,
            count: 1,
        };
    }

    let gold_set: HashSet<&str> = gold.iter().map(AsRef::as_ref).collect();
    let pred_set: HashSet<&str> = pred.iter().map(AsRef::as_ref).collect();

    let mut tp = 0usize;
    let mut fn_ = 0usize;
    for g in gold.iter().map(AsRef::as_ref) {
        if pred_set.contains(g) {
            tp += 1;
        } else {
            fn_ += 1;
        }
    }
    let fp = pred
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !gold_set.contains(p))
        .count();

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    PrfScore {
        precision,
        recall,
        f1,
        count: 1,
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: [&str; 0] = [];

    #[test]
    fn test_slot_of() {
        assert_eq!(slot_of("hotel-area-north"), "hotel-area");
        assert_eq!(slot_of("hotel-area"), "hotel");
    }

    #[test]
    fn test_accuracy_miss_and_unrelated_extra() {
        let gold = ["hotel-area-north", "taxi-departure-cambridge"];
        let pred = ["taxi-departure-cambridge", "train-day-monday"];
        let acc = turn_slot_accuracy(&gold, &pred, 30);
        assert!((acc - 28.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_wrong_value_counted_once() {
        let gold = ["hotel-area-north"];
        let pred = ["hotel-area-south"];
        let acc = turn_slot_accuracy(&gold, &pred, 30);
        assert!((acc - 29.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_perfect() {
        let gold = ["hotel-area-north"];
        assert_eq!(turn_slot_accuracy(&gold, &gold, 10), 1.0);
    }

    #[test]
    fn test_prf_empty_gold_empty_pred() {
        let score = turn_slot_prf(&EMPTY, &EMPTY);
        assert_eq!(
            score,
            PrfScore {
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                count: 1
            }
        );
    }

    #[test]
    fn test_prf_empty_gold_nonempty_pred() {
        let score = turn_slot_prf(&EMPTY, &["x"]);
        assert_eq!(
            score,
            PrfScore {
                precision: 0.0,
                recall: 0.0,
                f1: 0.0,
                count: 1
            }
        );
    }

    #[test]
    fn test_prf_partial_overlap() {
        let gold = ["a-b-1", "a-c-2"];
        let pred = ["a-b-1", "a-d-3", "a-e-4"];
        let score = turn_slot_prf(&gold, &pred);
        assert!((score.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((score.recall - 0.5).abs() < 1e-12);
        assert!((score.f1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_prf_no_overlap_is_zero() {
        let score = turn_slot_prf(&["a-b-1"], &EMPTY);
        assert_eq!(score.f1, 0.0);
        assert_eq!(score.count, 1);
    }
}
