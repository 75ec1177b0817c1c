//! End-to-end tracker behavior on synthetic turns.

use candle_core::{DType, D};
use candle_nn::{VarBuilder, VarMap};
use dialogue_state_core::{BeliefState, Operation};
use dialogue_state_model::{
    DecodeMode, DialogueStateTracker, ExecutionContext, ForwardOptions, ModelError,
    TeacherForcingSchedule, TurnLabels,
};
use dialogue_state_test_utils::{
    slot_catalog, synthetic_labels, synthetic_turn_batch, tiny_config, vocabulary, TINY_VOCAB,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const UPDATE: u32 = 1;
const DONTCARE: u32 = 2;
const CARRYOVER: u32 = 3;
const DELETE: u32 = 0;

#[test]
fn test_inference_forward_shapes() {
    let ctx = ExecutionContext::cpu();
    let tracker = DialogueStateTracker::new(tiny_config(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 3, 12, 4, 5);

    let out = tracker
        .forward(&batch, ForwardOptions::inference(4), &ctx)
        .unwrap();

    assert_eq!(out.domain_scores.dims(), &[3, 2]);
    assert_eq!(out.op_scores.dims(), &[3, 4, 4]);
    let max_update = out.update_slots.iter().map(Vec::len).max().unwrap();
    assert_eq!(out.gen_scores.dims(), &[3, max_update, 4, TINY_VOCAB.len()]);
    assert_eq!(out.token_ids.len(), 3);
}

#[test]
fn test_gold_operations_drive_aggregation() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 2, 12, 4, 5);
    let labels = synthetic_labels(
        &config,
        vec![
            vec![UPDATE, CARRYOVER, UPDATE, DELETE],
            vec![CARRYOVER, CARRYOVER, CARRYOVER, CARRYOVER],
        ],
        3,
        17,
    );

    let out = tracker
        .forward(&batch, ForwardOptions::supervised(&labels, DecodeMode::Greedy), &ctx)
        .unwrap();

    assert_eq!(out.update_slots, vec![vec![0, 2], vec![]]);
    assert_eq!(
        out.gen_scores.dims(),
        &[2, 2, labels.max_value(), TINY_VOCAB.len()]
    );

    // Every emission is a probability distribution, padding rows included
    let sums: Vec<f32> = out
        .gen_scores
        .sum(D::Minus1)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
}

#[test]
fn test_turn_without_updates_still_decodes() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 1, 10, 4, 2);
    let labels = synthetic_labels(&config, vec![vec![CARRYOVER; 4]], 3, 3);

    let out = tracker
        .forward(&batch, ForwardOptions::supervised(&labels, DecodeMode::Greedy), &ctx)
        .unwrap();
    assert_eq!(out.gen_scores.dims()[1], 0);

    let (_, parts) = tracker.compute_loss(&out, &labels, &ctx).unwrap();
    assert_eq!(parts.generation, 0.0);
    assert!(parts.operation > 0.0);
}

#[test]
fn test_supervised_forward_is_seed_reproducible() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 2, 12, 4, 8);
    let labels = synthetic_labels(
        &config,
        vec![
            vec![UPDATE, DONTCARE, CARRYOVER, UPDATE],
            vec![UPDATE, CARRYOVER, CARRYOVER, CARRYOVER],
        ],
        2,
        4,
    );
    let schedule = TeacherForcingSchedule::from_config(&config.decoder).unwrap();

    let run = |seed| {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (_, _, parts) = tracker
            .supervised_forward(&batch, &labels, &schedule, &mut rng, &ctx)
            .unwrap();
        parts
    };
    let a = run(99);
    let b = run(99);
    assert_eq!(a.total, b.total);
    assert!(a.generation > 0.0);
    assert!((a.total - (a.generation + a.operation + a.domain)).abs() < 1e-4);
}

#[test]
fn test_supervised_forward_rejects_misaligned_targets() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let pad_id = config.decoder.pad_id;
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 2, 12, 4, 8);
    let schedule = TeacherForcingSchedule::from_config(&config.decoder).unwrap();

    // Row 0 has two gold updates but one target; row 1 has none but two targets.
    // Padding would hide the mismatch, since both rows pad to max_update = 2.
    let shifted = TurnLabels::new(
        vec![
            vec![UPDATE, UPDATE, CARRYOVER, CARRYOVER],
            vec![CARRYOVER; 4],
        ],
        vec![0, 1],
        vec![vec![vec![5, 6]], vec![vec![7, 8], vec![9, 10]]],
        pad_id,
    )
    .unwrap();
    // Gold updates without any targets.
    let missing = TurnLabels::new(
        vec![vec![UPDATE, CARRYOVER, UPDATE, CARRYOVER], vec![CARRYOVER; 4]],
        vec![0, 1],
        vec![vec![], vec![]],
        pad_id,
    )
    .unwrap();

    for labels in [&shifted, &missing] {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let err = tracker
            .supervised_forward(&batch, labels, &schedule, &mut rng, &ctx)
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }), "{:?}", err);
    }

    // The loss alone enforces the same contract.
    let out = tracker
        .forward(&batch, ForwardOptions::supervised(&shifted, DecodeMode::Greedy), &ctx)
        .unwrap();
    let err = tracker.compute_loss(&out, &shifted, &ctx).unwrap_err();
    assert!(matches!(err, ModelError::ShapeMismatch { .. }));
}

#[test]
fn test_predict_turn_truncates_at_eos() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 2, 12, 4, 21);

    let predictions = tracker.predict_turn(&batch, &ctx).unwrap();
    assert_eq!(predictions.len(), 2);
    for prediction in &predictions {
        assert_eq!(prediction.operations.len(), 4);
        let n_update = prediction
            .operations
            .iter()
            .filter(|&&op| op == Operation::Update)
            .count();
        assert_eq!(prediction.update_slots.len(), n_update);
        assert_eq!(prediction.generated.len(), n_update);
        for ids in &prediction.generated {
            assert!(ids.len() <= config.decoder.max_value);
            assert!(!ids.contains(&config.decoder.eos_id));
        }
    }
}

#[test]
fn test_track_turn_respects_operations() {
    let ctx = ExecutionContext::cpu();
    let tracker = DialogueStateTracker::new(tiny_config(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 1, 12, 4, 13);
    let catalog = slot_catalog();

    let previous = BeliefState::from_entries(&["hotel-area-north", "train-day-friday"]).unwrap();
    let states = tracker
        .track_turn(&batch, &[previous.clone()], &catalog, &vocabulary(), &ctx)
        .unwrap();
    let prediction = &tracker.predict_turn(&batch, &ctx).unwrap()[0];

    for (slot, op) in catalog.slots().iter().zip(&prediction.operations) {
        match op {
            Operation::Carryover => assert_eq!(states[0].get(slot), previous.get(slot)),
            Operation::Delete => assert_eq!(states[0].get(slot), None),
            Operation::Dontcare => assert_eq!(states[0].get(slot), Some("don't care")),
            _ => {}
        }
    }
}

#[test]
fn test_track_turn_rejects_mismatched_inputs() {
    let ctx = ExecutionContext::cpu();
    let tracker = DialogueStateTracker::new(tiny_config(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 2, 12, 4, 13);

    let err = tracker
        .track_turn(&batch, &[BeliefState::new()], &slot_catalog(), &vocabulary(), &ctx)
        .unwrap_err();
    assert!(matches!(err, ModelError::ShapeMismatch { .. }));

    let three_slot_batch = synthetic_turn_batch(&ctx, 1, 12, 3, 13);
    let err = tracker
        .track_turn(
            &three_slot_batch,
            &[BeliefState::new()],
            &slot_catalog(),
            &vocabulary(),
            &ctx,
        )
        .unwrap_err();
    assert!(matches!(err, ModelError::ShapeMismatch { .. }));
}

#[test]
fn test_max_update_override_too_small() {
    let ctx = ExecutionContext::cpu();
    let config = tiny_config();
    let tracker = DialogueStateTracker::new(config.clone(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 1, 12, 4, 6);
    let labels = synthetic_labels(&config, vec![vec![UPDATE, UPDATE, UPDATE, CARRYOVER]], 2, 6);

    let options = ForwardOptions {
        max_update: Some(2),
        ..ForwardOptions::supervised(&labels, DecodeMode::Greedy)
    };
    let err = tracker.forward(&batch, options, &ctx).unwrap_err();
    assert!(matches!(err, ModelError::MaxUpdateExceeded { n_update: 3, .. }));
}

#[test]
fn test_sequence_longer_than_configured() {
    let ctx = ExecutionContext::cpu();
    let tracker = DialogueStateTracker::new(tiny_config(), &ctx).unwrap();
    let batch = synthetic_turn_batch(&ctx, 1, 30, 4, 1);
    let err = tracker.predict_turn(&batch, &ctx).unwrap_err();
    assert!(matches!(err, ModelError::SequenceTooLong { actual: 30, max: 24 }));
}

#[test]
fn test_load_from_var_builder() {
    let ctx = ExecutionContext::cpu();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, ctx.device());
    let tracker = DialogueStateTracker::load(vb, tiny_config()).unwrap();

    // 6 encoder + 4 classifier + 6 decoder tensors
    assert_eq!(varmap.all_vars().len(), 16);

    let batch = synthetic_turn_batch(&ctx, 1, 10, 4, 3);
    let predictions = tracker.predict_turn(&batch, &ctx).unwrap();
    assert_eq!(predictions[0].operations.len(), 4);
}
