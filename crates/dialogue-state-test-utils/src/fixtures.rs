//! Tiny configurations, catalogs and synthetic turn batches.

use dialogue_state_core::{
    DecoderConfig, ModelConfig, OpSetKind, SlotCatalog, TrackerConfig, VocabularyDecoder,
};
use dialogue_state_model::{ExecutionContext, TurnBatch, TurnLabels};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Token table of the tiny vocabulary. Ids 0-4 are special.
pub const TINY_VOCAB: [&str; 32] = [
    "[PAD]", "[CLS]", "[SEP]", "[EOS]", "[SLOT]", "[NULL]", "north", "south", "east", "west",
    "centre", "cheap", "moderate", "expensive", "monday", "tuesday", "friday", "sunday", "the",
    "alpha", "##ville", "lodge", "guest", "house", "09", ":", "15", "17", "30", "yes", "no",
    "hotel",
];

/// Marker token placed at each slot position.
pub const SLOT_TOKEN: u32 = 4;

const FIRST_WORD_ID: u32 = 6;

/// Small but valid configuration: hidden 8, vocabulary 32, four operations.
pub fn tiny_config() -> TrackerConfig {
    TrackerConfig {
        model: ModelConfig {
            hidden_size: 8,
            vocab_size: TINY_VOCAB.len(),
            max_seq_length: 24,
            n_domain: 2,
            op_set: OpSetKind::Four,
        },
        decoder: DecoderConfig {
            pad_id: 0,
            eos_id: 3,
            max_value: 4,
            teacher_forcing_ratio: 0.5,
        },
        ..Default::default()
    }
}

/// Four slots over two domains.
pub fn slot_catalog() -> SlotCatalog {
    SlotCatalog::new(&["hotel-area", "hotel-name", "train-day", "train-leaveat"])
        .expect("fixture catalog is valid")
}

/// Decoder over [`TINY_VOCAB`] skipping pad, cls, sep and slot markers.
pub fn vocabulary() -> VocabularyDecoder {
    VocabularyDecoder::new(TINY_VOCAB.iter().map(|t| t.to_string()).collect(), 3)
        .with_skip_ids([0, 1, 2, SLOT_TOKEN])
}

/// Random turn batch with `n_slots` slot markers right after `[CLS]`.
///
/// Row `b` has its last `b` positions padded, so attention masks differ
/// across rows. `seq_len` must leave room for the markers and at least
/// one word.
pub fn synthetic_turn_batch(
    ctx: &ExecutionContext,
    batch_size: usize,
    seq_len: usize,
    n_slots: usize,
    seed: u64,
) -> TurnBatch {
    assert!(seq_len >= n_slots + 2, "sequence too short for {} slots", n_slots);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut input_ids = Vec::with_capacity(batch_size);
    let mut segment_ids = Vec::with_capacity(batch_size);
    let mut attention_mask = Vec::with_capacity(batch_size);
    let mut slot_positions = Vec::with_capacity(batch_size);

    for row in 0..batch_size {
        let real = (seq_len - row.min(seq_len - n_slots - 2)).max(n_slots + 2);
        let mut ids = vec![0u32; seq_len];
        ids[0] = 1;
        for id in ids.iter_mut().take(n_slots + 1).skip(1) {
            *id = SLOT_TOKEN;
        }
        for id in ids.iter_mut().take(real).skip(n_slots + 1) {
            *id = rng.gen_range(FIRST_WORD_ID..TINY_VOCAB.len() as u32);
        }

        input_ids.push(ids);
        segment_ids.push((0..seq_len).map(|t| u32::from(t > n_slots)).collect());
        attention_mask.push((0..seq_len).map(|t| u32::from(t < real)).collect());
        slot_positions.push((1..=n_slots as u32).collect());
    }

    TurnBatch::new(ctx, &input_ids, &segment_ids, &attention_mask, &slot_positions)
        .expect("synthetic batch is valid")
}

/// Gold labels for `op_ids` under `config`: every UPDATE slot gets a random
/// value of 1..=`value_len` word ids followed by EOS.
pub fn synthetic_labels(
    config: &TrackerConfig,
    op_ids: Vec<Vec<u32>>,
    value_len: usize,
    seed: u64,
) -> TurnLabels {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let update_id = config.model.op_set.update_id();
    let n_domain = config.model.n_domain as u32;

    let domain_ids = (0..op_ids.len()).map(|_| rng.gen_range(0..n_domain)).collect();
    let targets = op_ids
        .iter()
        .map(|row| {
            row.iter()
                .filter(|&&op| op == update_id)
                .map(|_| {
                    let len = rng.gen_range(1..=value_len.max(1));
                    let mut value: Vec<u32> = (0..len)
                        .map(|_| rng.gen_range(FIRST_WORD_ID..TINY_VOCAB.len() as u32))
                        .collect();
                    value.push(config.decoder.eos_id);
                    value
                })
                .collect()
        })
        .collect();

    TurnLabels::new(op_ids, domain_ids, targets, config.decoder.pad_id)
        .expect("synthetic labels are valid")
}
