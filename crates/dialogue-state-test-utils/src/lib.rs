//! Deterministic fixtures for dialogue state tracking tests.
//!
//! Everything here is seeded, so two calls with the same arguments build
//! identical tensors.

pub mod fixtures;

pub use fixtures::{
    slot_catalog, synthetic_labels, synthetic_turn_batch, tiny_config, vocabulary, SLOT_TOKEN,
    TINY_VOCAB,
};
