//! Domain layer for incremental dialogue state tracking.
//!
//! A dialogue's belief state is updated turn by turn: every catalog slot
//! receives one [`Operation`], and slots marked UPDATE receive a freshly
//! generated value. This crate owns everything about that process that
//! does not involve tensors.
//!
//! # Architecture
//!
//! - **SlotCatalog**: ordered `domain-slot` list shared with feature extraction
//! - **OpSetKind**: operation vocabularies (2, 3, 4 or 6 classes)
//! - **BeliefStateUpdater**: merges operations and generated values
//! - **DstEvaluator**: joint goal accuracy, turn slot accuracy, turn slot F1
//!
//! # Example
//!
//! ```rust,ignore
//! use dialogue_state_core::{evaluate_predictions, SlotCatalog};
//!
//! let catalog = SlotCatalog::load(Path::new("slot_meta.json"))?;
//! let summary = evaluate_predictions(&predictions, &labels, &catalog)?;
//! println!("{}", summary.summary());
//! ```

pub mod belief;
pub mod config;
pub mod detokenize;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod operation;
pub mod slot;
pub mod updater;

pub use belief::BeliefState;
pub use config::{DecoderConfig, LoggingConfig, ModelConfig, TrackerConfig, UpdaterConfig};
pub use detokenize::{truncate_at_eos, ValueDecoder, VocabularyDecoder};
pub use error::{DstError, DstResult};
pub use evaluator::{
    evaluate_predictions, wrong_value_counts, DstEvaluator, MetricSummary, PrfScore, WrongCounts,
};
pub use logging::init_logging;
pub use operation::{OpSetKind, Operation};
pub use slot::{SlotCatalog, SlotId};
pub use updater::BeliefStateUpdater;
