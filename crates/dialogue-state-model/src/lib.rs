//! Tensor layer of the dialogue state tracker.
//!
//! Per turn, a batch flows through:
//!
//! ```text
//! TurnBatch ─► ContextualEncoder ─► OperationClassifier ─► StateAggregator
//!                    │                    (domain, op per slot)   (UPDATE slots)
//!                    └──────────────► PointerGeneratorDecoder ◄────────┘
//!                                     (slot × step state machine)
//! ```
//!
//! The decoder's hidden state is threaded through every generation step
//! of every update slot of a turn, in catalog order.
//!
//! # Example
//!
//! ```rust,ignore
//! use dialogue_state_model::{DialogueStateTracker, ExecutionContext};
//!
//! let ctx = ExecutionContext::cpu();
//! let tracker = DialogueStateTracker::new(config, &ctx)?;
//! let states = tracker.track_turn(&batch, &previous, &catalog, &vocab, &ctx)?;
//! ```

pub mod aggregator;
pub mod classifier;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod layers;
pub mod loss;
pub mod tracker;

pub use aggregator::{DecoderBatch, StateAggregator};
pub use classifier::{gather_slot_tokens, ClassifierOutput, OpSelection, OperationClassifier};
pub use context::{ExecutionContext, TurnBatch, TurnLabels};
pub use decoder::{
    DecodeCursor, DecodeMode, DecodeStep, DecoderInputs, DecoderOutput, GenerationState,
    PointerGeneratorDecoder, TeacherForcingSchedule,
};
pub use encoder::{ContextualEncoder, EncoderOutput, LookupEncoder};
pub use error::{ModelError, ModelResult};
pub use layers::{Dense, GruCell, RecurrentCell};
pub use loss::{masked_value_cross_entropy, LossComponents, LossConfig, TrackerLoss};
pub use tracker::{DialogueStateTracker, ForwardOptions, TrackerOutput, TurnPrediction};
