//! Contextual representation provider.
//!
//! The tracker only depends on the [`ContextualEncoder`] contract: a
//! per-token representation sequence, a pooled summary, and access to the
//! word-embedding table that the decoder ties its output projection to.
//! [`LookupEncoder`] is a lightweight implementation (embedding lookup plus
//! one projection and a first-token pooler) used for development and
//! tests; a pretrained transformer plugs in behind the same trait.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use dialogue_state_core::ModelConfig;
use tracing::debug;

use crate::context::{ExecutionContext, TurnBatch};
use crate::error::{ModelError, ModelResult};
use crate::layers::{init_weight, Dense};

/// Number of segment (token type) ids.
pub const TYPE_VOCAB_SIZE: usize = 2;

/// Encoder result for one batch.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Per-token representations [B, T, H].
    pub sequence_output: Tensor,
    /// Pooled summary [B, H].
    pub pooled_output: Tensor,
}

/// Produces contextual token representations for a turn batch.
pub trait ContextualEncoder {
    fn hidden_size(&self) -> usize;

    fn max_seq_length(&self) -> usize;

    /// Token embedding table [V, H], shared with the decoder.
    fn word_embeddings(&self) -> &Tensor;

    fn encode(&self, batch: &TurnBatch, ctx: &ExecutionContext) -> ModelResult<EncoderOutput>;

    /// Reject inputs longer than the configured maximum or on another device.
    fn check_input(&self, batch: &TurnBatch, ctx: &ExecutionContext) -> ModelResult<()> {
        if batch.seq_len() > self.max_seq_length() {
            return Err(ModelError::SequenceTooLong {
                actual: batch.seq_len(),
                max: self.max_seq_length(),
            });
        }
        if !batch.input_ids.device().same_device(ctx.device()) {
            return Err(ModelError::InvalidInput(
                "turn batch lives on a different device than the execution context".to_string(),
            ));
        }
        Ok(())
    }
}

/// Embedding-lookup encoder with a single tanh projection.
#[derive(Debug, Clone)]
pub struct LookupEncoder {
    word_embeddings: Tensor,
    type_embeddings: Tensor,
    transform: Dense,
    pooler: Dense,
    hidden_size: usize,
    vocab_size: usize,
    max_seq_length: usize,
}

impl LookupEncoder {
    pub fn new(config: &ModelConfig, device: &Device) -> ModelResult<Self> {
        let h = config.hidden_size;
        Ok(Self {
            word_embeddings: init_weight(config.vocab_size, h, 0.11, device)?,
            type_embeddings: init_weight(TYPE_VOCAB_SIZE, h, 0.47, device)?,
            transform: Dense::new(h, h, 0.23, device)?,
            pooler: Dense::new(h, h, 0.59, device)?,
            hidden_size: h,
            vocab_size: config.vocab_size,
            max_seq_length: config.max_seq_length,
        })
    }

    /// Load BERT-style names: `embeddings.word_embeddings.weight`,
    /// `embeddings.token_type_embeddings.weight`, `encoder.dense.*`, `pooler.dense.*`.
    pub fn load(vb: VarBuilder, config: &ModelConfig) -> ModelResult<Self> {
        let h = config.hidden_size;
        let word_embeddings = vb
            .get((config.vocab_size, h), "embeddings.word_embeddings.weight")
            .map_err(map_candle)?;
        let type_embeddings = vb
            .get((TYPE_VOCAB_SIZE, h), "embeddings.token_type_embeddings.weight")
            .map_err(map_candle)?;
        Ok(Self {
            word_embeddings,
            type_embeddings,
            transform: Dense::load(vb.pp("encoder.dense"), h, h)?,
            pooler: Dense::load(vb.pp("pooler.dense"), h, h)?,
            hidden_size: h,
            vocab_size: config.vocab_size,
            max_seq_length: config.max_seq_length,
        })
    }

    fn check_ids(&self, batch: &TurnBatch) -> ModelResult<()> {
        let max_of = |t: &Tensor| -> ModelResult<u32> {
            let rows: Vec<Vec<u32>> = t.to_vec2().map_err(map_candle)?;
            Ok(rows.into_iter().flatten().max().unwrap_or(0))
        };

        let max_token = max_of(&batch.input_ids)?;
        if max_token as usize >= self.vocab_size {
            return Err(ModelError::InvalidInput(format!(
                "token id {} outside vocabulary of {}",
                max_token, self.vocab_size
            )));
        }
        let max_segment = max_of(&batch.segment_ids)?;
        if max_segment as usize >= TYPE_VOCAB_SIZE {
            return Err(ModelError::InvalidInput(format!(
                "segment id {} outside {} token types",
                max_segment, TYPE_VOCAB_SIZE
            )));
        }
        Ok(())
    }
}

impl ContextualEncoder for LookupEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    fn word_embeddings(&self) -> &Tensor {
        &self.word_embeddings
    }

    fn encode(&self, batch: &TurnBatch, ctx: &ExecutionContext) -> ModelResult<EncoderOutput> {
        self.check_input(batch, ctx)?;
        self.check_ids(batch)?;

        let (b, t, h) = (batch.batch_size(), batch.seq_len(), self.hidden_size);

        let lookup = |table: &Tensor, ids: &Tensor| -> ModelResult<Tensor> {
            let flat = ids.flatten_all().map_err(map_candle)?;
            table
                .index_select(&flat, 0)
                .map_err(map_candle)?
                .reshape((b, t, h))
                .map_err(map_candle)
        };

        let embedded = (lookup(&self.word_embeddings, &batch.input_ids)?
            + lookup(&self.type_embeddings, &batch.segment_ids)?)
        .map_err(map_candle)?;

        let sequence_output = self
            .transform
            .forward(&embedded)?
            .tanh()
            .map_err(map_candle)?;

        // Pool the first ([CLS]) position
        let first = sequence_output
            .narrow(1, 0, 1)
            .map_err(map_candle)?
            .squeeze(1)
            .map_err(map_candle)?;
        let pooled_output = self.pooler.forward(&first)?.tanh().map_err(map_candle)?;

        debug!(batch = b, seq_len = t, hidden = h, "Encoded turn batch");

        Ok(EncoderOutput {
            sequence_output,
            pooled_output,
        })
    }
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Encoder error: {}", e),
    }
}
