//! Operation classifier: a domain label per turn and an operation per slot.

use candle_core::{Device, Tensor, D};
use candle_nn::VarBuilder;
use dialogue_state_core::{ModelConfig, OpSetKind};
use tracing::debug;

use crate::context::{ExecutionContext, TurnBatch};
use crate::encoder::EncoderOutput;
use crate::error::{ModelError, ModelResult};
use crate::layers::Dense;

/// Where per-slot operation ids come from.
#[derive(Debug, Clone, Copy)]
pub enum OpSelection<'a> {
    /// Argmax of the classifier's own scores (inference).
    Predicted,
    /// Gold ids supplied by the caller, one row per turn (training).
    Gold(&'a [Vec<u32>]),
}

/// Classifier result for one batch.
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    /// Domain logits [B, n_domain].
    pub domain_scores: Tensor,
    /// Operation logits [B, S, n_op].
    pub op_scores: Tensor,
    /// Token representation at each slot position [B, S, H].
    pub state_output: Tensor,
    /// Argmax domain per turn.
    pub domain_ids: Vec<u32>,
    /// Operation id per slot, predicted or gold depending on [`OpSelection`].
    pub op_ids: Vec<Vec<u32>>,
}

/// Linear heads over the pooled summary and the slot-position tokens.
#[derive(Debug, Clone)]
pub struct OperationClassifier {
    domain_head: Dense,
    op_head: Dense,
    op_set: OpSetKind,
}

impl OperationClassifier {
    pub fn new(config: &ModelConfig, device: &Device) -> ModelResult<Self> {
        Ok(Self {
            domain_head: Dense::new(config.hidden_size, config.n_domain, 0.17, device)?,
            op_head: Dense::new(config.hidden_size, config.op_set.n_op(), 0.83, device)?,
            op_set: config.op_set,
        })
    }

    /// Load `domain_classifier.*` and `op_classifier.*`.
    pub fn load(vb: VarBuilder, config: &ModelConfig) -> ModelResult<Self> {
        Ok(Self {
            domain_head: Dense::load(vb.pp("domain_classifier"), config.hidden_size, config.n_domain)?,
            op_head: Dense::load(
                vb.pp("op_classifier"),
                config.hidden_size,
                config.op_set.n_op(),
            )?,
            op_set: config.op_set,
        })
    }

    pub fn op_set(&self) -> OpSetKind {
        self.op_set
    }

    pub fn forward(
        &self,
        encoded: &EncoderOutput,
        batch: &TurnBatch,
        selection: OpSelection<'_>,
        _ctx: &ExecutionContext,
    ) -> ModelResult<ClassifierOutput> {
        let domain_scores = self.domain_head.forward(&encoded.pooled_output)?;

        let state_output = gather_slot_tokens(&encoded.sequence_output, &batch.slot_positions)?;
        let op_scores = self.op_head.forward(&state_output)?;

        let domain_ids: Vec<u32> = domain_scores
            .argmax(D::Minus1)
            .map_err(map_candle)?
            .to_vec1()
            .map_err(map_candle)?;

        let op_ids = match selection {
            OpSelection::Predicted => op_scores
                .argmax(D::Minus1)
                .map_err(map_candle)?
                .to_vec2()
                .map_err(map_candle)?,
            OpSelection::Gold(gold) => {
                self.check_gold(gold, batch)?;
                gold.to_vec()
            }
        };

        debug!(
            batch = batch.batch_size(),
            n_slots = batch.n_slots(),
            gold = matches!(selection, OpSelection::Gold(_)),
            "Classified slot operations"
        );

        Ok(ClassifierOutput {
            domain_scores,
            op_scores,
            state_output,
            domain_ids,
            op_ids,
        })
    }

    fn check_gold(&self, gold: &[Vec<u32>], batch: &TurnBatch) -> ModelResult<()> {
        if gold.len() != batch.batch_size() {
            return Err(ModelError::shape("gold op rows", batch.batch_size(), gold.len()));
        }
        for row in gold {
            if row.len() != batch.n_slots() {
                return Err(ModelError::shape("gold op ids", batch.n_slots(), row.len()));
            }
            for &id in row {
                self.op_set.operation(id)?;
            }
        }
        Ok(())
    }
}

/// Pick the representation at each slot's position: [B, T, H] × [B, S] → [B, S, H].
pub fn gather_slot_tokens(sequence_output: &Tensor, slot_positions: &Tensor) -> ModelResult<Tensor> {
    let batch_size = sequence_output.dim(0).map_err(map_candle)?;
    let rows = (0..batch_size)
        .map(|b| {
            let tokens = sequence_output.get(b).map_err(map_candle)?;
            let positions = slot_positions.get(b).map_err(map_candle)?;
            tokens.index_select(&positions, 0).map_err(map_candle)
        })
        .collect::<ModelResult<Vec<_>>>()?;
    Tensor::stack(&rows, 0).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Operation classifier error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn config() -> ModelConfig {
        ModelConfig {
            hidden_size: 4,
            vocab_size: 16,
            max_seq_length: 8,
            n_domain: 3,
            op_set: OpSetKind::Four,
        }
    }

    fn encoded(device: &Device) -> EncoderOutput {
        // Token t carries value t in every hidden unit.
        let data: Vec<f32> = (0..5).flat_map(|t| vec![t as f32; 4]).collect();
        EncoderOutput {
            sequence_output: Tensor::from_vec(data, (1, 5, 4), device).unwrap(),
            pooled_output: Tensor::ones((1, 4), DType::F32, device).unwrap(),
        }
    }

    fn batch(ctx: &ExecutionContext) -> TurnBatch {
        TurnBatch::new(
            ctx,
            &[vec![1, 2, 3, 4, 5]],
            &[vec![0; 5]],
            &[vec![1; 5]],
            &[vec![4, 1, 2]],
        )
        .unwrap()
    }

    #[test]
    fn test_gather_slot_tokens() {
        let ctx = ExecutionContext::cpu();
        let gathered =
            gather_slot_tokens(&encoded(ctx.device()).sequence_output, &batch(&ctx).slot_positions)
                .unwrap();
        assert_eq!(gathered.dims(), &[1, 3, 4]);

        let firsts: Vec<f32> = gathered.get(0).unwrap().narrow(1, 0, 1).unwrap()
            .flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(firsts, vec![4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_predicted_vs_gold_selection() {
        let ctx = ExecutionContext::cpu();
        let classifier = OperationClassifier::new(&config(), ctx.device()).unwrap();
        let enc = encoded(ctx.device());
        let batch = batch(&ctx);

        let predicted = classifier
            .forward(&enc, &batch, OpSelection::Predicted, &ctx)
            .unwrap();
        assert_eq!(predicted.op_scores.dims(), &[1, 3, 4]);
        assert_eq!(predicted.domain_scores.dims(), &[1, 3]);
        assert_eq!(predicted.op_ids[0].len(), 3);

        let gold = vec![vec![1, 3, 0]];
        let forced = classifier
            .forward(&enc, &batch, OpSelection::Gold(&gold), &ctx)
            .unwrap();
        assert_eq!(forced.op_ids, gold);
    }

    #[test]
    fn test_gold_id_outside_op_set() {
        let ctx = ExecutionContext::cpu();
        let classifier = OperationClassifier::new(&config(), ctx.device()).unwrap();
        let gold = vec![vec![1, 3, 4]];
        let err = classifier
            .forward(&encoded(ctx.device()), &batch(&ctx), OpSelection::Gold(&gold), &ctx)
            .unwrap_err();
        assert!(matches!(err, ModelError::Domain(_)));
    }
}
