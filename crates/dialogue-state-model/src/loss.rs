//! Training objectives for the tracker.
//!
//! Three components:
//! 1. Masked value cross-entropy over generated distributions (pad targets ignored)
//! 2. Operation cross-entropy over every slot
//! 3. Domain cross-entropy over turns (optional)

use candle_core::{DType, Tensor, D};

use crate::context::{ExecutionContext, TurnLabels};
use crate::error::{ModelError, ModelResult};

/// Probability floor applied before `log`.
const PROB_FLOOR: f64 = 1e-10;

/// Loss weights.
#[derive(Debug, Clone)]
pub struct LossConfig {
    /// Weight for the value generation loss (default: 1.0).
    pub lambda_generation: f32,
    /// Weight for the operation loss (default: 1.0).
    pub lambda_operation: f32,
    /// Weight for the domain loss (default: 1.0).
    pub lambda_domain: f32,
    /// Drop the domain term entirely.
    pub exclude_domain: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            lambda_generation: 1.0,
            lambda_operation: 1.0,
            lambda_domain: 1.0,
            exclude_domain: false,
        }
    }
}

/// Per-component loss values for logging.
#[derive(Debug, Clone, Default)]
pub struct LossComponents {
    pub generation: f32,
    pub operation: f32,
    pub domain: f32,
    pub total: f32,
}

/// Combined tracker loss.
#[derive(Debug, Clone, Default)]
pub struct TrackerLoss {
    config: LossConfig,
}

impl TrackerLoss {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Weighted sum of the components.
    ///
    /// `gen_scores` must be [B, max_update, max_value, V] with the label
    /// batch's padded target dimensions.
    pub fn compute(
        &self,
        domain_scores: &Tensor,
        op_scores: &Tensor,
        gen_scores: &Tensor,
        labels: &TurnLabels,
        ctx: &ExecutionContext,
    ) -> ModelResult<(Tensor, LossComponents)> {
        let targets = labels.target_tensor(ctx)?;
        let l_generation = masked_value_cross_entropy(gen_scores, &targets, labels.pad_id())?;
        let l_operation = class_cross_entropy(op_scores, &labels.op_tensor(ctx)?)?;
        let l_domain = if self.config.exclude_domain {
            scalar(0.0, ctx)?
        } else {
            class_cross_entropy(domain_scores, &labels.domain_tensor(ctx)?)?
        };

        let total = l_generation
            .affine(self.config.lambda_generation as f64, 0.0)
            .map_err(map_candle)?
            .add(
                &l_operation
                    .affine(self.config.lambda_operation as f64, 0.0)
                    .map_err(map_candle)?,
            )
            .map_err(map_candle)?
            .add(
                &l_domain
                    .affine(self.config.lambda_domain as f64, 0.0)
                    .map_err(map_candle)?,
            )
            .map_err(map_candle)?;

        let components = LossComponents {
            generation: tensor_to_f32(&l_generation)?,
            operation: tensor_to_f32(&l_operation)?,
            domain: tensor_to_f32(&l_domain)?,
            total: tensor_to_f32(&total)?,
        };

        Ok((total, components))
    }
}

/// Mean negative log-probability of the gold tokens.
///
/// `scores` holds probabilities [B, U, K, V], `targets` ids [B, U, K].
/// Positions whose target is `pad_id` are excluded; with no real target
/// the loss is zero.
pub fn masked_value_cross_entropy(scores: &Tensor, targets: &Tensor, pad_id: u32) -> ModelResult<Tensor> {
    let dims = scores.dims();
    let (b, u, k, v) = match dims {
        &[b, u, k, v] => (b, u, k, v),
        other => return Err(ModelError::shape("generation scores", "[B, U, K, V]", other)),
    };
    if targets.dims() != [b, u, k] {
        return Err(ModelError::shape("value targets", (b, u, k), targets.dims()));
    }

    let n = b * u * k;
    let device = scores.device();
    let target_ids: Vec<u32> = targets.flatten_all().map_err(map_candle)?.to_vec1().map_err(map_candle)?;
    let mask: Vec<f32> = target_ids
        .iter()
        .map(|&id| if id == pad_id { 0.0 } else { 1.0 })
        .collect();
    let n_real: f32 = mask.iter().sum();
    if n == 0 || n_real == 0.0 {
        return Tensor::zeros((), DType::F32, device).map_err(map_candle);
    }
    if let Some(&bad) = target_ids.iter().find(|&&id| id as usize >= v) {
        return Err(ModelError::InvalidInput(format!(
            "target id {} outside vocabulary of {}",
            bad, v
        )));
    }

    let flat = scores.reshape((n, v)).map_err(map_candle)?;
    let index = Tensor::from_vec(target_ids, (n, 1), device).map_err(map_candle)?;
    let log_probs = flat
        .gather(&index, 1)
        .map_err(map_candle)?
        .squeeze(1)
        .map_err(map_candle)?
        .clamp(PROB_FLOOR, 1.0)
        .map_err(map_candle)?
        .log()
        .map_err(map_candle)?;
    let mask = Tensor::from_vec(mask, n, device).map_err(map_candle)?;

    (log_probs * mask)
        .map_err(map_candle)?
        .sum_all()
        .map_err(map_candle)?
        .affine(-1.0 / n_real as f64, 0.0)
        .map_err(map_candle)
}

/// Cross-entropy over the last dimension of `logits` [.., C] with u32 `labels` [..].
pub fn class_cross_entropy(logits: &Tensor, labels: &Tensor) -> ModelResult<Tensor> {
    let classes = logits.dim(D::Minus1).map_err(map_candle)?;
    let n = labels.elem_count();
    if logits.elem_count() != n * classes {
        return Err(ModelError::shape("class logits", (n, classes), logits.dims()));
    }
    if n == 0 {
        return Tensor::zeros((), DType::F32, logits.device()).map_err(map_candle);
    }

    let flat = logits.reshape((n, classes)).map_err(map_candle)?;
    let log_softmax = candle_nn::ops::log_softmax(&flat, D::Minus1).map_err(map_candle)?;
    let index = labels
        .flatten_all()
        .map_err(map_candle)?
        .unsqueeze(1)
        .map_err(map_candle)?;
    log_softmax
        .gather(&index, 1)
        .map_err(map_candle)?
        .mean_all()
        .map_err(map_candle)?
        .neg()
        .map_err(map_candle)
}

fn scalar(value: f32, ctx: &ExecutionContext) -> ModelResult<Tensor> {
    Tensor::new(value, ctx.device()).map_err(map_candle)
}

fn tensor_to_f32(t: &Tensor) -> ModelResult<f32> {
    t.to_dtype(DType::F32)
        .map_err(map_candle)?
        .to_scalar::<f32>()
        .map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Loss computation error: {}", e),
    }
}
