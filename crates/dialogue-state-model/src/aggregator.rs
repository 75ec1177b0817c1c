//! State aggregator: gathers the UPDATE slots' representations into a
//! fixed-shape decoder batch.
//!
//! Rows are right-padded with zero vectors up to `max_update`, and a row
//! without updates becomes all zeros, so the decoder runs uniformly
//! whatever the number of updates.

use candle_core::{DType, Tensor};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::{ModelError, ModelResult};

/// Gathered decoder inputs.
#[derive(Debug, Clone)]
pub struct DecoderBatch {
    /// Slot representations [B, max_update, H].
    pub slot_inputs: Tensor,
    /// Catalog indices of the UPDATE slots of each row, in catalog order.
    pub update_slots: Vec<Vec<usize>>,
    pub max_update: usize,
}

impl DecoderBatch {
    /// Number of real (non-padding) update slots in `row`.
    pub fn n_update(&self, row: usize) -> usize {
        self.update_slots.get(row).map_or(0, Vec::len)
    }
}

/// Selects UPDATE slots by operation id.
#[derive(Debug, Clone, Copy)]
pub struct StateAggregator {
    update_id: u32,
}

impl StateAggregator {
    pub fn new(update_id: u32) -> Self {
        Self { update_id }
    }

    pub fn update_id(&self) -> u32 {
        self.update_id
    }

    /// Catalog indices whose operation is UPDATE, in catalog order.
    pub fn update_slots(&self, op_ids: &[Vec<u32>]) -> Vec<Vec<usize>> {
        op_ids
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, &op)| op == self.update_id)
                    .map(|(slot, _)| slot)
                    .collect()
            })
            .collect()
    }

    /// Build the padded decoder batch from `state_output` [B, S, H].
    ///
    /// Without an override, `max_update` is the largest update count in the batch.
    pub fn aggregate(
        &self,
        state_output: &Tensor,
        op_ids: &[Vec<u32>],
        max_update: Option<usize>,
        ctx: &ExecutionContext,
    ) -> ModelResult<DecoderBatch> {
        let (batch_size, n_slots, hidden) = state_output.dims3().map_err(map_candle)?;
        if op_ids.len() != batch_size {
            return Err(ModelError::shape("op id rows", batch_size, op_ids.len()));
        }
        if let Some(bad) = op_ids.iter().find(|row| row.len() != n_slots) {
            return Err(ModelError::shape("op ids per row", n_slots, bad.len()));
        }

        let update_slots = self.update_slots(op_ids);
        let observed = update_slots.iter().map(Vec::len).max().unwrap_or(0);
        let max_update = max_update.unwrap_or(observed);
        if let Some((row, slots)) = update_slots
            .iter()
            .enumerate()
            .find(|(_, slots)| slots.len() > max_update)
        {
            return Err(ModelError::MaxUpdateExceeded {
                row,
                n_update: slots.len(),
                max_update,
            });
        }

        if max_update == 0 {
            debug!(batch = batch_size, "No update slots; decoder batch is empty");
            let slot_inputs = Tensor::zeros((batch_size, 0, hidden), DType::F32, ctx.device())
                .map_err(map_candle)?;
            return Ok(DecoderBatch {
                slot_inputs,
                update_slots,
                max_update,
            });
        }

        let mut rows = Vec::with_capacity(batch_size);
        for (row, slots) in update_slots.iter().enumerate() {
            let n = slots.len();
            let padding = Tensor::zeros((max_update - n, hidden), DType::F32, ctx.device())
                .map_err(map_candle)?;
            let gathered = if n == 0 {
                padding
            } else {
                let index: Vec<u32> = slots.iter().map(|&s| s as u32).collect();
                let index = Tensor::from_vec(index, n, ctx.device()).map_err(map_candle)?;
                let selected = state_output
                    .get(row)
                    .map_err(map_candle)?
                    .index_select(&index, 0)
                    .map_err(map_candle)?;
                if n == max_update {
                    selected
                } else {
                    Tensor::cat(&[selected, padding], 0).map_err(map_candle)?
                }
            };
            rows.push(gathered);
        }

        let slot_inputs = Tensor::stack(&rows, 0).map_err(map_candle)?;

        debug!(
            batch = batch_size,
            max_update = max_update,
            observed_max = observed,
            "Aggregated update slots"
        );

        Ok(DecoderBatch {
            slot_inputs,
            update_slots,
            max_update,
        })
    }
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("State aggregator error: {}", e),
    }
}
