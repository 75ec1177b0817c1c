//! Execution context and validated per-turn inputs.
//!
//! Feature extraction hands over plain id rows; [`TurnBatch::new`] checks
//! every shape contract once, so the components downstream can index
//! without re-validating.

use candle_core::{Device, Tensor};

use crate::error::{ModelError, ModelResult};

/// Device selection, passed explicitly into every component call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    device: Device,
}

impl ExecutionContext {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

/// A batch of tokenized turn contexts.
#[derive(Debug, Clone)]
pub struct TurnBatch {
    /// Token ids [B, T].
    pub input_ids: Tensor,
    /// Segment ids [B, T].
    pub segment_ids: Tensor,
    /// 1 for real tokens, 0 for padding [B, T].
    pub attention_mask: Tensor,
    /// Index of each slot's marker token [B, S].
    pub slot_positions: Tensor,
    batch_size: usize,
    seq_len: usize,
    n_slots: usize,
}

impl TurnBatch {
    /// Validate host rows and move them onto the context's device.
    pub fn new(
        ctx: &ExecutionContext,
        input_ids: &[Vec<u32>],
        segment_ids: &[Vec<u32>],
        attention_mask: &[Vec<u32>],
        slot_positions: &[Vec<u32>],
    ) -> ModelResult<Self> {
        let batch_size = input_ids.len();
        if batch_size == 0 {
            return Err(ModelError::InvalidInput("empty turn batch".to_string()));
        }

        let seq_len = uniform_width("input_ids", input_ids)?;
        if seq_len == 0 {
            return Err(ModelError::InvalidInput("empty token sequence".to_string()));
        }
        for (what, rows) in [("segment_ids", segment_ids), ("attention_mask", attention_mask)] {
            if rows.len() != batch_size || uniform_width(what, rows)? != seq_len {
                return Err(ModelError::shape(
                    what,
                    (batch_size, seq_len),
                    (rows.len(), rows.first().map_or(0, Vec::len)),
                ));
            }
        }

        if slot_positions.len() != batch_size {
            return Err(ModelError::shape(
                "slot_positions rows",
                batch_size,
                slot_positions.len(),
            ));
        }
        let n_slots = uniform_width("slot_positions", slot_positions)?;
        for (row, positions) in slot_positions.iter().enumerate() {
            for (slot, &position) in positions.iter().enumerate() {
                if position as usize >= seq_len {
                    return Err(ModelError::SlotPositionOutOfBounds {
                        row,
                        slot,
                        position,
                        seq_len,
                    });
                }
            }
        }

        let device = ctx.device();
        Ok(Self {
            input_ids: rows_to_tensor(input_ids, seq_len, device)?,
            segment_ids: rows_to_tensor(segment_ids, seq_len, device)?,
            attention_mask: rows_to_tensor(attention_mask, seq_len, device)?,
            slot_positions: rows_to_tensor(slot_positions, n_slots, device)?,
            batch_size,
            seq_len,
            n_slots,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn n_slots(&self) -> usize {
        self.n_slots
    }
}

/// Gold supervision for a batch. Only available during training.
#[derive(Debug, Clone)]
pub struct TurnLabels {
    /// Gold operation id per slot [B][S].
    pub op_ids: Vec<Vec<u32>>,
    /// Gold domain id per turn [B].
    pub domain_ids: Vec<u32>,
    /// Target ids per update slot, padded to [B][max_update][max_value].
    pub target_ids: Vec<Vec<Vec<u32>>>,
    /// Unpadded number of target sequences per row.
    n_targets: Vec<usize>,
    pad_id: u32,
    max_update: usize,
    max_value: usize,
}

impl TurnLabels {
    /// Pad ragged target sequences with `pad_id`.
    ///
    /// `targets[b]` lists the gold value ids of row `b`'s UPDATE slots in
    /// catalog order.
    pub fn new(
        op_ids: Vec<Vec<u32>>,
        domain_ids: Vec<u32>,
        targets: Vec<Vec<Vec<u32>>>,
        pad_id: u32,
    ) -> ModelResult<Self> {
        let batch_size = op_ids.len();
        if domain_ids.len() != batch_size || targets.len() != batch_size {
            return Err(ModelError::shape(
                "label rows",
                batch_size,
                (domain_ids.len(), targets.len()),
            ));
        }
        uniform_width("op_ids", &op_ids)?;

        let n_targets: Vec<usize> = targets.iter().map(Vec::len).collect();
        let max_update = n_targets.iter().copied().max().unwrap_or(0);
        let max_value = targets
            .iter()
            .flat_map(|row| row.iter().map(Vec::len))
            .max()
            .unwrap_or(0);

        let target_ids = targets
            .into_iter()
            .map(|row| {
                let mut padded: Vec<Vec<u32>> = row
                    .into_iter()
                    .map(|mut seq| {
                        seq.resize(max_value, pad_id);
                        seq
                    })
                    .collect();
                padded.resize(max_update, vec![pad_id; max_value]);
                padded
            })
            .collect();

        Ok(Self {
            op_ids,
            domain_ids,
            target_ids,
            n_targets,
            pad_id,
            max_update,
            max_value,
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn max_update(&self) -> usize {
        self.max_update
    }

    pub fn max_value(&self) -> usize {
        self.max_value
    }

    pub fn op_tensor(&self, ctx: &ExecutionContext) -> ModelResult<Tensor> {
        let width = self.op_ids.first().map_or(0, Vec::len);
        rows_to_tensor(&self.op_ids, width, ctx.device())
    }

    pub fn domain_tensor(&self, ctx: &ExecutionContext) -> ModelResult<Tensor> {
        Tensor::from_slice(&self.domain_ids, self.domain_ids.len(), ctx.device())
            .map_err(map_candle)
    }

    /// Targets as [B, max_update, max_value] u32.
    pub fn target_tensor(&self, ctx: &ExecutionContext) -> ModelResult<Tensor> {
        let flat: Vec<u32> = self.target_ids.iter().flatten().flatten().copied().collect();
        Tensor::from_vec(
            flat,
            (self.target_ids.len(), self.max_update, self.max_value),
            ctx.device(),
        )
        .map_err(map_candle)
    }

    /// Each row must carry exactly one target sequence per gold UPDATE slot.
    pub fn check_update_targets(&self, update_id: u32) -> ModelResult<()> {
        for (row, (ops, &n_targets)) in self.op_ids.iter().zip(&self.n_targets).enumerate() {
            let n_update = ops.iter().filter(|&&op| op == update_id).count();
            if n_update != n_targets {
                return Err(ModelError::shape(
                    &format!("update targets in row {}", row),
                    n_update,
                    n_targets,
                ));
            }
        }
        Ok(())
    }
}

fn uniform_width(what: &str, rows: &[Vec<u32>]) -> ModelResult<usize> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(ModelError::shape(what, width, bad.len()));
    }
    Ok(width)
}

fn rows_to_tensor(rows: &[Vec<u32>], width: usize, device: &Device) -> ModelResult<Tensor> {
    let flat: Vec<u32> = rows.iter().flatten().copied().collect();
    Tensor::from_vec(flat, (rows.len(), width), device).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Turn batch error: {}", e),
    }
}
