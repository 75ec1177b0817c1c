//! Sequential pointer-generator decoder.
//!
//! Decoding is an explicit two-level state machine: a [`DecodeCursor`]
//! walks update slots in order and, within each slot, a fixed number of
//! generation steps. The recurrent hidden state lives in
//! [`GenerationState`] and is carried from the last step of one slot into
//! the first step of the next, so later slots are conditioned on what was
//! generated for earlier ones.
//!
//! Each step mixes two distributions over the vocabulary:
//!
//! ```text
//! p_final = p_gen · softmax(h · Eᵀ) + (1 − p_gen) · copy(attention)
//! ```
//!
//! where `E` is the encoder's word-embedding table and `copy` scatters
//! attention over input positions onto the token ids at those positions.

mod schedule;
mod state;

pub use schedule::TeacherForcingSchedule;
pub use state::{DecodeCursor, GenerationState};

use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::layers::{Dense, GruCell, RecurrentCell};

/// Large negative bias added to attention scores at padding positions.
const MASK_BIAS: f64 = 1e4;

/// How the next recurrent input is chosen after each emission.
#[derive(Debug, Clone, Copy)]
pub enum DecodeMode<'a> {
    /// Feed the embedding of the emitted argmax token.
    Greedy,
    /// Feed the embedding of the gold token; targets are [B, max_update, max_value] u32.
    TeacherForced(&'a Tensor),
}

impl DecodeMode<'_> {
    pub fn is_teacher_forced(&self) -> bool {
        matches!(self, DecodeMode::TeacherForced(_))
    }
}

/// Per-turn tensors the decoder attends over.
#[derive(Debug, Clone, Copy)]
pub struct DecoderInputs<'a> {
    /// Word-embedding table [V, H], tied with the encoder.
    pub embeddings: &'a Tensor,
    /// Contextual token representations [B, T, H].
    pub sequence_output: &'a Tensor,
    /// Token ids [B, T] u32, targets of the copy distribution.
    pub input_ids: &'a Tensor,
    /// 1 for attendable positions, 0 for padding [B, T].
    pub attention_mask: &'a Tensor,
    /// Gathered update-slot representations [B, max_update, H].
    pub slot_inputs: &'a Tensor,
    /// Initial hidden state [B, H], normally the pooled turn summary.
    pub initial_hidden: &'a Tensor,
}

/// One emission of the state machine.
#[derive(Debug, Clone)]
pub struct DecodeStep {
    /// Slot and step this emission belongs to.
    pub cursor: DecodeCursor,
    /// Final mixed distribution [B, V].
    pub distribution: Tensor,
    /// Vocabulary (generation) distribution [B, V].
    pub vocab_distribution: Tensor,
    /// Copy distribution [B, V].
    pub copy_distribution: Tensor,
    /// Attention over input positions [B, T].
    pub attention: Tensor,
    /// Generation gate [B, 1].
    pub p_gen: Tensor,
    /// Argmax of `distribution` per row.
    pub token_ids: Vec<u32>,
}

/// Decoding result for a whole turn batch.
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// Token distributions [B, max_update, max_value, V].
    pub scores: Tensor,
    /// Argmax token ids [B][max_update][max_value].
    pub token_ids: Vec<Vec<Vec<u32>>>,
    /// Hidden state after the last emission [B, H].
    pub final_hidden: Tensor,
}

impl DecoderOutput {
    pub fn max_update(&self) -> usize {
        self.token_ids.first().map_or(0, Vec::len)
    }

    pub fn max_value(&self) -> usize {
        self.token_ids
            .first()
            .and_then(|row| row.first())
            .map_or(0, Vec::len)
    }
}

/// Pointer-generator over a recurrent cell.
#[derive(Debug, Clone)]
pub struct PointerGeneratorDecoder<C: RecurrentCell = GruCell> {
    cell: C,
    /// [w; h; context] (3H) → 1
    gate: Dense,
    hidden_size: usize,
}

impl PointerGeneratorDecoder<GruCell> {
    pub fn new(hidden_size: usize, device: &Device) -> ModelResult<Self> {
        Self::with_cell(
            GruCell::new(hidden_size, hidden_size, device)?,
            Dense::new(3 * hidden_size, 1, 0.41, device)?,
        )
    }

    /// Load `gru.*` and `w_gen.*` under the builder's prefix.
    pub fn load(vb: VarBuilder, hidden_size: usize) -> ModelResult<Self> {
        Self::with_cell(
            GruCell::load(vb.pp("gru"), hidden_size, hidden_size)?,
            Dense::load(vb.pp("w_gen"), 3 * hidden_size, 1)?,
        )
    }
}

impl<C: RecurrentCell> PointerGeneratorDecoder<C> {
    pub fn with_cell(cell: C, gate: Dense) -> ModelResult<Self> {
        let hidden_size = cell.hidden_size();
        if cell.input_size() != hidden_size {
            return Err(ModelError::shape(
                "recurrent cell input size",
                hidden_size,
                cell.input_size(),
            ));
        }
        if gate.in_dim() != 3 * hidden_size || gate.out_dim() != 1 {
            return Err(ModelError::shape(
                "generation gate",
                (1, 3 * hidden_size),
                (gate.out_dim(), gate.in_dim()),
            ));
        }
        Ok(Self {
            cell,
            gate,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Start a turn: hidden state from `initial_hidden`, cursor at slot 0 step 0.
    pub fn begin(&self, inputs: &DecoderInputs<'_>, max_value: usize) -> ModelResult<GenerationState> {
        let (batch_size, max_update) = self.check_inputs(inputs)?;
        let hidden_dims = inputs.initial_hidden.dims();
        if hidden_dims != [batch_size, self.hidden_size] {
            return Err(ModelError::shape(
                "initial hidden",
                (batch_size, self.hidden_size),
                hidden_dims,
            ));
        }
        Ok(GenerationState::new(
            inputs.initial_hidden.clone(),
            max_update,
            max_value,
        ))
    }

    /// Produce the emission at `state`'s cursor and advance it.
    ///
    /// Returns `None` once every (slot, step) pair has been emitted.
    pub fn step(
        &self,
        inputs: &DecoderInputs<'_>,
        state: &mut GenerationState,
        mode: DecodeMode<'_>,
    ) -> ModelResult<Option<DecodeStep>> {
        if state.is_finished() {
            return Ok(None);
        }
        let cursor = state.cursor();

        let input = match &state.pending_input {
            Some(embedded) => embedded.clone(),
            None => inputs
                .slot_inputs
                .narrow(1, cursor.slot, 1)
                .map_err(map_candle)?
                .squeeze(1)
                .map_err(map_candle)?
                .contiguous()
                .map_err(map_candle)?,
        };

        let hidden = self.cell.step(&input, state.hidden())?;

        // Attention over input positions, padding pushed to ~0
        let scores = inputs
            .sequence_output
            .matmul(&hidden.unsqueeze(2).map_err(map_candle)?)
            .map_err(map_candle)?
            .squeeze(2)
            .map_err(map_candle)?;
        let mask_bias = inputs
            .attention_mask
            .to_dtype(DType::F32)
            .map_err(map_candle)?
            .affine(MASK_BIAS, -MASK_BIAS)
            .map_err(map_candle)?;
        let attention = candle_nn::ops::softmax(&(scores + mask_bias).map_err(map_candle)?, D::Minus1)
            .map_err(map_candle)?;

        let vocab_logits = hidden
            .matmul(&inputs.embeddings.t().map_err(map_candle)?)
            .map_err(map_candle)?;
        let vocab_distribution =
            candle_nn::ops::softmax(&vocab_logits, D::Minus1).map_err(map_candle)?;

        // Positions sharing a token id sum their attention
        let copy_distribution = vocab_distribution
            .zeros_like()
            .map_err(map_candle)?
            .scatter_add(inputs.input_ids, &attention, 1)
            .map_err(map_candle)?;

        let context = attention
            .unsqueeze(1)
            .map_err(map_candle)?
            .matmul(inputs.sequence_output)
            .map_err(map_candle)?
            .squeeze(1)
            .map_err(map_candle)?;

        let gate_input = Tensor::cat(&[&input, &hidden, &context], 1).map_err(map_candle)?;
        let p_gen = candle_nn::ops::sigmoid(&self.gate.forward(&gate_input)?).map_err(map_candle)?;
        let p_copy = p_gen.affine(-1.0, 1.0).map_err(map_candle)?;

        let distribution = (vocab_distribution.broadcast_mul(&p_gen).map_err(map_candle)?
            + copy_distribution.broadcast_mul(&p_copy).map_err(map_candle)?)
        .map_err(map_candle)?;

        let argmax = distribution.argmax(D::Minus1).map_err(map_candle)?;
        let token_ids: Vec<u32> = argmax.to_vec1().map_err(map_candle)?;

        let next_ids = match mode {
            DecodeMode::Greedy => argmax,
            DecodeMode::TeacherForced(targets) => targets
                .narrow(1, cursor.slot, 1)
                .map_err(map_candle)?
                .narrow(2, cursor.step, 1)
                .map_err(map_candle)?
                .flatten_all()
                .map_err(map_candle)?,
        };
        let next_input = inputs
            .embeddings
            .index_select(&next_ids, 0)
            .map_err(map_candle)?;

        state.advance(hidden, next_input);

        Ok(Some(DecodeStep {
            cursor,
            distribution,
            vocab_distribution,
            copy_distribution,
            attention,
            p_gen,
            token_ids,
        }))
    }

    /// Run the state machine to completion.
    ///
    /// Always emits exactly `max_update × max_value` distributions; either
    /// bound being zero yields an empty score tensor.
    pub fn decode(
        &self,
        inputs: &DecoderInputs<'_>,
        max_value: usize,
        mode: DecodeMode<'_>,
    ) -> ModelResult<DecoderOutput> {
        let mut state = self.begin(inputs, max_value)?;
        let (batch_size, max_update) = (inputs.slot_inputs.dim(0).map_err(map_candle)?, state.max_update());
        let vocab_size = inputs.embeddings.dim(0).map_err(map_candle)?;

        if let DecodeMode::TeacherForced(targets) = mode {
            if targets.dims() != [batch_size, max_update, max_value] {
                return Err(ModelError::shape(
                    "teacher-forcing targets",
                    (batch_size, max_update, max_value),
                    targets.dims(),
                ));
            }
        }

        if state.is_finished() {
            debug!(
                batch = batch_size,
                max_update = max_update,
                max_value = max_value,
                "Nothing to decode"
            );
            let scores = Tensor::zeros(
                (batch_size, max_update, max_value, vocab_size),
                DType::F32,
                inputs.embeddings.device(),
            )
            .map_err(map_candle)?;
            return Ok(DecoderOutput {
                scores,
                token_ids: vec![vec![vec![0; max_value]; max_update]; batch_size],
                final_hidden: state.hidden().clone(),
            });
        }

        let mut token_ids = vec![vec![Vec::with_capacity(max_value); max_update]; batch_size];
        let mut slot_scores = Vec::with_capacity(max_update);
        let mut step_scores = Vec::with_capacity(max_value);

        while let Some(emission) = self.step(inputs, &mut state, mode)? {
            for (row, &id) in emission.token_ids.iter().enumerate() {
                token_ids[row][emission.cursor.slot].push(id);
            }
            step_scores.push(emission.distribution);
            if step_scores.len() == max_value {
                let slot = Tensor::stack(&step_scores, 1).map_err(map_candle)?;
                slot_scores.push(slot);
                step_scores.clear();
            }
        }
        let scores = Tensor::stack(&slot_scores, 1).map_err(map_candle)?;

        debug!(
            batch = batch_size,
            max_update = max_update,
            max_value = max_value,
            emissions = state.emitted(),
            teacher_forced = mode.is_teacher_forced(),
            "Decoded update slots"
        );

        Ok(DecoderOutput {
            scores,
            token_ids,
            final_hidden: state.hidden().clone(),
        })
    }

    fn check_inputs(&self, inputs: &DecoderInputs<'_>) -> ModelResult<(usize, usize)> {
        let (b, t, h) = inputs.sequence_output.dims3().map_err(map_candle)?;
        if h != self.hidden_size {
            return Err(ModelError::shape("sequence hidden size", self.hidden_size, h));
        }
        for (what, tensor) in [
            ("input_ids", inputs.input_ids),
            ("attention_mask", inputs.attention_mask),
        ] {
            if tensor.dims() != [b, t] {
                return Err(ModelError::shape(what, (b, t), tensor.dims()));
            }
        }
        let (_, eh) = inputs.embeddings.dims2().map_err(map_candle)?;
        if eh != self.hidden_size {
            return Err(ModelError::shape("embedding width", self.hidden_size, eh));
        }
        let (sb, max_update, sh) = inputs.slot_inputs.dims3().map_err(map_candle)?;
        if sb != b || sh != self.hidden_size {
            return Err(ModelError::shape(
                "slot inputs",
                (b, "max_update", self.hidden_size),
                (sb, max_update, sh),
            ));
        }
        Ok((b, max_update))
    }
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Decoder error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: usize = 8;
    const V: usize = 64;
    const COPY_ID: u32 = 57;

    struct Fixture {
        embeddings: Tensor,
        sequence_output: Tensor,
        input_ids: Tensor,
        attention_mask: Tensor,
        slot_inputs: Tensor,
        initial_hidden: Tensor,
    }

    impl Fixture {
        fn new(ids: Vec<u32>, mask: Vec<u32>, max_update: usize) -> Self {
            let device = Device::Cpu;
            let t = ids.len();
            let embeddings = crate::layers::init_weight(V, H, 0.13, &device).unwrap();
            let sequence_output = crate::layers::init_weight(t, H, 0.77, &device)
                .unwrap()
                .unsqueeze(0)
                .unwrap();
            let slot_inputs = crate::layers::init_weight(max_update, H, 0.29, &device)
                .unwrap()
                .unsqueeze(0)
                .unwrap();
            Self {
                embeddings,
                sequence_output,
                input_ids: Tensor::from_vec(ids, (1, t), &device).unwrap(),
                attention_mask: Tensor::from_vec(mask, (1, t), &device).unwrap(),
                slot_inputs,
                initial_hidden: Tensor::full(0.1f32, (1, H), &device).unwrap(),
            }
        }

        fn inputs(&self) -> DecoderInputs<'_> {
            DecoderInputs {
                embeddings: &self.embeddings,
                sequence_output: &self.sequence_output,
                input_ids: &self.input_ids,
                attention_mask: &self.attention_mask,
                slot_inputs: &self.slot_inputs,
                initial_hidden: &self.initial_hidden,
            }
        }
    }

    fn decoder() -> PointerGeneratorDecoder {
        PointerGeneratorDecoder::new(H, &Device::Cpu).unwrap()
    }

    fn row(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_emission_count_and_shape() {
        let fx = Fixture::new(vec![2, 5, 9, 11], vec![1; 4], 3);
        let out = decoder().decode(&fx.inputs(), 4, DecodeMode::Greedy).unwrap();

        assert_eq!(out.scores.dims(), &[1, 3, 4, V]);
        assert_eq!(out.max_update(), 3);
        assert_eq!(out.max_value(), 4);

        // Every emission is a distribution
        let sums: Vec<f32> = row(&out.scores.sum(D::Minus1).unwrap());
        assert_eq!(sums.len(), 12);
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_copy_mass_lands_on_input_token() {
        let fx = Fixture::new(vec![COPY_ID, 9, 9], vec![1, 0, 0], 1);
        let dec = decoder();
        let inputs = fx.inputs();
        let mut state = dec.begin(&inputs, 2).unwrap();
        let step = dec.step(&inputs, &mut state, DecodeMode::Greedy).unwrap().unwrap();

        let copy = row(&step.copy_distribution);
        assert!((copy[COPY_ID as usize] - 1.0).abs() < 1e-4);
        assert!(copy[9] < 1e-4);

        let p_copy = 1.0 - row(&step.p_gen)[0];
        let final_dist = row(&step.distribution);
        assert!(final_dist[COPY_ID as usize] >= p_copy - 1e-5);
    }

    #[test]
    fn test_repeated_ids_accumulate_attention() {
        let fx = Fixture::new(vec![COPY_ID, 4, COPY_ID, 4], vec![1; 4], 1);
        let dec = decoder();
        let inputs = fx.inputs();
        let mut state = dec.begin(&inputs, 1).unwrap();
        let step = dec.step(&inputs, &mut state, DecodeMode::Greedy).unwrap().unwrap();

        let attention = row(&step.attention);
        let copy = row(&step.copy_distribution);
        assert!((copy[COPY_ID as usize] - (attention[0] + attention[2])).abs() < 1e-5);
        assert!((copy[4] - (attention[1] + attention[3])).abs() < 1e-5);
    }

    #[test]
    fn test_hidden_state_carries_across_slots() {
        let fx = Fixture::new(vec![2, 5, 9, 11], vec![1; 4], 2);
        let dec = decoder();
        let inputs = fx.inputs();
        let mut state = dec.begin(&inputs, 3).unwrap();
        for _ in 0..3 {
            dec.step(&inputs, &mut state, DecodeMode::Greedy).unwrap();
        }
        assert_eq!(state.cursor(), DecodeCursor { slot: 1, step: 0 });
        assert_ne!(row(state.hidden()), row(&fx.initial_hidden));

        // Slot 1 step 0 from the carried state vs. from a fresh state
        let carried = dec.step(&inputs, &mut state, DecodeMode::Greedy).unwrap().unwrap();
        let only_second = fx.slot_inputs.narrow(1, 1, 1).unwrap();
        let fresh_inputs = DecoderInputs {
            slot_inputs: &only_second,
            ..inputs
        };
        let mut fresh_state = dec.begin(&fresh_inputs, 3).unwrap();
        let fresh = dec.step(&fresh_inputs, &mut fresh_state, DecodeMode::Greedy).unwrap().unwrap();
        assert_ne!(row(&carried.distribution), row(&fresh.distribution));
    }

    #[test]
    fn test_slot_order_changes_output() {
        let fx = Fixture::new(vec![2, 5, 9, 11], vec![1; 4], 2);
        let dec = decoder();

        let forward = dec.decode(&fx.inputs(), 2, DecodeMode::Greedy).unwrap();

        let swapped = Tensor::cat(
            &[
                fx.slot_inputs.narrow(1, 1, 1).unwrap(),
                fx.slot_inputs.narrow(1, 0, 1).unwrap(),
            ],
            1,
        )
        .unwrap();
        let reversed = dec
            .decode(
                &DecoderInputs {
                    slot_inputs: &swapped,
                    ..fx.inputs()
                },
                2,
                DecodeMode::Greedy,
            )
            .unwrap();

        // Original slot 1 decoded second vs. first
        let second = row(&forward.scores.narrow(1, 1, 1).unwrap());
        let first = row(&reversed.scores.narrow(1, 0, 1).unwrap());
        assert_ne!(second, first);
    }

    #[test]
    fn test_teacher_forcing_with_own_argmax_matches_greedy() {
        let fx = Fixture::new(vec![2, 5, 9, 11], vec![1, 1, 1, 0], 2);
        let dec = decoder();
        let greedy = dec.decode(&fx.inputs(), 3, DecodeMode::Greedy).unwrap();

        let flat: Vec<u32> = greedy.token_ids.iter().flatten().flatten().copied().collect();
        let targets = Tensor::from_vec(flat, (1, 2, 3), &Device::Cpu).unwrap();
        let forced = dec
            .decode(&fx.inputs(), 3, DecodeMode::TeacherForced(&targets))
            .unwrap();

        assert_eq!(row(&greedy.scores), row(&forced.scores));
        assert_eq!(greedy.token_ids, forced.token_ids);
    }

    #[test]
    fn test_teacher_forcing_changes_later_steps() {
        let fx = Fixture::new(vec![2, 5, 9, 11], vec![1; 4], 1);
        let dec = decoder();
        let greedy = dec.decode(&fx.inputs(), 2, DecodeMode::Greedy).unwrap();

        // Force a token different from the greedy first emission
        let first = greedy.token_ids[0][0][0];
        let forced_id = if first == 1 { 2 } else { 1 };
        let targets = Tensor::from_vec(vec![forced_id, 0u32], (1, 1, 2), &Device::Cpu).unwrap();
        let forced = dec
            .decode(&fx.inputs(), 2, DecodeMode::TeacherForced(&targets))
            .unwrap();

        let step = |out: &DecoderOutput, k| row(&out.scores.narrow(2, k, 1).unwrap());
        assert_eq!(step(&greedy, 0), step(&forced, 0));
        assert_ne!(step(&greedy, 1), step(&forced, 1));
    }

    #[test]
    fn test_zero_bounds_do_not_crash() {
        let dec = decoder();

        let no_slots = Fixture::new(vec![2, 5], vec![1, 1], 0);
        let out = dec.decode(&no_slots.inputs(), 4, DecodeMode::Greedy).unwrap();
        assert_eq!(out.scores.dims(), &[1, 0, 4, V]);
        assert!(out.token_ids[0].is_empty());

        let no_steps = Fixture::new(vec![2, 5], vec![1, 1], 2);
        let out = dec.decode(&no_steps.inputs(), 0, DecodeMode::Greedy).unwrap();
        assert_eq!(out.scores.dims(), &[1, 2, 0, V]);
        assert_eq!(out.token_ids[0], vec![Vec::<u32>::new(), Vec::new()]);
    }

    #[test]
    fn test_teacher_targets_shape_checked() {
        let fx = Fixture::new(vec![2, 5, 9], vec![1; 3], 2);
        let targets = Tensor::zeros((1, 2, 5), DType::U32, &Device::Cpu).unwrap();
        let err = decoder()
            .decode(&fx.inputs(), 3, DecodeMode::TeacherForced(&targets))
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }
}
