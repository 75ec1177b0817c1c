//! Carried-forward decoding state.

use candle_core::Tensor;

/// Position of the next emission: update slot and generation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeCursor {
    pub slot: usize,
    pub step: usize,
}

impl DecodeCursor {
    /// Cursor after one emission. Rolls over to step 0 of the next slot.
    pub fn advance(self, max_value: usize) -> Self {
        if self.step + 1 >= max_value {
            Self {
                slot: self.slot + 1,
                step: 0,
            }
        } else {
            Self {
                slot: self.slot,
                step: self.step + 1,
            }
        }
    }

    pub fn is_finished(&self, max_update: usize, max_value: usize) -> bool {
        max_value == 0 || self.slot >= max_update
    }
}

/// Recurrent state threaded through every step of every update slot of a turn.
///
/// The hidden state is initialized once from the pooled turn summary and
/// never reset between slots.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub(crate) hidden: Tensor,
    /// Embedding fed at the next step. `None` at step 0 of a slot, where
    /// the slot representation is the input instead.
    pub(crate) pending_input: Option<Tensor>,
    pub(crate) cursor: DecodeCursor,
    pub(crate) max_update: usize,
    pub(crate) max_value: usize,
    pub(crate) emitted: usize,
}

impl GenerationState {
    pub(crate) fn new(hidden: Tensor, max_update: usize, max_value: usize) -> Self {
        Self {
            hidden,
            pending_input: None,
            cursor: DecodeCursor::default(),
            max_update,
            max_value,
            emitted: 0,
        }
    }

    /// Current hidden state [B, H].
    pub fn hidden(&self) -> &Tensor {
        &self.hidden
    }

    pub fn cursor(&self) -> DecodeCursor {
        self.cursor
    }

    pub fn max_update(&self) -> usize {
        self.max_update
    }

    pub fn max_value(&self) -> usize {
        self.max_value
    }

    /// Number of distributions produced so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_finished(self.max_update, self.max_value)
    }

    /// Record an emission: store the new hidden state and the next input,
    /// then move the cursor. The next input is dropped on slot rollover.
    pub(crate) fn advance(&mut self, hidden: Tensor, next_input: Tensor) {
        let next = self.cursor.advance(self.max_value);
        self.pending_input = if next.slot == self.cursor.slot {
            Some(next_input)
        } else {
            None
        };
        self.hidden = hidden;
        self.cursor = next;
        self.emitted += 1;
    }
}
