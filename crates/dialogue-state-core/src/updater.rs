//! Belief-state updater: merges per-slot operations and generated values
//! into the next turn's belief state.

use tracing::debug;

use crate::belief::BeliefState;
use crate::config::UpdaterConfig;
use crate::detokenize::ValueDecoder;
use crate::error::{DstError, DstResult};
use crate::operation::Operation;
use crate::slot::SlotCatalog;

/// Applies one turn of operations to a previous belief state.
#[derive(Debug, Clone, Default)]
pub struct BeliefStateUpdater {
    config: UpdaterConfig,
}

impl BeliefStateUpdater {
    pub fn new(config: UpdaterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Produce the next belief state.
    ///
    /// `operations` holds one entry per catalog slot. `generated` holds one
    /// id sequence per UPDATE slot, in catalog order; extra entries (padding
    /// rows of the decoder batch) are ignored.
    pub fn apply(
        &self,
        catalog: &SlotCatalog,
        previous: &BeliefState,
        operations: &[Operation],
        generated: &[Vec<u32>],
        decoder: &dyn ValueDecoder,
    ) -> DstResult<BeliefState> {
        if operations.len() != catalog.len() {
            return Err(DstError::LengthMismatch {
                what: "operations".to_string(),
                expected: catalog.len(),
                actual: operations.len(),
            });
        }

        let n_update = operations
            .iter()
            .filter(|&&op| op == Operation::Update)
            .count();
        if generated.len() < n_update {
            return Err(DstError::LengthMismatch {
                what: "generated values".to_string(),
                expected: n_update,
                actual: generated.len(),
            });
        }

        let mut next = previous.clone();
        let mut values = generated.iter();

        for (slot, &op) in catalog.slots().iter().zip(operations) {
            match op {
                Operation::Carryover => {}
                Operation::Delete => {
                    next.remove(slot);
                }
                Operation::Dontcare => next.set(slot.clone(), self.config.dontcare_value.clone()),
                Operation::Yes => next.set(slot.clone(), "yes"),
                Operation::No => next.set(slot.clone(), "no"),
                Operation::Update => {
                    let ids = values.next().map(Vec::as_slice).unwrap_or_default();
                    let value = decoder.decode_generated(ids);
                    if value.is_empty() || value == self.config.null_value {
                        next.remove(slot);
                    } else {
                        next.set(slot.clone(), value);
                    }
                }
            }
        }

        debug!(
            n_slots = catalog.len(),
            n_update = n_update,
            before = previous.len(),
            after = next.len(),
            "Belief state updated"
        );

        Ok(next)
    }
}
