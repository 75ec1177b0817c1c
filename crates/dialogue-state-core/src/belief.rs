//! Belief state: the slot → value assignments implied by a dialogue so far.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DstResult;
use crate::slot::SlotId;

/// Mapping from slot to value. Only slots with a non-empty value are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeliefState {
    values: BTreeMap<SlotId, String>,
}

impl BeliefState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `domain-slot-value` entries. The value is everything after the
    /// last `-`.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> DstResult<Self> {
        let mut state = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (slot, value) = entry.rsplit_once('-').unwrap_or((entry, ""));
            state.set(SlotId::parse(slot)?, value);
        }
        Ok(state)
    }

    pub fn get(&self, slot: &SlotId) -> Option<&str> {
        self.values.get(slot).map(String::as_str)
    }

    /// Assign a value; an empty value clears the slot.
    pub fn set(&mut self, slot: SlotId, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&slot);
        } else {
            self.values.insert(slot, value);
        }
    }

    pub fn remove(&mut self, slot: &SlotId) -> Option<String> {
        self.values.remove(slot)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotId, &str)> {
        self.values.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Render as `domain-slot-value` strings, the form consumed by the evaluator.
    pub fn to_entries(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(slot, value)| slot.with_value(value))
            .collect()
    }
}
