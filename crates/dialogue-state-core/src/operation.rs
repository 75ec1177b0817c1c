//! Per-slot state operations and the operation vocabularies they are drawn from.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DstError, DstResult};

/// The decision taken for one slot in one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Keep the previous turn's value.
    Carryover,
    /// Remove the slot from the belief state.
    Delete,
    /// Set the slot to the don't-care sentinel.
    Dontcare,
    /// Generate a new value from the turn context.
    Update,
    /// Set the slot to the literal `yes`.
    Yes,
    /// Set the slot to the literal `no`.
    No,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Carryover => "carryover",
            Self::Delete => "delete",
            Self::Dontcare => "dontcare",
            Self::Update => "update",
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operation vocabulary the classifier predicts over.
///
/// Class ids follow the listed order of each set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpSetKind {
    /// {update, carryover}
    Two,
    /// {update, carryover, dontcare}
    ThreeDontcare,
    /// {update, carryover, delete}
    ThreeDelete,
    /// {delete, update, dontcare, carryover}
    #[default]
    Four,
    /// {delete, update, dontcare, carryover, yes, no}
    Six,
}

impl OpSetKind {
    /// Operations in class-id order.
    pub fn operations(self) -> &'static [Operation] {
        use Operation::*;
        match self {
            Self::Two => &[Update, Carryover],
            Self::ThreeDontcare => &[Update, Carryover, Dontcare],
            Self::ThreeDelete => &[Update, Carryover, Delete],
            Self::Four => &[Delete, Update, Dontcare, Carryover],
            Self::Six => &[Delete, Update, Dontcare, Carryover, Yes, No],
        }
    }

    /// Number of operation classes.
    pub fn n_op(self) -> usize {
        self.operations().len()
    }

    /// Class id of `op`, or `None` when the set does not contain it.
    pub fn id_of(self, op: Operation) -> Option<u32> {
        self.operations()
            .iter()
            .position(|&o| o == op)
            .map(|i| i as u32)
    }

    /// Class id of [`Operation::Update`]; every set contains it.
    pub fn update_id(self) -> u32 {
        self.id_of(Operation::Update).unwrap_or(0)
    }

    pub fn operation(self, id: u32) -> DstResult<Operation> {
        self.operations()
            .get(id as usize)
            .copied()
            .ok_or_else(|| DstError::UnknownOperation {
                id,
                op_set: self.to_string(),
                n_op: self.n_op(),
            })
    }

    /// Map a row of class ids to operations.
    pub fn decode_ids(self, ids: &[u32]) -> DstResult<Vec<Operation>> {
        ids.iter().map(|&id| self.operation(id)).collect()
    }
}

impl fmt::Display for OpSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Two => "two",
            Self::ThreeDontcare => "three_dontcare",
            Self::ThreeDelete => "three_delete",
            Self::Four => "four",
            Self::Six => "six",
        };
        f.write_str(name)
    }
}
