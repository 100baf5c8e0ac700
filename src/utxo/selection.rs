//! First-fit coin selection over ledger order.

use crate::blockchain::types::{ChainError, ChainResult};
use crate::ledger::UnspentOutput;

/// Outputs chosen to fund a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<UnspentOutput>,
    pub total: u64,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Take candidates in order until their sum reaches `required`.
///
/// Fails with `InsufficientFunds` naming the sum of all candidates and the
/// required amount. Used outputs are skipped.
pub fn select_first_fit(candidates: &[UnspentOutput], required: u64) -> ChainResult<Selection> {
    let mut selection = Selection {
        inputs: Vec::new(),
        total: 0,
    };

    for candidate in candidates.iter().filter(|c| !c.used) {
        if selection.total >= required && !selection.is_empty() {
            break;
        }
        selection.total = selection.total.saturating_add(candidate.amount);
        selection.inputs.push(candidate.clone());
    }

    if selection.total < required || selection.is_empty() {
        return Err(ChainError::InsufficientFunds {
            available: selection.total,
            required,
        });
    }
    Ok(selection)
}
