//! Ledger row types.

use serde::{Deserialize, Serialize};

use crate::blockchain::types::OutPoint;

/// An address whose deposits and spends are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedAddress {
    pub address: String,
    /// Height tracking starts from.
    pub sync_from_height: Option<u64>,
}

/// A tracked unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    /// Amount in the chain's smallest unit.
    pub amount: u64,
    /// Reserved by a local transaction build, not yet seen spent on-chain.
    pub used: bool,
}

impl UnspentOutput {
    pub fn new(txid: impl Into<String>, vout: u32, address: impl Into<String>, amount: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            address: address.into(),
            amount,
            used: false,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid.clone(), self.vout)
    }
}

/// Row counts from committing one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedBlock {
    pub added: usize,
    pub removed: usize,
}
