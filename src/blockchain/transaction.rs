//! Unsigned payment transactions as assembled by the builder.
//!
//! The builder fills inputs and outputs; the signer fills the unlocking data
//! in place and turns the result into a raw hex string.

use serde::{Deserialize, Serialize};

use crate::blockchain::types::OutPoint;

/// One input spending a tracked unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub previous_output: OutPoint,
    /// Value of the spent output, needed for segwit sighashes.
    pub value: u64,
    /// Owner of the spent output.
    pub address: String,
    pub script_sig: Vec<u8>,
    pub witness: Vec<Vec<u8>>,
}

impl PaymentInput {
    pub fn new(previous_output: OutPoint, value: u64, address: impl Into<String>) -> Self {
        Self {
            previous_output,
            value,
            address: address.into(),
            script_sig: Vec::new(),
            witness: Vec::new(),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty() || !self.witness.is_empty()
    }
}

/// One payment output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutput {
    pub address: String,
    pub value: u64,
}

impl PaymentOutput {
    pub fn new(address: impl Into<String>, value: u64) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

/// A transaction under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub inputs: Vec<PaymentInput>,
    pub outputs: Vec<PaymentOutput>,
}

impl UnsignedTransaction {
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Implied fee: inputs minus outputs.
    pub fn fee(&self) -> u64 {
        self.input_value().saturating_sub(self.output_value())
    }

    pub fn is_fully_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(PaymentInput::is_signed)
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs
            .iter()
            .map(|i| i.previous_output.clone())
            .collect()
    }
}
