//! Account-model (EVM) chains.
//!
//! Blocks are fetched through alloy providers and handed to the generic
//! block monitor's handlers, and balances are read straight from the node.
//! There is no ledger: account chains have no unspent outputs to track.

pub mod adapter;

pub use adapter::{EvmAdapter, EvmTransaction};
