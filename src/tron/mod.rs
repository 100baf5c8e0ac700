//! TRON support.
//!
//! TRON full nodes expose the Ethereum JSON-RPC methods under `/jsonrpc`.
//! Blocks are followed through the generic block monitor the same way as on
//! EVM chains; like them, there is no ledger.

pub mod adapter;

pub use adapter::{map_tron_error, TronAdapter, TronClient, TronTransaction};
