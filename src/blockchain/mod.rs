//! Chain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Node JSON-RPC
//!     → client.rs (transport, timeout, failover, error-code mapping)
//!     → rpc.rs (RpcClient capability consumed by the core)
//!     → types.rs (Block / Transaction / RawTransaction)
//!
//! Sending:
//!     wallet.rs (KeyMaterial) + transaction.rs (UnsignedTransaction)
//!     → signer.rs (Signer capability: sign, serialize)
//! ```
//!
//! # Security Constraints
//! - Private keys are never logged
//! - All RPC calls have configurable timeouts
//! - Address derivation and signature algorithms stay behind `Signer`

pub mod client;
pub mod rpc;
pub mod signer;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::BitcoinRpcClient;
pub use rpc::RpcClient;
pub use signer::Signer;
pub use transaction::{PaymentInput, PaymentOutput, UnsignedTransaction};
pub use types::{
    Block, ChainError, ChainResult, EstimateMode, FeeRate, OutPoint, RawTransaction, Transaction,
    TxInput, TxOutput,
};
pub use wallet::KeyMaterial;
