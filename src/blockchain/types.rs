//! Chain data model and error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during chain operations.
///
/// Every variant carries owned strings so a monitor's terminal error can be
/// cloned out to every task waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Used before the client or its session was initialised.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Requested height or hash is not yet visible on the node.
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// Requested transaction id is unknown to the node.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Malformed address, hash or parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport or HTTP level failure.
    #[error("RPC connection error: {0}")]
    RpcConnection(String),

    /// Node answered with an error we have no dedicated variant for.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Coin selection could not cover the requested amount.
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u64, required: u64 },

    /// The chain rejected the transaction or it could not be assembled.
    #[error("failed to create transaction: {0}")]
    CreateTransaction(String),

    /// The requested transaction shape is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Ledger storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Signer rejected the key or the transaction.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A registered event handler failed.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl ChainError {
    /// Whether the monitor's RPC wrapper may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::BlockNotFound(_) | ChainError::RpcConnection(_) | ChainError::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(e: rusqlite::Error) -> Self {
        ChainError::Storage(e.to_string())
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Reference to one output of a previous transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input as reported in a block.
///
/// Coinbase inputs carry no previous output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: Option<OutPoint>,
}

/// Transaction output as reported in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Position of the output within its transaction.
    pub n: u32,
    /// Value in the chain's smallest unit.
    pub value: u64,
    /// Decoded destination address, if the script has one.
    pub address: Option<String>,
}

/// A transaction inside a fetched block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// A block fetched at a given height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

/// A transaction looked up by id, with what fee bumping needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub txid: String,
    pub outputs: Vec<TxOutput>,
    /// Virtual size in bytes.
    pub vsize: u64,
    /// Absolute fee, known only while the transaction sits in the mempool.
    pub fee: Option<u64>,
    pub confirmations: u64,
}

/// Fee estimation mode passed to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMode {
    #[default]
    Economical,
    Conservative,
}

impl EstimateMode {
    pub fn as_rpc_str(&self) -> &'static str {
        match self {
            EstimateMode::Economical => "ECONOMICAL",
            EstimateMode::Conservative => "CONSERVATIVE",
        }
    }
}

/// Fee rate in smallest units per virtual byte.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FeeRate(pub f64);

impl FeeRate {
    /// Fee for a transaction of `vsize` bytes, rounded up.
    pub fn fee_for(&self, vsize: u64) -> u64 {
        (self.0 * vsize as f64).ceil() as u64
    }
}
