//! RPC collaborator contract consumed by the UTXO adapter and builder.

use async_trait::async_trait;

use crate::blockchain::types::{Block, ChainResult, EstimateMode, FeeRate, RawTransaction};

/// Capabilities the core needs from a UTXO chain node.
///
/// Implementations own transport concerns (timeouts, failover). The core
/// never retries on its own except inside the monitor's retry wrapper.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Current chain height.
    async fn fetch_block_count(&self) -> ChainResult<u64>;

    /// Fully decoded block at `height`.
    ///
    /// Fails with `BlockNotFound` when the height is not yet visible.
    async fn fetch_block(&self, height: u64) -> ChainResult<Block>;

    /// Submit a signed raw transaction, returning its id.
    async fn broadcast(&self, raw_hex: &str) -> ChainResult<String>;

    /// Estimated fee rate for confirmation within `conf_target` blocks.
    async fn estimate_fee_rate(&self, conf_target: u16, mode: EstimateMode) -> ChainResult<FeeRate>;

    /// Transaction record by id; `TransactionNotFound` if absent.
    async fn fetch_raw_transaction(&self, txid: &str) -> ChainResult<RawTransaction>;
}
