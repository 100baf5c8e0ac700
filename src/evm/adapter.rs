//! Account-model chain adapter backed by alloy providers.
//!
//! # Responsibilities
//! - Track the next block number in memory (no ledger on account chains)
//! - Fetch full blocks with per-call timeout and provider failover
//! - Fan each block out to the monitor's handlers

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{ChainError, ChainResult};
use crate::config::schema::RpcConfig;
use crate::monitor::{ChainAdapter, PollContext};

/// Transaction type delivered to EVM handlers.
pub type EvmTransaction = alloy::rpc::types::Transaction;

type EvmBlock = alloy::rpc::types::Block;

/// Primary and failover providers sharing one timeout.
struct Endpoints {
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    timeout_duration: Duration,
}

impl Endpoints {
    async fn block_number(&self) -> ChainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_block_number()).await {
                Ok(Ok(number)) => return Ok(number),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::RpcConnection("All RPC providers failed".to_string()))
    }

    async fn block(&self, number: u64) -> ChainResult<EvmBlock> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fetch = async {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
            };
            match timeout(self.timeout_duration, fetch).await {
                Ok(Ok(Some(block))) => return Ok(block),
                Ok(Ok(None)) => {
                    return Err(ChainError::BlockNotFound(format!("block {}", number)))
                }
                Ok(Err(e)) => tracing::warn!(provider_idx = i, block = number, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, block = number, "RPC timeout"),
            }
        }
        Err(ChainError::RpcConnection("All RPC providers failed".to_string()))
    }

    async fn balance(&self, address: Address) -> ChainResult<U256> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fetch = async { provider.get_balance(address).await };
            match timeout(self.timeout_duration, fetch).await {
                Ok(Ok(balance)) => return Ok(balance),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, %address, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, %address, "RPC timeout"),
            }
        }
        Err(ChainError::RpcConnection("All RPC providers failed".to_string()))
    }
}

/// Polls an EVM node and hands every transaction of every new block to the
/// registered handlers.
pub struct EvmAdapter {
    name: String,
    endpoints: Endpoints,
    next_block: Option<u64>,
}

impl EvmAdapter {
    /// Build providers for the primary and failover URLs. Nothing is
    /// contacted until the first poll.
    pub fn new(name: impl Into<String>, config: &RpcConfig) -> ChainResult<Self> {
        let primary_url: url::Url = config.url.parse().map_err(|e| {
            ChainError::Config(format!("Invalid RPC URL '{}': {}", config.url, e))
        })?;
        let mut providers = vec![
            Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>
        ];

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        Ok(Self {
            name: name.into(),
            endpoints: Endpoints {
                providers,
                timeout_duration: Duration::from_secs(config.timeout_secs),
            },
            next_block: None,
        })
    }

    /// Next block to fetch; unset until the first poll when no start height was given.
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// Latest native balance of `address`, in wei.
    pub async fn get_balance(&self, address: Address) -> ChainResult<U256> {
        self.endpoints.balance(address).await
    }
}

impl ChainAdapter for EvmAdapter {
    type Transaction = EvmTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, initial_height: Option<u64>) -> ChainResult<()> {
        if initial_height.is_some() {
            self.next_block = initial_height;
        }
        Ok(())
    }

    async fn poll_blocks(&mut self, ctx: &PollContext<'_, EvmTransaction>) -> ChainResult<()> {
        let endpoints = &self.endpoints;
        let head = ctx
            .retry
            .run("eth_blockNumber", move || endpoints.block_number())
            .await?;

        // start at the head when no height was requested
        let mut next = *self.next_block.get_or_insert(head);
        while next <= head {
            let block = ctx
                .retry
                .run("eth_getBlockByNumber", move || endpoints.block(next))
                .await?;
            let transactions: Vec<EvmTransaction> = block.transactions.into_transactions().collect();
            tracing::debug!(chain = %self.name, block = next, transactions = transactions.len(), "Block fetched");

            ctx.handlers.fan_out(next, transactions).await?;
            next += 1;
            self.next_block = Some(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Handlers;
    use crate::resilience::RetryPolicy;

    fn config(url: &str) -> RpcConfig {
        RpcConfig {
            url: url.to_string(),
            failover_urls: vec!["not a url".to_string()],
            timeout_secs: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_primary_url() {
        let err = EvmAdapter::new("eth", &config("::nope::")).err().unwrap();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[tokio::test]
    async fn test_prepare_sets_start_height() {
        let mut adapter = EvmAdapter::new("eth", &config("http://127.0.0.1:1")).unwrap();
        assert_eq!(adapter.next_block(), None);

        adapter.prepare(None).await.unwrap();
        assert_eq!(adapter.next_block(), None);

        adapter.prepare(Some(42)).await.unwrap();
        assert_eq!(adapter.next_block(), Some(42));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let mut adapter = EvmAdapter::new("eth", &config("http://127.0.0.1:1")).unwrap();
        let handlers = Handlers::new();
        let retry = RetryPolicy::none();
        let ctx = PollContext {
            handlers: &handlers,
            retry: &retry,
        };

        let err = adapter.poll_blocks(&ctx).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(adapter.next_block(), None);
    }

    #[tokio::test]
    async fn test_balance_from_unreachable_node_is_transient() {
        let adapter = EvmAdapter::new("eth", &config("http://127.0.0.1:1")).unwrap();
        let err = adapter.get_balance(Address::ZERO).await.unwrap_err();
        assert!(matches!(err, ChainError::RpcConnection(_)));
    }
}
