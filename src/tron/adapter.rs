//! TRON chain adapter over the node's Ethereum-compatible JSON-RPC.
//!
//! # Responsibilities
//! - Speak JSON-RPC 2.0 to `{url}/jsonrpc`, falling back to failovers
//! - Translate malformed-value node errors into [`ChainError::InvalidArgument`]
//! - Track the next block in memory and fan each block out to the handlers

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{ChainError, ChainResult};
use crate::config::schema::RpcConfig;
use crate::monitor::{ChainAdapter, PollContext};

/// Node error messages caused by a malformed hash or address.
const INVALID_ARGUMENT_MESSAGES: [&str; 3] = [
    "invalid characters encountered in Hex string",
    "invalid hash value",
    "invalid address hash value",
];

/// Transaction as returned inside a full `eth_getBlockByNumber` result.
///
/// Amounts are in sun.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TronTransaction {
    pub hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
}

#[derive(Debug, Deserialize)]
struct TronBlock {
    #[serde(default)]
    transactions: Vec<TronTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client for a TRON full node or gateway.
#[derive(Clone)]
pub struct TronClient {
    http: reqwest::Client,
    /// `/jsonrpc` URLs, primary first.
    endpoints: Vec<url::Url>,
    headers: BTreeMap<String, String>,
    timeout_secs: u64,
}

impl TronClient {
    /// No request is made; unreachable nodes surface on first use.
    pub fn new(config: &RpcConfig) -> ChainResult<Self> {
        let mut endpoints = vec![jsonrpc_url(&config.url).map_err(|e| {
            ChainError::Config(format!("Invalid RPC URL '{}': {}", config.url, e))
        })?];
        for url_str in &config.failover_urls {
            match jsonrpc_url(url_str) {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChainError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints,
            headers: config.headers.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Issue one JSON-RPC call.
    ///
    /// Transport failures, non-200 answers and timeouts move on to the next
    /// endpoint; an error answer from a node is returned as is.
    pub async fn call(&self, method: &str, params: Value) -> ChainResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut last_error = ChainError::NotConnected("no RPC endpoint configured".to_string());
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let mut request = self.http.post(endpoint.clone()).json(&body);
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let duration = Duration::from_secs(self.timeout_secs);
            match timeout(duration, Self::send(request)).await {
                Ok(Ok(envelope)) => {
                    if let Some(error) = envelope.error {
                        return Err(map_tron_error(error.code, error.message));
                    }
                    return Ok(envelope.result);
                }
                Ok(Err(e)) => {
                    tracing::warn!(endpoint_idx = i, method, error = %e, "RPC error, trying next endpoint");
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(endpoint_idx = i, method, "RPC timeout, trying next endpoint");
                    last_error = ChainError::Timeout(self.timeout_secs);
                }
            }
        }
        Err(last_error)
    }

    async fn send(request: reqwest::RequestBuilder) -> ChainResult<RpcEnvelope> {
        let response = request
            .send()
            .await
            .map_err(|e| ChainError::RpcConnection(e.to_string()))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ChainError::RpcConnection(format!(
                "node answered HTTP {}: {}",
                status, text
            )));
        }
        response.json::<RpcEnvelope>().await.map_err(|e| {
            ChainError::RpcConnection(format!("undecodable body: {}", e))
        })
    }

    pub async fn block_number(&self) -> ChainResult<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let digits = hex_digits("eth_blockNumber", &value)?;
        u64::from_str_radix(digits, 16).map_err(|_| ChainError::Rpc {
            code: 0,
            message: format!("unexpected eth_blockNumber result: {}", value),
        })
    }

    /// Transactions of block `number`.
    pub async fn block_transactions(&self, number: u64) -> ChainResult<Vec<TronTransaction>> {
        let value = self
            .call("eth_getBlockByNumber", json!([format!("{:#x}", number), true]))
            .await?;
        if value.is_null() {
            return Err(ChainError::BlockNotFound(format!("block {}", number)));
        }
        let block: TronBlock = serde_json::from_value(value).map_err(|e| ChainError::Rpc {
            code: 0,
            message: format!("undecodable block {}: {}", number, e),
        })?;
        Ok(block.transactions)
    }

    /// Latest TRX balance of `address` (hex form), in sun.
    pub async fn get_balance(&self, address: &str) -> ChainResult<U256> {
        if address.trim().is_empty() {
            return Err(ChainError::InvalidArgument("empty address".to_string()));
        }
        let value = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_quantity("eth_getBalance", &value)
    }
}

impl std::fmt::Debug for TronClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TronClient")
            .field("endpoints", &self.endpoints.len())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn jsonrpc_url(base: &str) -> Result<url::Url, url::ParseError> {
    format!("{}/jsonrpc", base.trim_end_matches('/')).parse()
}

/// Translate a node error. Malformed values are the caller's fault.
pub fn map_tron_error(code: i64, message: String) -> ChainError {
    if INVALID_ARGUMENT_MESSAGES.iter().any(|m| message.contains(m)) {
        return ChainError::InvalidArgument(message);
    }
    ChainError::Rpc { code, message }
}

fn hex_digits<'a>(method: &str, value: &'a Value) -> ChainResult<&'a str> {
    value
        .as_str()
        .and_then(|text| text.strip_prefix("0x"))
        .ok_or_else(|| ChainError::Rpc {
            code: 0,
            message: format!("unexpected {} result: {}", method, value),
        })
}

/// Decode a 0x-prefixed hex quantity. A bare "0x" is zero.
fn parse_quantity(method: &str, value: &Value) -> ChainResult<U256> {
    let digits = hex_digits(method, value)?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|_| ChainError::Rpc {
        code: 0,
        message: format!("unexpected {} result: {}", method, value),
    })
}

/// Polls a TRON node and hands every transaction of every new block to the
/// registered handlers.
pub struct TronAdapter {
    name: String,
    client: TronClient,
    next_block: Option<u64>,
}

impl TronAdapter {
    pub fn new(name: impl Into<String>, config: &RpcConfig) -> ChainResult<Self> {
        Ok(Self {
            name: name.into(),
            client: TronClient::new(config)?,
            next_block: None,
        })
    }

    pub fn client(&self) -> &TronClient {
        &self.client
    }

    /// Next block to fetch; unset until the first poll when no start height was given.
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }
}

impl ChainAdapter for TronAdapter {
    type Transaction = TronTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, initial_height: Option<u64>) -> ChainResult<()> {
        if initial_height.is_some() {
            self.next_block = initial_height;
        }
        Ok(())
    }

    async fn poll_blocks(&mut self, ctx: &PollContext<'_, TronTransaction>) -> ChainResult<()> {
        let client = &self.client;
        let head = ctx
            .retry
            .run("eth_blockNumber", move || client.block_number())
            .await?;

        // start at the head when no height was requested
        let mut next = *self.next_block.get_or_insert(head);
        while next <= head {
            let transactions = ctx
                .retry
                .run("eth_getBlockByNumber", move || client.block_transactions(next))
                .await?;
            tracing::debug!(chain = %self.name, block = next, transactions = transactions.len(), "Block fetched");

            ctx.handlers.fan_out(next, transactions).await?;
            next += 1;
            self.next_block = Some(next);
        }
        Ok(())
    }
}
