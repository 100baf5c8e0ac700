//! Bitcoin-Core-style JSON-RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Speak JSON-RPC to the primary endpoint, falling back to failovers
//! - Enforce a per-call timeout
//! - Translate node error codes into [`ChainError`] variants
//! - Decode blocks and transactions into the chain data model

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::rpc::RpcClient;
use crate::blockchain::types::{
    Block, ChainError, ChainResult, EstimateMode, FeeRate, OutPoint, RawTransaction, Transaction,
    TxInput, TxOutput,
};
use crate::config::schema::RpcConfig;

/// Floor applied to node fee estimates, in smallest units per byte.
const MIN_RELAY_FEE_RATE: f64 = 1.0;

/// JSON-RPC client for bitcoind-compatible nodes.
#[derive(Clone)]
pub struct BitcoinRpcClient {
    http: reqwest::Client,
    /// Primary endpoint first, then failovers.
    endpoints: Vec<url::Url>,
    config: RpcConfig,
    timeout_duration: Duration,
    amount_decimals: u32,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    hash: String,
    height: u64,
    tx: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    txid: String,
    #[serde(default)]
    vin: Vec<RawVin>,
    #[serde(default)]
    vout: Vec<RawVout>,
    #[serde(default)]
    vsize: Option<u64>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    confirmations: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawVin {
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawVout {
    value: f64,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    address: Option<String>,
    addresses: Option<Vec<String>>,
}

impl BitcoinRpcClient {
    /// Create a new client.
    ///
    /// No request is made; unreachable nodes surface on first use.
    pub fn new(config: RpcConfig, amount_decimals: u32) -> ChainResult<Self> {
        let mut endpoints = Vec::new();

        let primary: url::Url = config.url.parse().map_err(|e| {
            ChainError::Config(format!("Invalid RPC URL '{}': {}", config.url, e))
        })?;
        endpoints.push(primary);

        for url_str in &config.failover_urls {
            match url_str.parse() {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChainError::Config(format!("HTTP client: {}", e)))?;

        tracing::info!(
            rpc_url = %config.url,
            failovers = endpoints.len() - 1,
            "RPC client initialized"
        );

        Ok(Self {
            http,
            endpoints,
            timeout_duration: Duration::from_secs(config.timeout_secs),
            config,
            amount_decimals,
        })
    }

    /// Issue one JSON-RPC call.
    ///
    /// Transport failures and timeouts move on to the next endpoint; an error
    /// answer from a node is returned as is.
    pub async fn call(&self, method: &str, params: Value) -> ChainResult<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "chainwatch",
            "method": method,
            "params": params,
        });

        let mut last_error = ChainError::NotConnected("no RPC endpoint configured".to_string());
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let mut request = self.http.post(endpoint.clone()).json(&body);
            if let Some(user) = &self.config.username {
                request = request.basic_auth(user, self.config.password.as_deref());
            }
            for (name, value) in &self.config.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match timeout(self.timeout_duration, Self::send(request)).await {
                Ok(Ok(envelope)) => return Self::unwrap_envelope(method, envelope),
                Ok(Err(e)) => {
                    tracing::warn!(endpoint_idx = i, method, error = %e, "RPC error, trying next endpoint");
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(endpoint_idx = i, method, "RPC timeout, trying next endpoint");
                    last_error = ChainError::Timeout(self.config.timeout_secs);
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
        // bitcoind answers node errors with HTTP 500 and a JSON body
        response.json::<RpcEnvelope>().await.map_err(|e| {
            ChainError::RpcConnection(format!("HTTP {}: undecodable body: {}", status, e))
        })
    }

    fn unwrap_envelope(method: &str, envelope: RpcEnvelope) -> ChainResult<Value> {
        if let Some(error) = envelope.error {
            return Err(map_rpc_error(error.code, error.message));
        }
        envelope
            .result
            .ok_or_else(|| ChainError::Rpc {
                code: 0,
                message: format!("{} returned no result", method),
            })
    }

    fn to_smallest_unit(&self, value: f64) -> u64 {
        to_smallest_unit(value, self.amount_decimals)
    }

    /// Node-reported mempool fee for `txid`, if it is still unconfirmed.
    async fn mempool_fee(&self, txid: &str) -> Option<u64> {
        let entry = self.call("getmempoolentry", json!([txid])).await.ok()?;
        let fee = entry
            .get("fees")
            .and_then(|f| f.get("base"))
            .or_else(|| entry.get("fee"))
            .and_then(Value::as_f64)?;
        Some(self.to_smallest_unit(fee))
    }
}

#[async_trait]
impl RpcClient for BitcoinRpcClient {
    async fn fetch_block_count(&self) -> ChainResult<u64> {
        let value = self.call("getblockcount", json!([])).await?;
        value.as_u64().ok_or_else(|| ChainError::Rpc {
            code: 0,
            message: format!("unexpected getblockcount result: {}", value),
        })
    }

    async fn fetch_block(&self, height: u64) -> ChainResult<Block> {
        let hash = self.call("getblockhash", json!([height])).await?;
        let hash = hash.as_str().ok_or_else(|| ChainError::Rpc {
            code: 0,
            message: format!("unexpected getblockhash result: {}", hash),
        })?;
        let raw = self.call("getblock", json!([hash, 2])).await?;
        decode_block(raw, self.amount_decimals)
    }

    async fn broadcast(&self, raw_hex: &str) -> ChainResult<String> {
        if raw_hex.is_empty() || hex::decode(raw_hex).is_err() {
            return Err(ChainError::InvalidArgument(
                "raw transaction is not valid hex".to_string(),
            ));
        }
        let value = self.call("sendrawtransaction", json!([raw_hex])).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::CreateTransaction(format!("unexpected txid: {}", value)))
    }

    async fn estimate_fee_rate(&self, conf_target: u16, mode: EstimateMode) -> ChainResult<FeeRate> {
        let value = self
            .call("estimatesmartfee", json!([conf_target, mode.as_rpc_str()]))
            .await?;
        let per_kvb = value.get("feerate").and_then(Value::as_f64).ok_or_else(|| {
            ChainError::Rpc {
                code: 0,
                message: format!("fee estimation unavailable: {}", value),
            }
        })?;
        let per_byte = self.to_smallest_unit(per_kvb) as f64 / 1000.0;
        Ok(FeeRate(per_byte.max(MIN_RELAY_FEE_RATE)))
    }

    async fn fetch_raw_transaction(&self, txid: &str) -> ChainResult<RawTransaction> {
        let raw = self
            .call("getrawtransaction", json!([txid, true]))
            .await
            .map_err(|e| match e {
                ChainError::BlockNotFound(msg) => ChainError::TransactionNotFound(msg),
                other => other,
            })?;
        let raw: RawTx = serde_json::from_value(raw).map_err(|e| ChainError::Rpc {
            code: 0,
            message: format!("undecodable transaction {}: {}", txid, e),
        })?;

        let fee = self.mempool_fee(txid).await;
        let vsize = raw.vsize.or(raw.size).unwrap_or_default();
        let confirmations = raw.confirmations.unwrap_or_default();
        let tx = decode_transaction(raw, self.amount_decimals);

        Ok(RawTransaction {
            txid: tx.txid,
            outputs: tx.outputs,
            vsize,
            fee,
            confirmations,
        })
    }
}

impl std::fmt::Debug for BitcoinRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinRpcClient")
            .field("rpc_url", &self.config.url)
            .field("endpoints", &self.endpoints.len())
            .field("timeout_secs", &self.config.timeout_secs)
            .finish()
    }
}

/// Translate a node error code.
pub fn map_rpc_error(code: i64, message: String) -> ChainError {
    match code {
        -5 => ChainError::BlockNotFound(message),
        -8 => ChainError::InvalidArgument(message),
        // verify rejected / already in chain / wallet / insufficient funds
        -26 | -25 | -27 | -4 | -6 => ChainError::CreateTransaction(message),
        -28 => ChainError::RpcConnection(message),
        _ => ChainError::Rpc { code, message },
    }
}

/// Convert a decimal coin amount to the smallest unit.
pub fn to_smallest_unit(value: f64, decimals: u32) -> u64 {
    (value * 10f64.powi(decimals as i32)).round().max(0.0) as u64
}

fn decode_transaction(raw: RawTx, decimals: u32) -> Transaction {
    let inputs = raw
        .vin
        .into_iter()
        .map(|vin| TxInput {
            previous_output: match (vin.txid, vin.vout) {
                (Some(txid), Some(vout)) => Some(OutPoint::new(txid, vout)),
                _ => None,
            },
        })
        .collect();

    let outputs = raw
        .vout
        .into_iter()
        .map(|vout| {
            let address = vout.script_pub_key.and_then(|spk| {
                spk.address
                    .or_else(|| spk.addresses.and_then(|list| list.into_iter().next()))
            });
            TxOutput {
                n: vout.n,
                value: to_smallest_unit(vout.value, decimals),
                address,
            }
        })
        .collect();

    Transaction {
        txid: raw.txid,
        inputs,
        outputs,
    }
}

/// Decode a `getblock` verbosity-2 result.
pub fn decode_block(raw: Value, decimals: u32) -> ChainResult<Block> {
    let raw: RawBlock = serde_json::from_value(raw).map_err(|e| ChainError::Rpc {
        code: 0,
        message: format!("undecodable block: {}", e),
    })?;

    Ok(Block {
        height: raw.height,
        hash: raw.hash,
        transactions: raw
            .tx
            .into_iter()
            .map(|tx| decode_transaction(tx, decimals))
            .collect(),
    })
}
