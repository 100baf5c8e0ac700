//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use chainwatch::blockchain::{
    Block, ChainError, ChainResult, EstimateMode, FeeRate, KeyMaterial, OutPoint, RawTransaction,
    RpcClient, Signer, Transaction, TxInput, TxOutput, UnsignedTransaction,
};

pub const TEST_KEY_HEX: &str = "1111111111111111111111111111111111111111111111111111111111111111";

pub fn test_key() -> KeyMaterial {
    KeyMaterial::from_private_key(TEST_KEY_HEX).unwrap()
}

#[derive(Default)]
struct MockState {
    height: u64,
    blocks: HashMap<u64, Block>,
    /// Remaining `BlockNotFound` answers per height.
    block_failures: HashMap<u64, u32>,
    block_fetches: Vec<(u64, Instant)>,
    broadcasts: Vec<String>,
    broadcast_error: Option<ChainError>,
    fee_rate: Option<FeeRate>,
    fee_requests: Vec<(u16, EstimateMode)>,
    raw_transactions: HashMap<String, RawTransaction>,
}

/// In-memory node with scripted answers.
#[derive(Clone, Default)]
pub struct MockRpc {
    state: Arc<Mutex<MockState>>,
}

impl MockRpc {
    pub fn new(height: u64) -> Self {
        let rpc = Self::default();
        rpc.set_height(height);
        rpc
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    /// Serve `block` at its height and raise the tip if needed.
    pub fn add_block(&self, block: Block) {
        let mut state = self.state.lock().unwrap();
        state.height = state.height.max(block.height);
        state.blocks.insert(block.height, block);
    }

    /// Answer the next `times` fetches of `height` with `BlockNotFound`.
    pub fn fail_block(&self, height: u64, times: u32) {
        self.state.lock().unwrap().block_failures.insert(height, times);
    }

    pub fn block_fetches(&self) -> Vec<(u64, Instant)> {
        self.state.lock().unwrap().block_fetches.clone()
    }

    pub fn set_fee_rate(&self, rate: f64) {
        self.state.lock().unwrap().fee_rate = Some(FeeRate(rate));
    }

    pub fn fee_requests(&self) -> Vec<(u16, EstimateMode)> {
        self.state.lock().unwrap().fee_requests.clone()
    }

    pub fn fail_broadcast(&self, error: ChainError) {
        self.state.lock().unwrap().broadcast_error = Some(error);
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn add_raw_transaction(&self, raw: RawTransaction) {
        self.state
            .lock()
            .unwrap()
            .raw_transactions
            .insert(raw.txid.clone(), raw);
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn fetch_block_count(&self) -> ChainResult<u64> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn fetch_block(&self, height: u64) -> ChainResult<Block> {
        let mut state = self.state.lock().unwrap();
        state.block_fetches.push((height, Instant::now()));

        if let Some(remaining) = state.block_failures.get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChainError::BlockNotFound(format!("block {} not yet visible", height)));
            }
        }
        Ok(state.blocks.get(&height).cloned().unwrap_or_else(|| Block {
            height,
            hash: format!("hash{}", height),
            transactions: Vec::new(),
        }))
    }

    async fn broadcast(&self, raw_hex: &str) -> ChainResult<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.broadcast_error.clone() {
            return Err(error);
        }
        state.broadcasts.push(raw_hex.to_string());
        Ok(format!("sent{}", state.broadcasts.len()))
    }

    async fn estimate_fee_rate(&self, conf_target: u16, mode: EstimateMode) -> ChainResult<FeeRate> {
        let mut state = self.state.lock().unwrap();
        state.fee_requests.push((conf_target, mode));
        state.fee_rate.ok_or_else(|| ChainError::Rpc {
            code: -32603,
            message: "fee estimation unavailable".into(),
        })
    }

    async fn fetch_raw_transaction(&self, txid: &str) -> ChainResult<RawTransaction> {
        self.state
            .lock()
            .unwrap()
            .raw_transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::TransactionNotFound(txid.to_string()))
    }
}

/// Signer that owns one fixed address and serializes transactions as hex JSON.
pub struct MockSigner {
    address: String,
}

impl MockSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

impl Signer for MockSigner {
    fn address(&self, _key: &KeyMaterial) -> ChainResult<String> {
        Ok(self.address.clone())
    }

    fn sign(&self, tx: &mut UnsignedTransaction, input_index: usize, key: &KeyMaterial) -> ChainResult<()> {
        let input = tx
            .inputs
            .get_mut(input_index)
            .ok_or_else(|| ChainError::Signing(format!("no input {}", input_index)))?;
        // fixed-size stand-in for a DER signature plus pubkey
        input.witness = vec![vec![0x30; 72], key.expose_secret().as_bytes()[..33].to_vec()];
        Ok(())
    }

    fn serialize_to_hex(&self, tx: &UnsignedTransaction) -> ChainResult<String> {
        let bytes = serde_json::to_vec(tx).map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(hex::encode(bytes))
    }
}

/// Inverse of [`MockSigner::serialize_to_hex`].
pub fn decode_raw(raw_hex: &str) -> UnsignedTransaction {
    serde_json::from_slice(&hex::decode(raw_hex).unwrap()).unwrap()
}

/// The chain's view of a broadcast transaction.
pub fn mined(txid: &str, tx: &UnsignedTransaction) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        inputs: tx
            .inputs
            .iter()
            .map(|i| TxInput {
                previous_output: Some(i.previous_output.clone()),
            })
            .collect(),
        outputs: tx
            .outputs
            .iter()
            .enumerate()
            .map(|(n, o)| TxOutput {
                n: n as u32,
                value: o.value,
                address: Some(o.address.clone()),
            })
            .collect(),
    }
}

/// A transaction paying `outputs` (address, value) from `spends`.
pub fn transaction(txid: &str, spends: &[OutPoint], outputs: &[(&str, u64)]) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        inputs: spends
            .iter()
            .map(|p| TxInput {
                previous_output: Some(p.clone()),
            })
            .collect(),
        outputs: outputs
            .iter()
            .enumerate()
            .map(|(n, (address, value))| TxOutput {
                n: n as u32,
                value: *value,
                address: Some(address.to_string()),
            })
            .collect(),
    }
}

pub fn block(height: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        height,
        hash: format!("hash{}", height),
        transactions,
    }
}

/// One HTTP request as the programmable node saw it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub path: String,
    /// Header block, lowercased.
    pub headers: String,
    pub body: Value,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.headers
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .map(str::trim)
    }
}

/// Start a programmable JSON-RPC node on an ephemeral port.
///
/// `f` receives the decoded request body and returns an HTTP status and a
/// response body.
pub async fn start_programmable_node<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    start_http_node(move |request: HttpRequest| f(request.body)).await
}

/// Like [`start_programmable_node`], but `f` also sees the path and headers.
pub async fn start_http_node<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read one HTTP request and decode its JSON body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<HttpRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let headers = head.to_ascii_lowercase();
    let content_length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&buf[header_end..header_end + content_length]).ok()?;
    Some(HttpRequest {
        path,
        headers,
        body,
    })
}

/// JSON-RPC success envelope.
pub fn rpc_result(result: Value) -> (u16, String) {
    (
        200,
        serde_json::json!({ "result": result, "error": null, "id": "chainwatch" }).to_string(),
    )
}

/// JSON-RPC error envelope, sent with HTTP 500 like bitcoind does.
pub fn rpc_error(code: i64, message: &str) -> (u16, String) {
    (
        500,
        serde_json::json!({
            "result": null,
            "error": { "code": code, "message": message },
            "id": "chainwatch"
        })
        .to_string(),
    )
}
