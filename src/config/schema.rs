//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the watcher.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blockchain::types::EstimateMode;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ChainwatchConfig {
    /// Network identity (ledger table prefix, unit scale).
    pub network: NetworkConfig,

    /// Node RPC endpoint settings.
    pub rpc: RpcConfig,

    /// Ledger storage settings.
    pub ledger: LedgerConfig,

    /// Block monitor settings.
    pub monitor: MonitorConfig,

    /// Retry configuration for monitor RPC calls.
    pub retries: RetryConfig,

    /// Fee estimation defaults.
    pub fees: FeeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Addresses imported at startup.
    #[serde(default)]
    pub addresses: Vec<WatchedAddressConfig>,
}

/// Family of chain the node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Bitcoin-style chain tracked through the UTXO ledger.
    #[default]
    Utxo,
    /// Account-based chain; blocks are fanned out to handlers only.
    Evm,
    /// TRON, followed through its Ethereum-compatible `/jsonrpc` endpoint.
    Tron,
}

/// Network identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Identifier used as ledger table prefix (e.g. "btc_testnet").
    pub name: String,

    /// Chain family.
    pub kind: ChainKind,

    /// Decimal places between the node's coin amounts and the smallest unit.
    pub amount_decimals: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "btc".to_string(),
            kind: ChainKind::Utxo,
            amount_decimals: 8,
        }
    }
}

/// Node RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC endpoint URL.
    pub url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Basic auth user, if the node requires one.
    pub username: Option<String>,

    /// Basic auth password.
    pub password: Option<String>,

    /// RPC request timeout in seconds.
    pub timeout_secs: u64,

    /// Extra HTTP headers sent with every request (e.g. a provider API key).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            failover_urls: Vec::new(),
            username: None,
            password: None,
            timeout_secs: 10,
            headers: BTreeMap::new(),
        }
    }
}

/// Ledger storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// `sqlite://path`, a plain path, or `sqlite::memory:`.
    pub url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chainwatch.sqlite".to_string(),
        }
    }
}

/// Block monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Height to start from; the ledger cursor is used when unset.
    pub start_height: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            start_height: None,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further retry.
    pub retry_delay_ms: u64,

    /// Upper bound for a single delay.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

/// Fee estimation defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Target confirmation window in blocks.
    pub conf_target: u16,

    /// Estimation mode sent to the node.
    pub estimate_mode: EstimateMode,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            conf_target: 6,
            estimate_mode: EstimateMode::Economical,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Full,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// An address to import at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchedAddressConfig {
    pub address: String,

    /// Back-fill from this height; chain tip when unset.
    #[serde(default)]
    pub from_height: Option<u64>,
}
