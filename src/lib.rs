//! Multi-chain block watcher core.
//!
//! Watches addresses on UTXO chains through a local ledger of unspent
//! outputs, follows account-model chains (EVM and TRON) through the same
//! block monitor,
//! and builds, signs and broadcasts UTXO payments.

pub mod blockchain;
pub mod config;
pub mod evm;
pub mod ledger;
pub mod monitor;
pub mod tron;
pub mod utxo;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use blockchain::{ChainError, ChainResult};
pub use config::ChainwatchConfig;
pub use lifecycle::Shutdown;
pub use monitor::BlockMonitor;
pub use utxo::UtxoClient;
