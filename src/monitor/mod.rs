//! Chain-agnostic block monitoring.
//!
//! # Data Flow
//! ```text
//! BlockMonitor::start
//!     → driver.rs (spawned loop: prepare, then poll_blocks + sleep)
//!     → adapter.rs (ChainAdapter: fetch and process pending blocks)
//!     → handlers.rs (block, transaction and batch callbacks, in order)
//! ```
//!
//! # Design Decisions
//! - Any error escaping `poll_blocks` ends the run; retries belong to the adapter
//! - Stop is checked at every suspension point; the adapter teardown hook
//!   always runs before the run reports completion

pub mod adapter;
pub mod driver;
pub mod handlers;

pub use adapter::{ChainAdapter, PollContext};
pub use driver::{BlockMonitor, MonitorRun, MonitorState};
pub use handlers::{BlockTransactions, HandlerError, HandlerRegistry, HandlerResult, Handlers};
