//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Monitor RPC call:
//!     → retries.rs (classify error, retry transient ones)
//!     → backoff.rs (doubling delay, capped, optional jitter)
//! ```
//!
//! # Design Decisions
//! - Only the block monitor retries; the send path never does
//! - Retries only for transient errors (connectivity, block not yet visible)
//! - Bounded attempt count; the final error propagates unchanged

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
