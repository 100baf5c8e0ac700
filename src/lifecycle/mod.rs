//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop_monitoring() → stop signal → monitor loop cancelled
//!     → adapter shutdown hook → stopped signal → wait_closed() returns
//!
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → stop signal of the daemon's monitor
//! ```
//!
//! # Design Decisions
//! - Signals are level triggered: a late waiter still observes a past trigger
//! - Teardown always runs, whichever way the loop ended

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
