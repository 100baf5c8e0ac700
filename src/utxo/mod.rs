//! UTXO chain support.
//!
//! # Data Flow
//! ```text
//! Monitoring:
//!     monitor driver → adapter.rs (cursor..=tip, retried fetches)
//!         → processor.rs (outputs, then inputs; one ledger commit per block)
//!         → block / transaction / batch / new-output handlers
//!
//! Sending:
//!     client.rs → builder.rs (fee resolution, signing, broadcast)
//!         → selection.rs (first-fit over ledger order)
//!         → ledger reservation of spent inputs
//! ```
//!
//! # Known Gaps
//! - Input reservation is process-local; two processes sharing one ledger
//!   may select the same outputs
//! - A fee-bump child spends an unconfirmed parent output that is not yet in
//!   the ledger, so nothing is reserved. If the parent confirms before the
//!   child, its output is recorded as spendable until the child confirms and
//!   a send in that window may select it

pub mod adapter;
pub mod builder;
pub mod client;
pub mod processor;
pub mod selection;

pub use adapter::UtxoAdapter;
pub use builder::{BuiltTransaction, FeePolicy, SendOptions, TransactionBuilder};
pub use client::UtxoClient;
pub use processor::{collect_effects, process_block, BlockEffects};
pub use selection::{select_first_fit, Selection};
