//! Ledger subsystem.
//!
//! # Data Flow
//! ```text
//! import_address → {network}_addresses (may rewind the cursor)
//! block processor → apply_block: {network}_utxo rows + {network}_last_block, one transaction
//! transaction builder → list_unspent_outputs, mark_used_many
//! ```
//!
//! # Design Decisions
//! - One ledger per network, named by a table prefix; no global state
//! - `mark_used` and removals are idempotent
//! - The cursor is the next height to process

pub mod store;
pub mod types;

pub use store::Ledger;
pub use types::{AppliedBlock, UnspentOutput, WatchedAddress};
