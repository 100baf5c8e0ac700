//! Block processing for UTXO chains.
//!
//! # Responsibilities
//! - Turn one fetched block into ledger additions and removals
//! - Commit them together with the cursor advance
//! - Fan the block out to registered handlers
//!
//! Outputs are collected before inputs, so an output created and spent in
//! the same block is added and then removed, whatever the transaction order.

use std::collections::HashSet;

use crate::blockchain::types::{Block, ChainResult, OutPoint, Transaction};
use crate::ledger::{AppliedBlock, Ledger, UnspentOutput};
use crate::monitor::{HandlerRegistry, Handlers};
use crate::observability::metrics;

/// Ledger changes implied by one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEffects {
    pub created: Vec<UnspentOutput>,
    pub spent: Vec<OutPoint>,
}

/// Compute the effects of `block` given the watched addresses and the ids of
/// transactions that currently own tracked outputs.
pub fn collect_effects(
    block: &Block,
    watched: &HashSet<String>,
    mut tracked_txids: HashSet<String>,
) -> BlockEffects {
    let mut effects = BlockEffects::default();

    for tx in &block.transactions {
        for output in &tx.outputs {
            let Some(address) = output.address.as_ref() else {
                continue;
            };
            if watched.contains(address) {
                effects
                    .created
                    .push(UnspentOutput::new(tx.txid.clone(), output.n, address.clone(), output.value));
            }
        }
    }
    tracked_txids.extend(effects.created.iter().map(|o| o.txid.clone()));

    for tx in &block.transactions {
        for input in &tx.inputs {
            // coinbase inputs have no previous output
            let Some(prev) = input.previous_output.as_ref() else {
                continue;
            };
            if tracked_txids.contains(&prev.txid) {
                effects.spent.push(prev.clone());
            }
        }
    }

    effects
}

/// Apply `block` at `height` to the ledger, then notify handlers.
///
/// The cursor moves to `height + 1` in the same SQL transaction as the row
/// changes. Handlers run after the commit; a handler error is returned.
pub async fn process_block(
    ledger: &Ledger,
    height: u64,
    block: &Block,
    handlers: &Handlers<Transaction>,
    new_outputs: &HandlerRegistry<UnspentOutput>,
) -> ChainResult<AppliedBlock> {
    let watched = ledger.watched_address_set()?;
    let tracked = ledger.tracked_tx_ids()?;
    let effects = collect_effects(block, &watched, tracked);

    let applied = ledger.apply_block(height + 1, &effects.created, &effects.spent)?;

    metrics::record_block_processed(ledger.network(), height + 1);
    metrics::record_outputs(ledger.network(), applied.added, applied.removed);
    tracing::debug!(
        network = ledger.network(),
        height,
        transactions = block.transactions.len(),
        added = applied.added,
        removed = applied.removed,
        "Block processed"
    );

    handlers.fan_out(height, block.transactions.clone()).await?;
    for output in &effects.created {
        new_outputs.dispatch(output).await?;
    }

    Ok(applied)
}
