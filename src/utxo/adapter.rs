//! UTXO chain adapter for the block monitor.

use std::sync::Arc;

use crate::blockchain::rpc::RpcClient;
use crate::blockchain::types::{ChainError, ChainResult, Transaction};
use crate::ledger::{Ledger, UnspentOutput};
use crate::monitor::{ChainAdapter, HandlerRegistry, PollContext};
use crate::utxo::processor::process_block;

/// Fetches blocks from the cursor up to the chain tip and feeds them to the
/// block processor.
pub struct UtxoAdapter {
    rpc: Arc<dyn RpcClient>,
    ledger: Ledger,
    new_outputs: HandlerRegistry<UnspentOutput>,
}

impl UtxoAdapter {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        ledger: Ledger,
        new_outputs: HandlerRegistry<UnspentOutput>,
    ) -> Self {
        Self {
            rpc,
            ledger,
            new_outputs,
        }
    }
}

impl ChainAdapter for UtxoAdapter {
    type Transaction = Transaction;

    fn name(&self) -> &str {
        self.ledger.network()
    }

    async fn prepare(&mut self, initial_height: Option<u64>) -> ChainResult<()> {
        match initial_height {
            Some(height) => self.ledger.set_cursor(height)?,
            None => {
                if self.ledger.cursor()?.is_none() {
                    let tip = self.rpc.fetch_block_count().await?;
                    self.ledger.init_cursor(tip)?;
                }
            }
        }
        tracing::info!(
            network = self.ledger.network(),
            cursor = ?self.ledger.cursor()?,
            "UTXO adapter positioned"
        );
        Ok(())
    }

    async fn poll_blocks(&mut self, ctx: &PollContext<'_, Transaction>) -> ChainResult<()> {
        let rpc = self.rpc.as_ref();
        let tip = ctx
            .retry
            .run("getblockcount", move || rpc.fetch_block_count())
            .await?;

        loop {
            let height = self.ledger.cursor()?.ok_or_else(|| {
                ChainError::NotConnected("ledger cursor is not initialised".into())
            })?;
            if height > tip {
                return Ok(());
            }

            let block = ctx
                .retry
                .run("getblock", move || rpc.fetch_block(height))
                .await?;
            process_block(&self.ledger, height, &block, ctx.handlers, &self.new_outputs).await?;
        }
    }
}
