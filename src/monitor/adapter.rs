//! Chain adapter contract driven by the block monitor.

use std::future::Future;

use crate::blockchain::types::ChainResult;
use crate::monitor::handlers::Handlers;
use crate::resilience::RetryPolicy;

/// What an adapter gets on every poll.
pub struct PollContext<'a, Tx> {
    /// Registries to fan processed blocks out to.
    pub handlers: &'a Handlers<Tx>,
    /// Retry wrapper for the adapter's RPC calls.
    pub retry: &'a RetryPolicy,
}

/// A chain-specific fetch-and-process step.
///
/// The monitor calls `prepare` once per run, then `poll_blocks` in a loop,
/// and `shutdown` when the run ends for any reason.
pub trait ChainAdapter: Send + 'static {
    /// Transaction type handed to transaction and batch handlers.
    type Transaction: Clone + Send + Sync + 'static;

    /// Short label for logs.
    fn name(&self) -> &str;

    /// Position the adapter at `initial_height`, or at its stored or
    /// default position when `None`.
    fn prepare(&mut self, initial_height: Option<u64>) -> impl Future<Output = ChainResult<()>> + Send;

    /// Fetch every block not processed yet and process it.
    fn poll_blocks(
        &mut self,
        ctx: &PollContext<'_, Self::Transaction>,
    ) -> impl Future<Output = ChainResult<()>> + Send;

    /// Teardown hook, run after the loop ends.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
