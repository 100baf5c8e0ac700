//! Ordered event handler registries.
//!
//! Handlers run sequentially in registration order. A failing handler stops
//! dispatch and its error is returned to the caller, which aborts the poll.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::blockchain::types::{ChainError, ChainResult};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type handlers return.
pub type HandlerResult = Result<(), HandlerError>;

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// All transactions of one block, delivered as a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransactions<Tx> {
    pub height: u64,
    pub transactions: Vec<Tx>,
}

/// A list of async callbacks for one event kind. Clones share the list.
pub struct HandlerRegistry<T> {
    kind: &'static str,
    handlers: Arc<RwLock<Vec<Handler<T>>>>,
}

impl<T> Clone for HandlerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            handlers: self.handlers.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> HandlerRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a handler; it runs after every handler registered before it.
    pub fn register<F, Fut>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler<T> = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler with a clone of `event`, stopping at the first failure.
    pub async fn dispatch(&self, event: &T) -> ChainResult<()> {
        // snapshot so the lock is not held across awaits
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (index, handler) in snapshot.iter().enumerate() {
            if let Err(e) = handler(event.clone()).await {
                tracing::error!(kind = self.kind, index, error = %e, "Event handler failed");
                return Err(ChainError::Handler(format!(
                    "{} handler #{}: {}",
                    self.kind, index, e
                )));
            }
        }
        Ok(())
    }
}

/// The registries every chain adapter fans out to.
pub struct Handlers<Tx> {
    pub blocks: HandlerRegistry<u64>,
    pub transactions: HandlerRegistry<Tx>,
    pub batches: HandlerRegistry<BlockTransactions<Tx>>,
}

impl<Tx> Clone for Handlers<Tx> {
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            transactions: self.transactions.clone(),
            batches: self.batches.clone(),
        }
    }
}

impl<Tx: Clone + Send + Sync + 'static> Default for Handlers<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tx: Clone + Send + Sync + 'static> Handlers<Tx> {
    pub fn new() -> Self {
        Self {
            blocks: HandlerRegistry::new("block"),
            transactions: HandlerRegistry::new("transaction"),
            batches: HandlerRegistry::new("batch"),
        }
    }

    /// Block seen, by height.
    pub fn on_block<F, Fut>(&self, handler: F)
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.blocks.register(handler);
    }

    /// Each transaction of a processed block.
    pub fn on_transaction<F, Fut>(&self, handler: F)
    where
        F: Fn(Tx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.transactions.register(handler);
    }

    /// All transactions of a processed block at once.
    pub fn on_batch<F, Fut>(&self, handler: F)
    where
        F: Fn(BlockTransactions<Tx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.batches.register(handler);
    }

    /// Block, then each transaction, then the batch.
    pub async fn fan_out(&self, height: u64, transactions: Vec<Tx>) -> ChainResult<()> {
        self.blocks.dispatch(&height).await?;
        for tx in &transactions {
            self.transactions.dispatch(tx).await?;
        }
        if !self.batches.is_empty() {
            self.batches
                .dispatch(&BlockTransactions {
                    height,
                    transactions,
                })
                .await?;
        }
        Ok(())
    }
}
