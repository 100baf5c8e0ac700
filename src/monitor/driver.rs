//! Block monitor driver.
//!
//! Owns the lifecycle of one polling task per monitor: start, stop, and
//! a guaranteed teardown once the loop ends.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

use crate::blockchain::types::{ChainError, ChainResult};
use crate::lifecycle::Shutdown;
use crate::monitor::adapter::{ChainAdapter, PollContext};
use crate::monitor::handlers::{BlockTransactions, HandlerResult, Handlers};
use crate::resilience::RetryPolicy;

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Handle to one monitoring run. Clones observe the same run.
#[derive(Clone, Debug)]
pub struct MonitorRun {
    stop: Shutdown,
    done: watch::Receiver<Option<ChainResult<()>>>,
}

impl MonitorRun {
    /// Ask the run to stop; it winds down at its next suspension point.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// True once teardown has completed.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait for the run to end. Resolves with the error that ended it, if any.
    pub async fn wait(&self) -> ChainResult<()> {
        let mut done = self.done.clone();
        let result = match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(ChainError::Handler(
                "monitor task ended without reporting".into(),
            )),
        };
        result
    }
}

/// Drives a [`ChainAdapter`] in a background polling loop.
///
/// At most one run is active per monitor. Calling [`BlockMonitor::start`]
/// while a run is active returns that run instead of starting another.
pub struct BlockMonitor<A: ChainAdapter> {
    adapter: Option<Arc<Mutex<A>>>,
    handlers: Handlers<A::Transaction>,
    retry: RetryPolicy,
    run_lock: Mutex<()>,
    current: StdMutex<Option<MonitorRun>>,
    state: Arc<StdMutex<MonitorState>>,
}

impl<A: ChainAdapter> BlockMonitor<A> {
    /// A monitor with no adapter bound yet.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            adapter: None,
            handlers: Handlers::new(),
            retry,
            run_lock: Mutex::new(()),
            current: StdMutex::new(None),
            state: Arc::new(StdMutex::new(MonitorState::Idle)),
        }
    }

    pub fn with_adapter(adapter: A, retry: RetryPolicy) -> Self {
        let mut monitor = Self::new(retry);
        monitor.bind(adapter);
        monitor
    }

    /// Bind the chain adapter. Takes effect on the next run.
    pub fn bind(&mut self, adapter: A) {
        self.adapter = Some(Arc::new(Mutex::new(adapter)));
    }

    pub fn handlers(&self) -> &Handlers<A::Transaction> {
        &self.handlers
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_block<F, Fut>(&self, handler: F)
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.on_block(handler);
    }

    pub fn on_transaction<F, Fut>(&self, handler: F)
    where
        F: Fn(A::Transaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.on_transaction(handler);
    }

    pub fn on_batch<F, Fut>(&self, handler: F)
    where
        F: Fn(BlockTransactions<A::Transaction>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.on_batch(handler);
    }

    /// Start polling, or return the active run if there is one.
    pub async fn start(
        &self,
        initial_height: Option<u64>,
        poll_interval: Duration,
    ) -> ChainResult<MonitorRun> {
        let adapter = self
            .adapter
            .clone()
            .ok_or_else(|| ChainError::Config("no chain adapter bound to monitor".into()))?;

        let _guard = self.run_lock.lock().await;
        if let Some(run) = self.current_run() {
            if !run.is_finished() {
                tracing::debug!("Monitor already running, returning active run");
                return Ok(run);
            }
        }

        let stop = Shutdown::new();
        let (done_tx, done_rx) = watch::channel(None);
        let run = MonitorRun {
            stop: stop.clone(),
            done: done_rx,
        };

        self.set_state(MonitorState::Running);
        let handlers = self.handlers.clone();
        let retry = self.retry.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            let task = tokio::spawn(drive(
                adapter,
                handlers,
                retry,
                initial_height,
                poll_interval,
                stop,
            ));
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => Err(ChainError::Handler(format!("monitor task panicked: {}", e))),
            };
            if let Err(e) = &outcome {
                tracing::error!(error = %e, "Block monitor terminated");
            }
            *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = MonitorState::Stopped;
            done_tx.send_replace(Some(outcome));
        });

        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(run.clone());
        Ok(run)
    }

    /// Request the active run to stop. No-op when idle.
    pub fn stop(&self) {
        if let Some(run) = self.current_run() {
            begin_stopping(&self.state);
            run.stop();
        }
    }

    /// Wait until the current run, if any, has fully torn down.
    pub async fn wait_closed(&self) -> ChainResult<()> {
        match self.current_run() {
            Some(run) => run.wait().await,
            None => Ok(()),
        }
    }

    fn current_run(&self) -> Option<MonitorRun> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }
}

/// Move `Running` to `Stopping`. Any other state, `Stopped` in particular,
/// is left alone so the task's final write always wins.
fn begin_stopping(state: &StdMutex<MonitorState>) -> bool {
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *state == MonitorState::Running {
        *state = MonitorState::Stopping;
        true
    } else {
        false
    }
}

async fn drive<A: ChainAdapter>(
    adapter: Arc<Mutex<A>>,
    handlers: Handlers<A::Transaction>,
    retry: RetryPolicy,
    initial_height: Option<u64>,
    poll_interval: Duration,
    stop: Shutdown,
) -> ChainResult<()> {
    let mut adapter = adapter.lock().await;
    let ctx = PollContext {
        handlers: &handlers,
        retry: &retry,
    };
    tracing::info!(chain = adapter.name(), "Block monitor started");

    let result = tokio::select! {
        result = poll_loop(&mut *adapter, &ctx, initial_height, poll_interval) => result,
        _ = stop.wait() => Ok(()),
    };

    adapter.shutdown().await;
    tracing::info!(chain = adapter.name(), "Block monitor stopped");
    result
}

async fn poll_loop<A: ChainAdapter>(
    adapter: &mut A,
    ctx: &PollContext<'_, A::Transaction>,
    initial_height: Option<u64>,
    poll_interval: Duration,
) -> ChainResult<()> {
    adapter.prepare(initial_height).await?;
    loop {
        adapter.poll_blocks(ctx).await?;
        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct CountingAdapter {
        next: u64,
        tip: Arc<AtomicU64>,
        torn_down: Arc<AtomicBool>,
        fail_at: Option<u64>,
    }

    impl ChainAdapter for CountingAdapter {
        type Transaction = String;

        fn name(&self) -> &str {
            "counting"
        }

        async fn prepare(&mut self, initial_height: Option<u64>) -> ChainResult<()> {
            if let Some(height) = initial_height {
                self.next = height;
            }
            Ok(())
        }

        async fn poll_blocks(&mut self, ctx: &PollContext<'_, String>) -> ChainResult<()> {
            while self.next <= self.tip.load(Ordering::SeqCst) {
                if Some(self.next) == self.fail_at {
                    return Err(ChainError::Rpc {
                        code: -1,
                        message: "node exploded".into(),
                    });
                }
                ctx.handlers
                    .fan_out(self.next, vec![format!("tx{}", self.next)])
                    .await?;
                self.next += 1;
            }
            Ok(())
        }

        async fn shutdown(&mut self) {
            self.torn_down.store(true, Ordering::SeqCst);
        }
    }

    fn adapter(tip: u64, fail_at: Option<u64>) -> (CountingAdapter, Arc<AtomicBool>) {
        let torn_down = Arc::new(AtomicBool::new(false));
        let adapter = CountingAdapter {
            next: 0,
            tip: Arc::new(AtomicU64::new(tip)),
            torn_down: torn_down.clone(),
            fail_at,
        };
        (adapter, torn_down)
    }

    #[tokio::test]
    async fn test_start_without_adapter_fails() {
        let monitor = BlockMonitor::<CountingAdapter>::new(RetryPolicy::none());
        let err = monitor
            .start(None, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_processes_blocks_then_stops() {
        let (adapter, torn_down) = adapter(3, None);
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        monitor.on_block(move |height| {
            let s = s.clone();
            async move {
                s.lock().unwrap().push(height);
                Ok(())
            }
        });

        let run = monitor.start(Some(1), Duration::from_millis(5)).await.unwrap();
        while seen.lock().unwrap().len() < 3 {
            tokio::task::yield_now().await;
        }
        monitor.stop();
        run.wait().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert!(torn_down.load(Ordering::SeqCst));
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_returns_active_run() {
        let (adapter, _) = adapter(0, None);
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());
        let first = monitor.start(None, Duration::from_millis(5)).await.unwrap();
        let second = monitor.start(Some(100), Duration::from_millis(5)).await.unwrap();

        second.stop();
        first.wait().await.unwrap();
        assert!(first.is_finished());
        assert!(second.is_finished());
    }

    #[tokio::test]
    async fn test_fatal_error_ends_run_with_teardown() {
        let (adapter, torn_down) = adapter(5, Some(2));
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());

        monitor.start(None, Duration::from_millis(5)).await.unwrap();
        let err = monitor.wait_closed().await.unwrap_err();

        assert!(matches!(err, ChainError::Rpc { code: -1, .. }));
        assert!(torn_down.load(Ordering::SeqCst));
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_handler_error_is_fatal() {
        let (adapter, torn_down) = adapter(2, None);
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());
        monitor.on_transaction(|tx| async move {
            if tx == "tx1" {
                Err::<(), crate::monitor::handlers::HandlerError>("rejecting tx1".into())
            } else {
                Ok(())
            }
        });

        monitor.start(None, Duration::from_millis(5)).await.unwrap();
        let err = monitor.wait_closed().await.unwrap_err();
        assert!(matches!(err, ChainError::Handler(ref msg) if msg.contains("rejecting tx1")));
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (adapter, _) = adapter(0, None);
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());

        let first = monitor.start(None, Duration::from_millis(5)).await.unwrap();
        monitor.stop();
        monitor.wait_closed().await.unwrap();

        let second = monitor.start(None, Duration::from_millis(5)).await.unwrap();
        assert!(first.is_finished());
        assert!(!second.is_finished());
        assert_eq!(monitor.state(), MonitorState::Running);
        monitor.stop();
        monitor.wait_closed().await.unwrap();
    }

    #[test]
    fn test_stopping_never_overwrites_stopped() {
        let state = StdMutex::new(MonitorState::Stopped);
        assert!(!begin_stopping(&state));
        assert_eq!(*state.lock().unwrap(), MonitorState::Stopped);

        let state = StdMutex::new(MonitorState::Running);
        assert!(begin_stopping(&state));
        assert_eq!(*state.lock().unwrap(), MonitorState::Stopping);
    }

    #[tokio::test]
    async fn test_stop_after_run_ended_keeps_stopped() {
        let (adapter, _) = adapter(5, Some(1));
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());

        monitor.start(None, Duration::from_millis(5)).await.unwrap();
        assert!(monitor.wait_closed().await.is_err());
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_closed_when_idle() {
        let (adapter, _) = adapter(0, None);
        let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::none());
        monitor.wait_closed().await.unwrap();
    }
}
