//! chainwatch daemon
//!
//! Loads a TOML config, imports any configured address the ledger does not
//! watch yet and follows the chain until Ctrl-C or SIGTERM.
//!
//! # Architecture Overview
//!
//! ```text
//!   node RPC ──▶ chain adapter ──▶ block monitor ──▶ handlers (logging)
//!                     │
//!                     ▼
//!               ledger (SQLite, UTXO chains only)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use chainwatch::blockchain::ChainResult;
use chainwatch::config::{load_config, ChainKind, ChainwatchConfig};
use chainwatch::evm::EvmAdapter;
use chainwatch::lifecycle::signals::forward_termination;
use chainwatch::lifecycle::Shutdown;
use chainwatch::monitor::{BlockMonitor, MonitorRun};
use chainwatch::observability::{logging, metrics};
use chainwatch::resilience::RetryPolicy;
use chainwatch::tron::TronAdapter;
use chainwatch::utxo::UtxoClient;

#[derive(Parser)]
#[command(name = "chainwatch")]
#[command(about = "Block watcher for UTXO, EVM and TRON chains", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "chainwatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!("chainwatch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        network = %config.network.name,
        kind = ?config.network.kind,
        rpc_url = %config.rpc.url,
        poll_interval_ms = config.monitor.poll_interval_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let shutdown = Shutdown::new();
    tokio::spawn(forward_termination(shutdown.clone()));

    match config.network.kind {
        ChainKind::Utxo => run_utxo(&config, shutdown).await?,
        ChainKind::Evm => run_evm(&config, shutdown).await?,
        ChainKind::Tron => run_tron(&config, shutdown).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn poll_interval(config: &ChainwatchConfig) -> Duration {
    Duration::from_millis(config.monitor.poll_interval_ms)
}

async fn run_utxo(config: &ChainwatchConfig, shutdown: Shutdown) -> ChainResult<()> {
    let client = UtxoClient::from_config(config).await?;
    for entry in &config.addresses {
        client.ensure_watched(&entry.address, entry.from_height).await?;
    }

    client.on_block(|height| async move {
        tracing::info!(height, "Block processed");
        Ok(())
    });
    client.on_new_output(|output| async move {
        tracing::info!(
            address = %output.address,
            outpoint = %output.outpoint(),
            amount = output.amount,
            "Deposit detected"
        );
        Ok(())
    });

    let run = client
        .start_monitoring(config.monitor.start_height, poll_interval(config))
        .await?;
    run_until_shutdown(run, shutdown).await
}

async fn run_evm(config: &ChainwatchConfig, shutdown: Shutdown) -> ChainResult<()> {
    let adapter = EvmAdapter::new(config.network.name.clone(), &config.rpc)?;
    let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::from(&config.retries));

    monitor.on_batch(|batch| async move {
        tracing::info!(
            height = batch.height,
            transactions = batch.transactions.len(),
            "Block processed"
        );
        Ok(())
    });

    let run = monitor
        .start(config.monitor.start_height, poll_interval(config))
        .await?;
    run_until_shutdown(run, shutdown).await
}

async fn run_tron(config: &ChainwatchConfig, shutdown: Shutdown) -> ChainResult<()> {
    let adapter = TronAdapter::new(config.network.name.clone(), &config.rpc)?;
    let monitor = BlockMonitor::with_adapter(adapter, RetryPolicy::from(&config.retries));

    monitor.on_transaction(|tx| async move {
        tracing::debug!(hash = %tx.hash, from = %tx.from, value = %tx.value, "Transaction seen");
        Ok(())
    });
    monitor.on_batch(|batch| async move {
        tracing::info!(
            height = batch.height,
            transactions = batch.transactions.len(),
            "Block processed"
        );
        Ok(())
    });

    let run = monitor
        .start(config.monitor.start_height, poll_interval(config))
        .await?;
    run_until_shutdown(run, shutdown).await
}

/// Wait for the run to end on its own, or stop it on a termination signal.
async fn run_until_shutdown(run: MonitorRun, shutdown: Shutdown) -> ChainResult<()> {
    tokio::select! {
        result = run.wait() => result,
        _ = shutdown.wait() => {
            run.stop();
            run.wait().await
        }
    }
}
