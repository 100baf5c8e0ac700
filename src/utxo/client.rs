//! Application surface for one UTXO chain.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::client::BitcoinRpcClient;
use crate::blockchain::rpc::RpcClient;
use crate::blockchain::signer::Signer;
use crate::blockchain::types::{ChainError, ChainResult, EstimateMode, Transaction};
use crate::blockchain::wallet::KeyMaterial;
use crate::config::schema::ChainwatchConfig;
use crate::ledger::{Ledger, UnspentOutput};
use crate::monitor::{BlockMonitor, BlockTransactions, HandlerRegistry, HandlerResult, MonitorRun};
use crate::resilience::RetryPolicy;
use crate::utxo::adapter::UtxoAdapter;
use crate::utxo::builder::{SendOptions, TransactionBuilder};

/// Watches addresses on a UTXO chain and sends payments from them.
///
/// Owns one ledger and one block monitor. Sending needs a signer, attached
/// with [`UtxoClient::with_signer`]; without one the client is watch-only.
pub struct UtxoClient {
    rpc: Arc<dyn RpcClient>,
    ledger: Ledger,
    builder: Option<TransactionBuilder>,
    monitor: BlockMonitor<UtxoAdapter>,
    new_outputs: HandlerRegistry<UnspentOutput>,
    estimate_mode: EstimateMode,
    default_options: SendOptions,
}

impl UtxoClient {
    /// Wire the collaborators together and make sure the ledger has a cursor,
    /// taking the chain height when it has none.
    pub async fn connect(
        rpc: Arc<dyn RpcClient>,
        ledger: Ledger,
        retry: RetryPolicy,
    ) -> ChainResult<Self> {
        if ledger.cursor()?.is_none() {
            let tip = rpc.fetch_block_count().await?;
            ledger.init_cursor(tip)?;
        }

        let new_outputs = HandlerRegistry::new("new output");
        let adapter = UtxoAdapter::new(rpc.clone(), ledger.clone(), new_outputs.clone());

        Ok(Self {
            rpc,
            ledger,
            builder: None,
            monitor: BlockMonitor::with_adapter(adapter, retry),
            new_outputs,
            estimate_mode: EstimateMode::default(),
            default_options: SendOptions::default(),
        })
    }

    /// Build the node client and ledger described by `config`, then connect.
    pub async fn from_config(config: &ChainwatchConfig) -> ChainResult<Self> {
        let rpc = BitcoinRpcClient::new(config.rpc.clone(), config.network.amount_decimals)?;
        let ledger = Ledger::open(&config.ledger.url, &config.network.name)?;
        let mut client =
            Self::connect(Arc::new(rpc), ledger, RetryPolicy::from(&config.retries)).await?;

        client.estimate_mode = config.fees.estimate_mode;
        client.default_options =
            SendOptions::estimate(config.fees.conf_target, config.fees.estimate_mode);
        Ok(client)
    }

    /// Enable sending with `signer`.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        let builder = TransactionBuilder::new(self.rpc.clone(), self.ledger.clone(), signer)
            .with_estimate_mode(self.estimate_mode);
        self.builder = Some(builder);
        self
    }

    fn builder(&self) -> ChainResult<&TransactionBuilder> {
        self.builder
            .as_ref()
            .ok_or_else(|| ChainError::Config("no signer attached; client is watch-only".into()))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Options used when the caller has no preference.
    pub fn default_send_options(&self) -> SendOptions {
        self.default_options
    }

    /// Watch `address` from `from_height`, or from the current chain height.
    ///
    /// A height below the cursor rewinds it so earlier blocks are rescanned.
    pub async fn import_address(&self, address: &str, from_height: Option<u64>) -> ChainResult<u64> {
        let height = match from_height {
            Some(height) => height,
            None => self.rpc.fetch_block_count().await?,
        };
        self.ledger.add_watched_address(address, Some(height))?;
        tracing::info!(address, from_height = height, "Address imported");
        Ok(height)
    }

    /// Import `address` unless the ledger already watches it from
    /// `from_height` or earlier. Returns the import height when one happened.
    ///
    /// Safe to call on every start: an already-watched address leaves the
    /// cursor and reservations alone. Only a height strictly below the stored
    /// one triggers a back-fill.
    pub async fn ensure_watched(
        &self,
        address: &str,
        from_height: Option<u64>,
    ) -> ChainResult<Option<u64>> {
        let existing = self
            .ledger
            .list_watched_addresses()?
            .into_iter()
            .find(|w| w.address == address);

        let import = match (existing, from_height) {
            (None, _) => true,
            (Some(watched), Some(requested)) => {
                watched.sync_from_height.map_or(true, |stored| requested < stored)
            }
            (Some(_), None) => false,
        };
        if !import {
            tracing::debug!(address, "Address already watched");
            return Ok(None);
        }
        self.import_address(address, from_height).await.map(Some)
    }

    /// Sum of non-reserved unspent outputs owned by `address`.
    pub fn get_balance(&self, address: &str) -> ChainResult<u64> {
        self.ledger.balance(address)
    }

    /// Non-reserved unspent outputs of `address`, in ledger order.
    pub fn list_unspent(&self, address: &str) -> ChainResult<Vec<UnspentOutput>> {
        self.ledger.list_unspent_outputs(address, false)
    }

    pub async fn send(
        &self,
        key: &KeyMaterial,
        to: &str,
        amount: u64,
        options: SendOptions,
    ) -> ChainResult<String> {
        self.builder()?
            .send(key, &[(to.to_string(), amount)], options)
            .await
    }

    pub async fn send_bulk(
        &self,
        key: &KeyMaterial,
        destinations: &[(String, u64)],
        options: SendOptions,
    ) -> ChainResult<String> {
        self.builder()?.send(key, destinations, options).await
    }

    pub async fn speed_up_by_self_child_payment(
        &self,
        key: &KeyMaterial,
        parent_txid: &str,
        conf_target: u16,
    ) -> ChainResult<String> {
        self.builder()?
            .speed_up_by_self_child_payment(key, parent_txid, conf_target)
            .await
    }

    /// Start the block monitor; returns the active run if already started.
    pub async fn start_monitoring(
        &self,
        from_height: Option<u64>,
        poll_interval: Duration,
    ) -> ChainResult<MonitorRun> {
        self.monitor.start(from_height, poll_interval).await
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop();
    }

    /// Wait until the monitor has torn down; returns the error that ended it.
    pub async fn wait_closed(&self) -> ChainResult<()> {
        self.monitor.wait_closed().await
    }

    pub fn on_block<F, Fut>(&self, handler: F)
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.monitor.on_block(handler);
    }

    pub fn on_transaction<F, Fut>(&self, handler: F)
    where
        F: Fn(Transaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.monitor.on_transaction(handler);
    }

    pub fn on_batch<F, Fut>(&self, handler: F)
    where
        F: Fn(BlockTransactions<Transaction>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.monitor.on_batch(handler);
    }

    /// An output paying a watched address was committed to the ledger.
    pub fn on_new_output<F, Fut>(&self, handler: F)
    where
        F: Fn(UnspentOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.new_outputs.register(handler);
    }
}
