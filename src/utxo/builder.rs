//! Transaction building, submission and child-pays-for-parent fee bumps.
//!
//! # Responsibilities
//! - Select inputs first-fit from the sender's unspent outputs
//! - Resolve the fee from a fixed amount, a rate or a node estimate
//! - Assemble outputs (destinations, then change) and sign every input
//! - Broadcast, then reserve the spent outputs in the ledger
//!
//! Nothing here retries: a failed broadcast is returned as is.

use std::collections::HashSet;
use std::sync::Arc;

use crate::blockchain::rpc::RpcClient;
use crate::blockchain::signer::Signer;
use crate::blockchain::transaction::{PaymentInput, PaymentOutput, UnsignedTransaction};
use crate::blockchain::types::{ChainError, ChainResult, EstimateMode, FeeRate, OutPoint};
use crate::blockchain::wallet::KeyMaterial;
use crate::ledger::{Ledger, UnspentOutput};
use crate::observability::metrics;
use crate::utxo::selection::{select_first_fit, Selection};

/// Draft passes allowed for the measured fee to settle.
const MAX_FEE_PASSES: usize = 3;

/// Smallest child output a fee bump may leave behind.
pub const DUST_LIMIT: u64 = 546;

/// How the fee of a new transaction is decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeePolicy {
    /// Total fee in smallest units.
    Fixed(u64),
    /// Smallest units per virtual byte.
    Rate(FeeRate),
    /// Ask the node for a rate.
    Estimate { conf_target: u16, mode: EstimateMode },
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy::Estimate {
            conf_target: 6,
            mode: EstimateMode::Economical,
        }
    }
}

/// Fee options for `send` and `send_bulk`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SendOptions {
    pub fee: FeePolicy,
    /// Take the fee out of the destination amounts instead of the change.
    pub deduct_fee: bool,
}

impl SendOptions {
    pub fn fixed(fee: u64) -> Self {
        Self {
            fee: FeePolicy::Fixed(fee),
            deduct_fee: false,
        }
    }

    pub fn rate(rate: FeeRate) -> Self {
        Self {
            fee: FeePolicy::Rate(rate),
            deduct_fee: false,
        }
    }

    pub fn estimate(conf_target: u16, mode: EstimateMode) -> Self {
        Self {
            fee: FeePolicy::Estimate { conf_target, mode },
            deduct_fee: false,
        }
    }

    pub fn deduct_fee(mut self) -> Self {
        self.deduct_fee = true;
        self
    }
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub tx: UnsignedTransaction,
    pub raw_hex: String,
    pub fee: u64,
}

/// Builds, signs and submits payments from one sender key.
#[derive(Clone)]
pub struct TransactionBuilder {
    rpc: Arc<dyn RpcClient>,
    ledger: Ledger,
    signer: Arc<dyn Signer>,
    estimate_mode: EstimateMode,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<dyn RpcClient>, ledger: Ledger, signer: Arc<dyn Signer>) -> Self {
        Self {
            rpc,
            ledger,
            signer,
            estimate_mode: EstimateMode::Economical,
        }
    }

    /// Estimation mode used for fee bumps.
    pub fn with_estimate_mode(mut self, mode: EstimateMode) -> Self {
        self.estimate_mode = mode;
        self
    }

    /// Pay `destinations` in one transaction and return its id.
    pub async fn send(
        &self,
        key: &KeyMaterial,
        destinations: &[(String, u64)],
        options: SendOptions,
    ) -> ChainResult<String> {
        let built = self.build(key, destinations, options).await?;
        self.submit(&built).await
    }

    /// Build and sign a payment without broadcasting it.
    pub async fn build(
        &self,
        key: &KeyMaterial,
        destinations: &[(String, u64)],
        options: SendOptions,
    ) -> ChainResult<BuiltTransaction> {
        let target = validate_destinations(destinations)?;
        let sender = self.signer.address(key)?;
        let candidates = self.ledger.list_unspent_outputs(&sender, false)?;

        let fee = match options.fee {
            FeePolicy::Fixed(fee) => fee,
            FeePolicy::Rate(rate) => {
                self.measure_fee(key, &sender, &candidates, destinations, target, rate, options.deduct_fee)?
            }
            FeePolicy::Estimate { conf_target, mode } => {
                let rate = self.rpc.estimate_fee_rate(conf_target, mode).await?;
                self.measure_fee(key, &sender, &candidates, destinations, target, rate, options.deduct_fee)?
            }
        };

        let selection = select_first_fit(&candidates, required(target, fee, options.deduct_fee)?)?;
        let mut tx = assemble(&sender, &selection, destinations, fee, options.deduct_fee)?;
        self.sign_all(&mut tx, key)?;
        let raw_hex = self.signer.serialize_to_hex(&tx)?;

        tracing::debug!(
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee,
            deduct_fee = options.deduct_fee,
            "Transaction built"
        );
        Ok(BuiltTransaction { tx, raw_hex, fee })
    }

    /// Broadcast a built transaction, then reserve its inputs.
    pub async fn submit(&self, built: &BuiltTransaction) -> ChainResult<String> {
        let txid = self.rpc.broadcast(&built.raw_hex).await?;
        let reserved = self.ledger.mark_used_many(&built.tx.outpoints())?;

        metrics::record_broadcast(self.ledger.network());
        tracing::info!(
            txid = %txid,
            fee = built.fee,
            reserved,
            "Transaction broadcast"
        );
        Ok(txid)
    }

    /// Bump an unconfirmed parent by spending its output back to the sender
    /// with a fee covering both transactions at the estimated rate.
    pub async fn speed_up_by_self_child_payment(
        &self,
        key: &KeyMaterial,
        parent_txid: &str,
        conf_target: u16,
    ) -> ChainResult<String> {
        let sender = self.signer.address(key)?;
        let parent = self.rpc.fetch_raw_transaction(parent_txid).await?;
        if parent.confirmations > 0 {
            return Err(ChainError::InvalidArgument(format!(
                "transaction {} already has {} confirmations",
                parent_txid, parent.confirmations
            )));
        }

        let own_output = parent
            .outputs
            .iter()
            .filter(|o| o.address.as_deref() == Some(sender.as_str()))
            .max_by_key(|o| o.value)
            .ok_or_else(|| {
                ChainError::NotImplemented(format!(
                    "transaction {} has no output paying back to the sender; \
                     fee bumping through other inputs is not supported",
                    parent_txid
                ))
            })?;

        let rate = self.rpc.estimate_fee_rate(conf_target, self.estimate_mode).await?;
        let input = PaymentInput::new(
            OutPoint::new(parent.txid.clone(), own_output.n),
            own_output.value,
            sender.clone(),
        );

        let mut draft = UnsignedTransaction {
            inputs: vec![input.clone()],
            outputs: vec![PaymentOutput::new(sender.clone(), own_output.value)],
        };
        self.sign_all(&mut draft, key)?;
        let child_vsize = self.signer.vsize(&draft)?;

        let package_fee = rate.fee_for(parent.vsize + child_vsize);
        let parent_fee = parent.fee.unwrap_or(0);
        let child_fee = package_fee
            .saturating_sub(parent_fee)
            .max(rate.fee_for(child_vsize));

        let required = child_fee + DUST_LIMIT;
        if own_output.value < required {
            return Err(ChainError::InsufficientFunds {
                available: own_output.value,
                required,
            });
        }

        let mut child = UnsignedTransaction {
            inputs: vec![input],
            outputs: vec![PaymentOutput::new(sender, own_output.value - child_fee)],
        };
        self.sign_all(&mut child, key)?;
        let raw_hex = self.signer.serialize_to_hex(&child)?;

        let txid = self.rpc.broadcast(&raw_hex).await?;
        self.ledger.mark_used_many(&child.outpoints())?;
        metrics::record_broadcast(self.ledger.network());
        tracing::info!(
            parent = parent_txid,
            child = %txid,
            child_fee,
            parent_fee,
            "Fee bump broadcast"
        );
        Ok(txid)
    }

    /// Fee at `rate` for the transaction these inputs and outputs produce,
    /// measured on signed zero-fee drafts.
    #[allow(clippy::too_many_arguments)]
    fn measure_fee(
        &self,
        key: &KeyMaterial,
        sender: &str,
        candidates: &[UnspentOutput],
        destinations: &[(String, u64)],
        target: u64,
        rate: FeeRate,
        deduct_fee: bool,
    ) -> ChainResult<u64> {
        let mut fee = 0;
        for _ in 0..MAX_FEE_PASSES {
            let selection = select_first_fit(candidates, required(target, fee, deduct_fee)?)?;
            let mut draft = assemble(sender, &selection, destinations, fee, deduct_fee)?;
            self.sign_all(&mut draft, key)?;
            let needed = rate.fee_for(self.signer.vsize(&draft)?);
            if needed <= fee {
                return Ok(fee);
            }
            // a larger fee may pull in another input; measure again
            fee = needed;
        }
        Err(ChainError::CreateTransaction(format!(
            "fee at {} per vbyte did not settle after {} passes (last {})",
            rate.0, MAX_FEE_PASSES, fee
        )))
    }

    fn sign_all(&self, tx: &mut UnsignedTransaction, key: &KeyMaterial) -> ChainResult<()> {
        for index in 0..tx.inputs.len() {
            self.signer.sign(tx, index, key)?;
        }
        Ok(())
    }
}

fn validate_destinations(destinations: &[(String, u64)]) -> ChainResult<u64> {
    if destinations.is_empty() {
        return Err(ChainError::InvalidArgument("no destinations given".into()));
    }
    let mut seen = HashSet::new();
    let mut target: u64 = 0;
    for (address, amount) in destinations {
        if *amount == 0 {
            return Err(ChainError::InvalidArgument(format!(
                "amount for {} must be positive",
                address
            )));
        }
        if !seen.insert(address.as_str()) {
            return Err(ChainError::InvalidArgument(format!(
                "duplicate destination {}",
                address
            )));
        }
        target = target
            .checked_add(*amount)
            .ok_or_else(|| ChainError::InvalidArgument("total amount overflows".into()))?;
    }
    Ok(target)
}

fn required(target: u64, fee: u64, deduct_fee: bool) -> ChainResult<u64> {
    if deduct_fee {
        return Ok(target);
    }
    target
        .checked_add(fee)
        .ok_or_else(|| ChainError::InvalidArgument("amount plus fee overflows".into()))
}

/// Destination outputs in the given order, then change to `sender` if any.
fn assemble(
    sender: &str,
    selection: &Selection,
    destinations: &[(String, u64)],
    fee: u64,
    deduct_fee: bool,
) -> ChainResult<UnsignedTransaction> {
    let mut outputs: Vec<PaymentOutput> = destinations
        .iter()
        .map(|(address, amount)| PaymentOutput::new(address.clone(), *amount))
        .collect();

    if deduct_fee {
        let count = outputs.len() as u64;
        let share = fee / count;
        let remainder = fee % count;
        for (i, output) in outputs.iter_mut().enumerate() {
            let cut = if i == 0 { share + remainder } else { share };
            if output.value <= cut {
                return Err(ChainError::CreateTransaction(format!(
                    "output of {} to {} cannot cover its fee share of {}",
                    output.value, output.address, cut
                )));
            }
            output.value -= cut;
        }
    }
    let spent = outputs.iter().map(|o| o.value).sum::<u64>() + fee;

    let change = selection
        .total
        .checked_sub(spent)
        .ok_or(ChainError::InsufficientFunds {
            available: selection.total,
            required: spent,
        })?;
    if change > 0 {
        outputs.push(PaymentOutput::new(sender, change));
    }

    let inputs = selection
        .inputs
        .iter()
        .map(|u| PaymentInput::new(u.outpoint(), u.amount, u.address.clone()))
        .collect();

    Ok(UnsignedTransaction { inputs, outputs })
}
