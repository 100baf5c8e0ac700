//! Payment building, submission and fee bumping against a scripted node.

mod common;

use std::sync::Arc;

use chainwatch::blockchain::{
    ChainError, ChainResult, EstimateMode, FeeRate, KeyMaterial, OutPoint, PaymentOutput,
    RawTransaction, Signer, TxOutput, UnsignedTransaction,
};
use chainwatch::ledger::{Ledger, UnspentOutput};
use chainwatch::monitor::{HandlerRegistry, Handlers};
use chainwatch::resilience::RetryPolicy;
use chainwatch::utxo::{process_block, SendOptions, UtxoClient};
use common::{block, decode_raw, mined, test_key, transaction, MockRpc, MockSigner};

const SENDER: &str = "addr1";

/// A signing client for `SENDER` holding `outputs` (txid, vout, amount).
async fn funded_client(rpc: &MockRpc, outputs: &[(&str, u32, u64)]) -> UtxoClient {
    let ledger = Ledger::open_in_memory("btc_test").unwrap();
    let client = UtxoClient::connect(Arc::new(rpc.clone()), ledger, RetryPolicy::none())
        .await
        .unwrap()
        .with_signer(Arc::new(MockSigner::new(SENDER)));

    client.import_address(SENDER, Some(0)).await.unwrap();
    for (txid, vout, amount) in outputs {
        client
            .ledger()
            .add_unspent_output(&UnspentOutput::new(*txid, *vout, SENDER, *amount))
            .unwrap();
    }
    client
}

/// Serialized size as `MockSigner` reports it.
fn vsize_of(raw_hex: &str) -> u64 {
    (raw_hex.len() / 2) as u64
}

#[tokio::test]
async fn test_send_with_change_and_reconcile() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 16263)]).await;

    let txid = client
        .send(&test_key(), "addr2", 1000, SendOptions::fixed(10))
        .await
        .unwrap();
    assert_eq!(txid, "sent1");

    let broadcasts = rpc.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let tx = decode_raw(&broadcasts[0]);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.inputs[0].previous_output, OutPoint::new("seed", 0));
    assert!(tx.is_fully_signed());
    assert_eq!(
        tx.outputs,
        vec![PaymentOutput::new("addr2", 1000), PaymentOutput::new(SENDER, 15253)]
    );

    // reserved until the chain confirms the spend
    assert_eq!(client.get_balance(SENDER).unwrap(), 0);
    assert!(client.list_unspent(SENDER).unwrap().is_empty());

    let confirmed = block(101, vec![mined(&txid, &tx)]);
    process_block(
        client.ledger(),
        101,
        &confirmed,
        &Handlers::new(),
        &HandlerRegistry::new("new output"),
    )
    .await
    .unwrap();

    assert_eq!(
        client.ledger().list_unspent_outputs(SENDER, true).unwrap(),
        vec![UnspentOutput::new("sent1", 1, SENDER, 15253)]
    );
    assert_eq!(client.get_balance(SENDER).unwrap(), 15253);
}

#[tokio::test]
async fn test_deduct_fee_splits_across_destinations() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 2000)]).await;

    let destinations = vec![("addr2".to_string(), 1000), ("addr3".to_string(), 1000)];
    client
        .send_bulk(&test_key(), &destinations, SendOptions::fixed(600).deduct_fee())
        .await
        .unwrap();

    let tx = decode_raw(&rpc.broadcasts()[0]);
    assert_eq!(
        tx.outputs,
        vec![PaymentOutput::new("addr2", 700), PaymentOutput::new("addr3", 700)]
    );
    assert_eq!(tx.fee(), 600);
}

#[tokio::test]
async fn test_deduct_fee_still_needs_the_full_amount() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 5000)]).await;

    let err = client
        .send(&test_key(), "addr2", 10000, SendOptions::fixed(100).deduct_fee())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ChainError::InsufficientFunds {
            available: 5000,
            required: 10000
        }
    );
    let message = err.to_string();
    assert!(message.contains("5000") && message.contains("10000"));
    assert!(rpc.broadcasts().is_empty());
    assert_eq!(client.get_balance(SENDER).unwrap(), 5000);
}

#[tokio::test]
async fn test_rate_fee_measured_on_signed_draft() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 100_000)]).await;

    client
        .send(&test_key(), "addr2", 1000, SendOptions::rate(FeeRate(2.0)))
        .await
        .unwrap();

    let raw = &rpc.broadcasts()[0];
    let tx = decode_raw(raw);
    assert_eq!(tx.fee(), FeeRate(2.0).fee_for(vsize_of(raw)));
    assert!(tx.fee() > 0);
    assert_eq!(tx.outputs[0], PaymentOutput::new("addr2", 1000));
    assert_eq!(tx.outputs[1].value, 99_000 - tx.fee());
    // an explicit rate never asks the node
    assert!(rpc.fee_requests().is_empty());
}

/// Signer whose size is dominated by the input count.
struct HeavyInputSigner(MockSigner);

impl Signer for HeavyInputSigner {
    fn address(&self, key: &KeyMaterial) -> ChainResult<String> {
        self.0.address(key)
    }

    fn sign(&self, tx: &mut UnsignedTransaction, input_index: usize, key: &KeyMaterial) -> ChainResult<()> {
        self.0.sign(tx, input_index, key)
    }

    fn serialize_to_hex(&self, tx: &UnsignedTransaction) -> ChainResult<String> {
        self.0.serialize_to_hex(tx)
    }

    fn vsize(&self, tx: &UnsignedTransaction) -> ChainResult<u64> {
        Ok(1000 * tx.inputs.len() as u64)
    }
}

#[tokio::test]
async fn test_fee_that_keeps_pulling_inputs_is_rejected() {
    let rpc = MockRpc::new(100);
    let ledger = Ledger::open_in_memory("btc_test").unwrap();
    let client = UtxoClient::connect(Arc::new(rpc.clone()), ledger, RetryPolicy::none())
        .await
        .unwrap()
        .with_signer(Arc::new(HeavyInputSigner(MockSigner::new(SENDER))));
    for i in 0..10 {
        client
            .ledger()
            .add_unspent_output(&UnspentOutput::new(format!("small{}", i), 0, SENDER, 1000))
            .unwrap();
    }

    // every input costs as much in fee as it brings in
    let err = client
        .send(&test_key(), "addr2", 500, SendOptions::rate(FeeRate(1.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::CreateTransaction(ref msg) if msg.contains("did not settle")));
    assert!(rpc.broadcasts().is_empty());
    assert_eq!(client.get_balance(SENDER).unwrap(), 10_000);
}

#[tokio::test]
async fn test_estimated_fee_uses_node_rate() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(1.5);
    let client = funded_client(&rpc, &[("seed", 0, 100_000)]).await;

    client
        .send(
            &test_key(),
            "addr2",
            1000,
            SendOptions::estimate(3, EstimateMode::Conservative),
        )
        .await
        .unwrap();

    assert_eq!(rpc.fee_requests(), vec![(3, EstimateMode::Conservative)]);
    let raw = &rpc.broadcasts()[0];
    assert_eq!(decode_raw(raw).fee(), FeeRate(1.5).fee_for(vsize_of(raw)));
}

#[tokio::test]
async fn test_estimation_failure_aborts_send() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 100_000)]).await;

    let err = client
        .send(&test_key(), "addr2", 1000, client.default_send_options())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Rpc { .. }));
    assert!(rpc.broadcasts().is_empty());
    assert_eq!(client.get_balance(SENDER).unwrap(), 100_000);
}

#[tokio::test]
async fn test_broadcast_failure_leaves_inputs_unreserved() {
    let rpc = MockRpc::new(100);
    rpc.fail_broadcast(ChainError::CreateTransaction("bad-txns-inputs-missingorspent".into()));
    let client = funded_client(&rpc, &[("seed", 0, 16263)]).await;

    let err = client
        .send(&test_key(), "addr2", 1000, SendOptions::fixed(10))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ChainError::CreateTransaction("bad-txns-inputs-missingorspent".into())
    );
    assert!(rpc.broadcasts().is_empty());
    let outputs = client.ledger().list_unspent_outputs(SENDER, true).unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(!outputs[0].used);
}

#[tokio::test]
async fn test_reserved_outputs_are_not_selected_again() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("a", 0, 5000), ("b", 3, 5000)]).await;
    let key = test_key();

    client.send(&key, "addr2", 3000, SendOptions::fixed(10)).await.unwrap();
    client.send(&key, "addr3", 3000, SendOptions::fixed(10)).await.unwrap();

    let broadcasts = rpc.broadcasts();
    assert_eq!(decode_raw(&broadcasts[0]).outpoints(), vec![OutPoint::new("a", 0)]);
    assert_eq!(decode_raw(&broadcasts[1]).outpoints(), vec![OutPoint::new("b", 3)]);

    let err = client
        .send(&key, "addr4", 3000, SendOptions::fixed(10))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChainError::InsufficientFunds {
            available: 0,
            required: 3010
        }
    );
}

#[tokio::test]
async fn test_invalid_destinations_rejected_before_selection() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[("seed", 0, 5000)]).await;
    let key = test_key();

    let duplicate = vec![("addr2".to_string(), 100), ("addr2".to_string(), 200)];
    let err = client
        .send_bulk(&key, &duplicate, SendOptions::fixed(10))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::InvalidArgument(_)));

    let err = client.send_bulk(&key, &[], SendOptions::fixed(10)).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidArgument(_)));
    assert!(rpc.broadcasts().is_empty());
}

#[tokio::test]
async fn test_watch_only_client_cannot_send() {
    let rpc = MockRpc::new(100);
    let ledger = Ledger::open_in_memory("btc_test").unwrap();
    let client = UtxoClient::connect(Arc::new(rpc.clone()), ledger, RetryPolicy::none())
        .await
        .unwrap();

    let err = client
        .send(&test_key(), "addr2", 1000, SendOptions::fixed(10))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Config(_)));

    let err = client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Config(_)));
}

fn parent(outputs: &[(&str, u64)], confirmations: u64) -> RawTransaction {
    RawTransaction {
        txid: "parent".into(),
        outputs: outputs
            .iter()
            .enumerate()
            .map(|(n, (address, value))| TxOutput {
                n: n as u32,
                value: *value,
                address: Some(address.to_string()),
            })
            .collect(),
        vsize: 200,
        fee: Some(100),
        confirmations,
    }
}

#[tokio::test]
async fn test_child_pays_for_parent() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(5.0);
    rpc.add_raw_transaction(parent(
        &[("addr2", 1000), (SENDER, 50_000), (SENDER, 20_000)],
        0,
    ));
    let client = funded_client(&rpc, &[]).await;

    let txid = client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap();
    assert_eq!(txid, "sent1");
    assert_eq!(rpc.fee_requests(), vec![(2, EstimateMode::Economical)]);

    let raw = &rpc.broadcasts()[0];
    let child = decode_raw(raw);
    assert_eq!(child.outpoints(), vec![OutPoint::new("parent", 1)]);
    assert_eq!(child.outputs.len(), 1);
    assert_eq!(child.outputs[0].address, SENDER);

    // the package pays 5/vB over both transactions, minus what the parent paid
    let child_vsize = vsize_of(raw);
    let expected_fee = FeeRate(5.0).fee_for(200 + child_vsize) - 100;
    assert_eq!(child.fee(), expected_fee);
    assert_eq!(child.outputs[0].value, 50_000 - expected_fee);
}

#[tokio::test]
async fn test_child_input_not_reserved_when_parent_confirms_first() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(5.0);
    rpc.add_raw_transaction(parent(&[("addr2", 1000), (SENDER, 50_000)], 0));
    let client = funded_client(&rpc, &[]).await;

    client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap();
    let child = decode_raw(&rpc.broadcasts()[0]);

    let confirmed = block(
        101,
        vec![transaction("parent", &[], &[("addr2", 1000), (SENDER, 50_000)])],
    );
    process_block(
        client.ledger(),
        101,
        &confirmed,
        &Handlers::new(),
        &HandlerRegistry::new("new output"),
    )
    .await
    .unwrap();

    // the child still spends parent:1, but the ledger offers it
    assert_eq!(child.outpoints(), vec![OutPoint::new("parent", 1)]);
    assert_eq!(
        client.list_unspent(SENDER).unwrap(),
        vec![UnspentOutput::new("parent", 1, SENDER, 50_000)]
    );

    let confirmed = block(102, vec![mined("sent1", &child)]);
    process_block(
        client.ledger(),
        102,
        &confirmed,
        &Handlers::new(),
        &HandlerRegistry::new("new output"),
    )
    .await
    .unwrap();
    assert_eq!(
        client.list_unspent(SENDER).unwrap(),
        vec![UnspentOutput::new("sent1", 0, SENDER, child.outputs[0].value)]
    );
}

#[tokio::test]
async fn test_child_fee_bump_rejects_confirmed_parent() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(5.0);
    rpc.add_raw_transaction(parent(&[(SENDER, 50_000)], 1));
    let client = funded_client(&rpc, &[]).await;

    let err = client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::InvalidArgument(_)));
    assert!(rpc.broadcasts().is_empty());
}

#[tokio::test]
async fn test_child_fee_bump_needs_an_output_to_the_sender() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(5.0);
    rpc.add_raw_transaction(parent(&[("addr2", 50_000), ("addr3", 1000)], 0));
    let client = funded_client(&rpc, &[]).await;

    let err = client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::NotImplemented(_)));
    assert!(rpc.broadcasts().is_empty());
}

#[tokio::test]
async fn test_child_fee_bump_refuses_dust_output() {
    let rpc = MockRpc::new(100);
    rpc.set_fee_rate(5.0);
    rpc.add_raw_transaction(parent(&[(SENDER, 1000)], 0));
    let client = funded_client(&rpc, &[]).await;

    let err = client
        .speed_up_by_self_child_payment(&test_key(), "parent", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::InsufficientFunds { available: 1000, .. }));
    assert!(rpc.broadcasts().is_empty());
}

#[tokio::test]
async fn test_child_fee_bump_unknown_parent() {
    let rpc = MockRpc::new(100);
    let client = funded_client(&rpc, &[]).await;

    let err = client
        .speed_up_by_self_child_payment(&test_key(), "missing", 2)
        .await
        .unwrap_err();
    assert_eq!(err, ChainError::TransactionNotFound("missing".into()));
}
