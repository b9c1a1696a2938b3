//! End-to-end exchange through the client against an in-process node.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokenbank_client::{ClientConfig, LedgerClient, LedgerClientBuilder, ReserveDelta, Transport};
use tokenbank_common::{Address, LedgerError, Price, Reserve, TransportFailure, Units};
use tokenbank_ledger::Ledger;
use tokenbank_node::{Fault, LocalNode, NodeConfig};
use tokenbank_protocol::OperationRequest;

const ALICE: &str = "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826";
const BOB: &str = "0xdedb49385ad5b94a16f236a6890cf9e0b1e30392";
const FUNDING: u128 = 1_000_000_000;

fn alice() -> Address {
    ALICE.parse().unwrap()
}

fn bob() -> Address {
    BOB.parse().unwrap()
}

async fn start_node() -> Arc<LocalNode> {
    LocalNode::start(
        NodeConfig::default(),
        vec![(alice(), Reserve::new(FUNDING)), (bob(), Reserve::new(FUNDING))],
    )
    .await
    .unwrap()
}

fn client_for(node: &Arc<LocalNode>, account: Address, timeout: Duration) -> LedgerClient {
    LedgerClientBuilder::new()
        .account(account)
        .config(ClientConfig {
            finalization_timeout: timeout,
        })
        .transport(node.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_buy_send_withdraw() {
    let node = start_node().await;
    let alice_client = client_for(&node, alice(), Duration::from_secs(60));
    let bob_client = client_for(&node, bob(), Duration::from_secs(60));

    // Alice buys with a non-multiple of the price.
    assert_eq!(alice_client.balance_of(alice()).await.unwrap(), Units::ZERO);
    let before = alice_client.reserve_balance().await.unwrap();
    let value = Reserve::new(100_111);
    let receipt = alice_client.purchase(value).await.unwrap();

    assert!(receipt.is_committed());
    assert_eq!(receipt.units_purchased(), Some(Units::new(100)));
    let delta = ReserveDelta::from_receipt(&receipt, value);
    let after = alice_client.reserve_balance().await.unwrap();
    assert_eq!(delta.apply_to(before), Some(after));
    // token value + fee + retained remainder
    assert_eq!(
        before.value() - after.value(),
        100_000 + receipt.fee_consumed.value() + 111
    );
    assert_eq!(delta.spent_beyond_token_value(), Some(Reserve::new(45_000 + 111)));

    // Bob buys 50 and sends 25 to Alice.
    let receipt = bob_client.purchase(Reserve::new(50_000)).await.unwrap();
    assert_eq!(receipt.units_purchased(), Some(Units::new(50)));
    let receipt = bob_client.transfer(alice(), Units::new(25)).await.unwrap();
    assert!(receipt.is_committed());

    assert_eq!(bob_client.balance_of(bob()).await.unwrap(), Units::new(25));
    assert_eq!(bob_client.balance_of(alice()).await.unwrap(), Units::new(125));

    // Alice withdraws 100 at exactly the price.
    let before = alice_client.reserve_balance().await.unwrap();
    let receipt = alice_client.withdraw(Units::new(100)).await.unwrap();
    let after = alice_client.reserve_balance().await.unwrap();

    assert_eq!(receipt.reserve_paid_out(), Reserve::new(100_000));
    assert_eq!(
        after.value(),
        before.value() + 100_000 - receipt.fee_consumed.value()
    );
    assert_eq!(alice_client.balance_of(alice()).await.unwrap(), Units::new(25));

    let snapshot = node.ledger_snapshot();
    assert_eq!(snapshot.total_supply, Units::new(50));
    assert_eq!(snapshot.backing, Reserve::new(50_000));
    assert_eq!(snapshot.retained, Reserve::new(111));
    assert_eq!(snapshot.last_sequence, 4);
    node.verify_integrity().unwrap();

    let metrics = node.metrics();
    assert_eq!(metrics.purchases, 2);
    assert_eq!(metrics.transfers, 1);
    assert_eq!(metrics.withdrawals, 1);
    assert_eq!(metrics.rejected, 0);
}

#[tokio::test]
async fn test_overdraft_rejected_with_fee() {
    let node = start_node().await;
    let bob_client = client_for(&node, bob(), Duration::from_secs(60));

    bob_client.purchase(Reserve::new(10_000)).await.unwrap();
    let before = node.ledger_snapshot();

    let receipt = bob_client.transfer(alice(), Units::new(11)).await.unwrap();
    assert!(!receipt.is_committed());
    assert_eq!(receipt.fee_consumed, Reserve::new(30_000));

    let receipt = bob_client.withdraw(Units::new(11)).await.unwrap();
    assert!(!receipt.is_committed());

    assert_eq!(node.ledger_snapshot(), before);
    assert_eq!(node.metrics().rejected, 2);
    node.verify_integrity().unwrap();
}

#[tokio::test]
async fn test_timeout_then_requery() {
    let node = start_node().await;
    let client = client_for(&node, alice(), Duration::from_millis(50));

    node.inject_fault(Fault::WithholdReceipts);
    let request = OperationRequest::purchase(alice(), Reserve::new(3_000));
    let operation_id = request.operation_id;
    let handle = node.submit(request).await.unwrap();

    let err = client.withdraw(Units::new(1)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Transport(TransportFailure::Timeout { .. })
    ));

    // The purchase committed even though nobody saw it finalize.
    let receipt = client.query_receipt(&operation_id).await.unwrap().unwrap();
    assert!(receipt.is_committed());
    assert_eq!(handle.operation_id, receipt.operation_id);

    node.clear_faults();
    node.verify_integrity().unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_are_totally_ordered() {
    let node = start_node().await;

    let mut tasks = Vec::new();
    for account in [alice(), bob()] {
        let client = client_for(&node, account, Duration::from_secs(60));
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                client.purchase(Reserve::new(1_500)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = node.ledger_snapshot();
    assert_eq!(snapshot.total_supply, Units::new(40));
    assert_eq!(snapshot.retained, Reserve::new(40 * 500));
    assert_eq!(snapshot.last_sequence, 40);
    node.verify_integrity().unwrap();

    let restored = Ledger::restore(Price::new(1000).unwrap(), node.journal_entries()).unwrap();
    assert_eq!(restored.snapshot(), snapshot);
}

#[derive(Debug, Clone)]
enum Step {
    Purchase(bool, u128),
    Transfer(bool, u128),
    Withdraw(bool, u128),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<bool>(), 0u128..200_000).prop_map(|(a, r)| Step::Purchase(a, r)),
        (any::<bool>(), 0u128..300).prop_map(|(a, u)| Step::Transfer(a, u)),
        (any::<bool>(), 0u128..300).prop_map(|(a, u)| Step::Withdraw(a, u)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_system_reserve_conserved(steps in prop::collection::vec(step_strategy(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let node = start_node().await;
            let pick = |first: bool| if first { (alice(), bob()) } else { (bob(), alice()) };

            for step in steps {
                let request = match step {
                    Step::Purchase(a, r) => OperationRequest::purchase(pick(a).0, Reserve::new(r)),
                    Step::Transfer(a, u) => {
                        let (from, to) = pick(a);
                        OperationRequest::transfer(from, to, Units::new(u))
                    }
                    Step::Withdraw(a, u) => OperationRequest::withdraw(pick(a).0, Units::new(u)),
                };
                let handle = node.submit(request).await.unwrap();
                node.await_finalization(&handle).await.unwrap();
                node.verify_integrity().unwrap();
            }

            node.shutdown().await.unwrap();
        });
    }
}
