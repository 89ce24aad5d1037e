use crate::support::helpers::{harness, wait_until};
use crate::support::mock_rpc::{MockEvmServer, MockTransfer};
use alloy_primitives::{Address, U256};
use chainflow::exceptions::ExceptionRecorder;
use chainflow::multicall::MulticallSettings;
use chainflow::pipeline::BatchContext;
use chainflow::records::{Record, RecordKind};
use chainflow::runtime::Telemetry;
use chainflow::sync::{ControllerSettings, CursorStore, MemoryCursorStore, SyncController};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MULTICALL: Address = Address::repeat_byte(0xca);
const TOKEN: Address = Address::repeat_byte(0x77);
const ALICE: Address = Address::repeat_byte(0x01);
const BOB: Address = Address::repeat_byte(0x02);

fn settings() -> MulticallSettings {
    MulticallSettings {
        contract_address: MULTICALL,
        deploy_block: 0,
        enabled: true,
        max_chunk_bytes: 250 * 1024,
    }
}

fn transfer(block: u64, index: u64, from: Address, to: Address, value: u64) -> MockTransfer {
    MockTransfer {
        block_number: block,
        log_index: index,
        token: TOKEN,
        from,
        to,
        value: U256::from(value),
    }
}

fn seed_chain(server: &MockEvmServer) {
    server.add_transfer(transfer(2, 0, ALICE, BOB, 100));
    server.add_transfer(transfer(3, 0, BOB, ALICE, 40));
    server.set_balance(TOKEN, ALICE, U256::from(940u64));
    server.set_balance(TOKEN, BOB, U256::from(60u64));
}

#[tokio::test]
async fn full_pipeline_derives_every_requested_kind() {
    let server = MockEvmServer::start(5, MULTICALL, 0).await;
    seed_chain(&server);

    let wiring = harness(&server.url(), settings(), RecordKind::ALL.to_vec());
    let summary = wiring
        .dispatcher
        .run(BatchContext::new(1, 5))
        .await
        .unwrap();

    assert_eq!(wiring.store.rows_of_kind(RecordKind::Blocks).len(), 5);
    assert_eq!(wiring.store.rows_of_kind(RecordKind::Transactions).len(), 5);
    assert_eq!(wiring.store.rows_of_kind(RecordKind::Logs).len(), 2);
    assert_eq!(
        wiring.store.rows_of_kind(RecordKind::TokenTransfers).len(),
        2
    );

    let balances = wiring.store.rows_of_kind(RecordKind::TokenBalances);
    assert_eq!(balances.len(), 2);
    for record in &balances {
        match record {
            Record::TokenBalance(row) => {
                assert_eq!(row.block_number, 5);
                let expected = if row.holder == ALICE { 940u64 } else { 60 };
                assert_eq!(row.balance, U256::from(expected));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    let (number, hash) = summary.last_block_hash.unwrap();
    assert_eq!(number, 5);
    server.with_state(|state| assert_eq!(hash, state.block_hash(5)));
}

/// Re-running a range without advancing the cursor must leave the same live
/// rows as running it once. This is what makes the at-least-once controller
/// safe across a crash between export and cursor advance.
#[tokio::test]
async fn rerunning_a_range_is_idempotent() {
    let server = MockEvmServer::start(5, MULTICALL, 0).await;
    seed_chain(&server);

    let wiring = harness(&server.url(), settings(), RecordKind::ALL.to_vec());
    wiring
        .dispatcher
        .run(BatchContext::new(1, 5))
        .await
        .unwrap();
    let first_pass: Vec<Vec<Record>> = RecordKind::ALL
        .iter()
        .map(|&kind| wiring.store.rows_of_kind(kind))
        .collect();

    wiring
        .dispatcher
        .run(BatchContext::new(1, 5))
        .await
        .unwrap();
    let second_pass: Vec<Vec<Record>> = RecordKind::ALL
        .iter()
        .map(|&kind| wiring.store.rows_of_kind(kind))
        .collect();

    assert_eq!(first_pass, second_pass);
    for rows in &second_pass {
        assert!(rows.iter().all(|record| !record.reorg()));
    }
}

/// Requesting only a leaf kind runs exactly its dependency closure.
#[tokio::test]
async fn leaf_request_plans_minimal_closure() {
    let server = MockEvmServer::start(5, MULTICALL, 0).await;
    seed_chain(&server);

    let wiring = harness(&server.url(), settings(), vec![RecordKind::TokenTransfers]);
    assert_eq!(
        wiring.dispatcher.planned_jobs(),
        vec!["logs", "token_transfers"]
    );

    wiring
        .dispatcher
        .run(BatchContext::new(1, 5))
        .await
        .unwrap();
    assert_eq!(
        wiring.store.rows_of_kind(RecordKind::TokenTransfers).len(),
        2
    );
    assert!(wiring.store.rows_of_kind(RecordKind::Blocks).is_empty());
}

#[tokio::test]
async fn controller_syncs_to_head_and_advances_cursor() {
    let server = MockEvmServer::start(6, MULTICALL, 0).await;
    seed_chain(&server);

    let wiring = harness(&server.url(), settings(), RecordKind::ALL.to_vec());
    let cursor_store = Arc::new(MemoryCursorStore::default());
    let shutdown = CancellationToken::new();

    let controller = Arc::new(SyncController::new(
        wiring.client.clone(),
        wiring.dispatcher.clone(),
        wiring.store.clone(),
        cursor_store.clone(),
        ExceptionRecorder::new(wiring.sink.clone()),
        Arc::new(Telemetry::default()),
        ControllerSettings {
            start_block: 1,
            block_batch_size: 3,
            poll_interval: Duration::from_millis(20),
            reorg_check: true,
            reorg_window: 6,
        },
        shutdown.clone(),
    ));

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let store = cursor_store.clone();
    wait_until(Duration::from_secs(5), move || {
        let store = store.clone();
        async move {
            matches!(store.read().await.unwrap(), Some(cursor) if cursor.block_number == 6)
        }
    })
    .await;

    shutdown.cancel();
    run.await.unwrap().unwrap();

    let cursor = cursor_store.read().await.unwrap().unwrap();
    server.with_state(|state| assert_eq!(cursor.block_hash, state.block_hash(6)));
    assert_eq!(wiring.store.rows_of_kind(RecordKind::Blocks).len(), 6);
}
