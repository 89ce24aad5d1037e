use crate::support::helpers::{harness, wait_until};
use crate::support::mock_rpc::{MockEvmServer, MockTransfer};
use alloy_primitives::{Address, U256};
use chainflow::exceptions::ExceptionRecorder;
use chainflow::multicall::MulticallSettings;
use chainflow::records::{Record, RecordKind};
use chainflow::runtime::Telemetry;
use chainflow::sync::{ControllerSettings, CursorStore, MemoryCursorStore, SyncController};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MULTICALL: Address = Address::repeat_byte(0xca);
const TOKEN: Address = Address::repeat_byte(0x77);
const ALICE: Address = Address::repeat_byte(0x01);
const BOB: Address = Address::repeat_byte(0x02);

fn transfer(block: u64, index: u64, value: u64) -> MockTransfer {
    MockTransfer {
        block_number: block,
        log_index: index,
        token: TOKEN,
        from: ALICE,
        to: BOB,
        value: U256::from(value),
    }
}

/// Syncs to the head, then swaps out the chain's suffix. The controller
/// must detect the mismatch, find the fork point, and leave the store
/// holding exactly the canonical chain with no reorg-flagged rows and at
/// most one live row per natural key.
#[tokio::test]
async fn reorg_is_detected_and_repaired() {
    let server = MockEvmServer::start(8, MULTICALL, 0).await;
    server.add_transfer(transfer(6, 0, 100));
    server.set_balance(TOKEN, ALICE, U256::from(900u64));
    server.set_balance(TOKEN, BOB, U256::from(100u64));

    let wiring = harness(&server.url(), MulticallSettings {
        contract_address: MULTICALL,
        deploy_block: 0,
        enabled: true,
        max_chunk_bytes: 250 * 1024,
    }, RecordKind::ALL.to_vec());

    let cursor_store = Arc::new(MemoryCursorStore::default());
    let telemetry = Arc::new(Telemetry::default());
    let shutdown = CancellationToken::new();

    let controller = Arc::new(SyncController::new(
        wiring.client.clone(),
        wiring.dispatcher.clone(),
        wiring.store.clone(),
        cursor_store.clone(),
        ExceptionRecorder::new(wiring.sink.clone()),
        telemetry.clone(),
        ControllerSettings {
            start_block: 1,
            block_batch_size: 8,
            poll_interval: Duration::from_millis(20),
            reorg_check: true,
            reorg_window: 8,
        },
        shutdown.clone(),
    ));

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    // Phase 1: catch up with the original chain.
    let cursors = cursor_store.clone();
    wait_until(Duration::from_secs(5), move || {
        let cursors = cursors.clone();
        async move {
            matches!(cursors.read().await.unwrap(), Some(cursor) if cursor.block_number == 8)
        }
    })
    .await;
    assert_eq!(
        wiring.store.rows_of_kind(RecordKind::TokenTransfers).len(),
        1
    );

    // Phase 2: the chain abandons blocks 6..=8. The fork drops the old
    // transfer and carries a different one at block 7.
    let new_tip = server.with_state(|state| {
        state.force_reorg(6);
        state.drop_transfers_at(6);
        state.transfers.push(transfer(7, 0, 55));
        state.block_hash(8)
    });

    let telemetry_probe = telemetry.clone();
    let cursors = cursor_store.clone();
    wait_until(Duration::from_secs(5), move || {
        let telemetry = telemetry_probe.clone();
        let cursors = cursors.clone();
        async move {
            telemetry.reorgs_handled() >= 1
                && matches!(
                    cursors.read().await.unwrap(),
                    Some(cursor) if cursor.block_hash == new_tip
                )
        }
    })
    .await;

    shutdown.cancel();
    run.await.unwrap().unwrap();

    // Canonical blocks only, none flagged.
    let blocks = wiring.store.rows_of_kind(RecordKind::Blocks);
    assert_eq!(blocks.len(), 8);
    server.with_state(|state| {
        for record in &blocks {
            match record {
                Record::Block(block) => {
                    assert!(!block.reorg);
                    assert_eq!(block.hash, state.block_hash(block.number));
                }
                other => panic!("unexpected record {other:?}"),
            }
        }
    });

    // The abandoned fork's transfer was swept; the canonical one survived.
    let transfers = wiring.store.rows_of_kind(RecordKind::TokenTransfers);
    assert_eq!(transfers.len(), 1);
    match &transfers[0] {
        Record::TokenTransfer(row) => {
            assert_eq!(row.block_number, 7);
            assert_eq!(row.value, U256::from(55u64));
            assert!(!row.reorg);
        }
        other => panic!("unexpected record {other:?}"),
    }

    // At most one live row per natural key, across every kind.
    for kind in RecordKind::ALL {
        let rows = wiring.store.rows_of_kind(kind);
        let mut keys = HashSet::new();
        for record in &rows {
            assert!(!record.reorg());
            assert!(
                keys.insert(record.natural_key()),
                "duplicate live row for key {}",
                record.natural_key()
            );
        }
    }
}
