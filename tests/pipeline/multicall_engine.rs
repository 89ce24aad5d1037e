use crate::support::helpers::harness;
use crate::support::mock_rpc::MockEvmServer;
use alloy_primitives::{Address, U256};
use chainflow::multicall::{Call, CallOutput, CallReturn, MulticallSettings};
use chainflow::records::RecordKind;

const MULTICALL: Address = Address::repeat_byte(0xca);

fn token(index: usize) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x80;
    bytes[18..].copy_from_slice(&(index as u16).to_be_bytes());
    Address::from(bytes)
}

fn holder(index: usize) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x10;
    bytes[18..].copy_from_slice(&(index as u16).to_be_bytes());
    Address::from(bytes)
}

fn settings(deploy_block: u64, enabled: bool) -> MulticallSettings {
    MulticallSettings {
        contract_address: MULTICALL,
        deploy_block,
        enabled,
        max_chunk_bytes: 250 * 1024,
    }
}

/// 120 calls across 3 blocks, one block below the aggregation contract's
/// deployment: that block's calls go straight to fallback, the other two
/// blocks aggregate, and every call ends up resolved.
#[tokio::test]
async fn pre_deployment_blocks_bypass_aggregation() {
    let server = MockEvmServer::start(30, MULTICALL, 15).await;
    let wiring = harness(&server.url(), settings(15, true), RecordKind::ALL.to_vec());

    let mut calls = Vec::new();
    for (slot, &block) in [10u64, 20, 30].iter().enumerate() {
        for index in 0..40usize {
            let position = slot * 40 + index;
            server.set_balance(token(position), holder(position), U256::from(position as u64 + 1));
            calls.push(Call::erc20_balance_of(
                token(position),
                holder(position),
                block,
            ));
        }
    }

    wiring.engine.execute_calls(&mut calls).await.unwrap();

    for (position, call) in calls.iter().enumerate() {
        assert_eq!(
            call.returns(),
            Some(&CallReturn::Uint256(U256::from(position as u64 + 1))),
            "call {position} should be resolved"
        );
    }

    // One aggregate request per post-deployment block, one fallback pass for
    // the 40 pre-deployment calls.
    server.with_state(|state| {
        assert_eq!(state.aggregate_requests, 2);
        assert_eq!(state.direct_call_requests, 40);
    });
}

/// The aggregation path and the forced-fallback path must decode to the
/// same values.
#[tokio::test]
async fn fallback_matches_aggregation() {
    let server = MockEvmServer::start(30, MULTICALL, 0).await;
    for index in 0..25usize {
        server.set_balance(token(index), holder(index), U256::from(1_000 + index as u64));
    }

    let make_calls = || -> Vec<Call> {
        (0..25usize)
            .map(|index| Call::erc20_balance_of(token(index), holder(index), 30))
            .collect()
    };

    let aggregated = harness(&server.url(), settings(0, true), RecordKind::ALL.to_vec());
    let mut via_aggregation = make_calls();
    aggregated
        .engine
        .execute_calls(&mut via_aggregation)
        .await
        .unwrap();

    let disabled = harness(&server.url(), settings(0, false), RecordKind::ALL.to_vec());
    let mut via_fallback = make_calls();
    disabled
        .engine
        .execute_calls(&mut via_fallback)
        .await
        .unwrap();

    for (a, b) in via_aggregation.iter().zip(&via_fallback) {
        assert!(a.is_resolved());
        assert_eq!(a.returns(), b.returns());
    }
}

/// Returndata that does not decode against the declared shape leaves the
/// call unresolved and records an exception; it never fails the batch.
#[tokio::test]
async fn undecodable_returndata_is_recorded_not_fatal() {
    let server = MockEvmServer::start(30, MULTICALL, 0).await;
    // A balance of 5 is valid uint256 returndata but not a valid string
    // encoding (the head word is an out-of-range offset).
    server.set_balance(token(0), holder(0), U256::from(5u64));
    server.set_balance(token(1), holder(1), U256::from(7u64));

    let wiring = harness(&server.url(), settings(0, true), RecordKind::ALL.to_vec());

    let mut calls = vec![
        Call::new(
            token(0),
            Call::erc20_balance_of(token(0), holder(0), 30).data,
            30,
            CallOutput::Utf8String,
        ),
        Call::erc20_balance_of(token(1), holder(1), 30),
    ];
    wiring.engine.execute_calls(&mut calls).await.unwrap();

    assert!(!calls[0].is_resolved(), "undecodable call stays unset");
    assert_eq!(calls[1].returns(), Some(&CallReturn::Uint256(U256::from(7u64))));
    assert!(wiring.exceptions.queued() >= 1);
}

/// Small chunk budgets split one block's calls into several aggregate
/// requests without losing or duplicating any call.
#[tokio::test]
async fn tight_chunk_budget_splits_aggregate_requests() {
    let server = MockEvmServer::start(30, MULTICALL, 0).await;
    for index in 0..30usize {
        server.set_balance(token(index), holder(index), U256::from(index as u64 + 1));
    }

    let mut tight = settings(0, true);
    // Each balanceOf call estimates to a few hundred bytes, so this forces
    // several chunks for 30 calls.
    tight.max_chunk_bytes = 1_000;
    let wiring = harness(&server.url(), tight, RecordKind::ALL.to_vec());

    let mut calls: Vec<Call> = (0..30usize)
        .map(|index| Call::erc20_balance_of(token(index), holder(index), 30))
        .collect();
    wiring.engine.execute_calls(&mut calls).await.unwrap();

    for (index, call) in calls.iter().enumerate() {
        assert_eq!(
            call.returns(),
            Some(&CallReturn::Uint256(U256::from(index as u64 + 1)))
        );
    }
    server.with_state(|state| {
        assert!(state.aggregate_requests > 1, "budget should force a split");
        assert_eq!(state.direct_call_requests, 0);
    });
}
