use crate::buffer::SyncBuffer;
use crate::multicall::{Call, MulticallEngine};
use crate::pipeline::job::{BatchContext, Job};
use crate::records::{RecordKind, TokenBalanceRecord};
use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Reads balances for every `(token, holder)` pair touched by the batch's
/// transfers, pinned at the batch's last block, through the multicall
/// engine.
pub struct TokenBalancesJob {
    engine: Arc<MulticallEngine>,
}

impl TokenBalancesJob {
    pub fn new(engine: Arc<MulticallEngine>) -> Self {
        Self { engine }
    }
}

/// Ordered for deterministic call planning. The zero address appears as the
/// counterparty of mints and burns and holds no balance worth reading.
fn touched_pairs(buffer: &SyncBuffer) -> BTreeSet<(Address, Address)> {
    let mut pairs = BTreeSet::new();
    for transfer in buffer.token_transfers() {
        if transfer.from != Address::ZERO {
            pairs.insert((transfer.token, transfer.from));
        }
        if transfer.to != Address::ZERO {
            pairs.insert((transfer.token, transfer.to));
        }
    }
    pairs
}

#[async_trait]
impl Job for TokenBalancesJob {
    fn name(&self) -> &'static str {
        "token_balances"
    }

    fn dependencies(&self) -> &'static [RecordKind] {
        &[RecordKind::TokenTransfers]
    }

    fn outputs(&self) -> &'static [RecordKind] {
        &[RecordKind::TokenBalances]
    }

    async fn collect(&self, ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        let pairs = touched_pairs(buffer);
        if pairs.is_empty() {
            return Ok(());
        }

        let mut calls: Vec<Call> = pairs
            .iter()
            .map(|&(token, holder)| Call::erc20_balance_of(token, holder, ctx.last_block))
            .collect();
        self.engine.execute_calls(&mut calls).await?;

        // An unresolved call means "unknown", not "zero": the engine already
        // recorded the exception, so just skip the row.
        let balances = buffer.token_balances_mut();
        for (&(token, holder), call) in pairs.iter().zip(&calls) {
            let Some(balance) = call.returns().and_then(|value| value.as_uint256()) else {
                continue;
            };
            balances.push(TokenBalanceRecord {
                block_number: ctx.last_block,
                token,
                holder,
                balance,
                reorg: false,
            });
        }
        Ok(())
    }
}
