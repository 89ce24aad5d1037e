use crate::buffer::SyncBuffer;
use crate::exceptions::{ExceptionRecord, ExceptionRecorder, Severity};
use crate::pipeline::job::{BatchContext, Job};
use crate::records::{LogRecord, RecordKind, TokenTransferRecord};
use alloy_primitives::{b256, Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Decodes ERC-20 `Transfer` events out of the collected logs. Pure
/// derivation: reads the log slice, performs no I/O.
pub struct TokenTransfersJob {
    exceptions: Arc<ExceptionRecorder>,
}

impl TokenTransfersJob {
    pub fn new(exceptions: Arc<ExceptionRecorder>) -> Self {
        Self { exceptions }
    }
}

enum Decoded {
    Transfer(TokenTransferRecord),
    /// Transfer-shaped topic with a malformed body.
    Malformed(&'static str),
    /// Not an ERC-20 transfer at all (different event, or an ERC-721
    /// transfer carrying the token id as a fourth topic).
    NotATransfer,
}

fn decode_transfer(log: &LogRecord) -> Decoded {
    if log.topics.first() != Some(&TRANSFER_TOPIC) || log.topics.len() != 3 {
        return Decoded::NotATransfer;
    }
    if log.data.len() != 32 {
        return Decoded::Malformed("transfer value is not a single 32-byte word");
    }

    let from = Address::from_word(log.topics[1]);
    let to = Address::from_word(log.topics[2]);
    Decoded::Transfer(TokenTransferRecord {
        block_number: log.block_number,
        log_index: log.log_index,
        token: log.address,
        from,
        to,
        value: U256::from_be_slice(&log.data),
        reorg: false,
    })
}

#[async_trait]
impl Job for TokenTransfersJob {
    fn name(&self) -> &'static str {
        "token_transfers"
    }

    fn dependencies(&self) -> &'static [RecordKind] {
        &[RecordKind::Logs]
    }

    fn outputs(&self) -> &'static [RecordKind] {
        &[RecordKind::TokenTransfers]
    }

    async fn collect(&self, _ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        let mut transfers = Vec::new();
        for log in buffer.logs() {
            match decode_transfer(log) {
                Decoded::Transfer(record) => transfers.push(record),
                Decoded::NotATransfer => {}
                Decoded::Malformed(reason) => self.exceptions.log(ExceptionRecord {
                    block_number: log.block_number,
                    record_kind: Some(RecordKind::TokenTransfers),
                    message_type: "transfer_decode_failure",
                    message: reason.to_string(),
                    context: format!(
                        "token={} log_index={} data_len={}",
                        log.address,
                        log.log_index,
                        log.data.len()
                    ),
                    severity: Severity::Warning,
                }),
            }
        }
        buffer.token_transfers_mut().extend(transfers);
        Ok(())
    }

    fn process(&self, _ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        buffer
            .token_transfers_mut()
            .sort_by_key(|transfer| (transfer.block_number, transfer.log_index));
        Ok(())
    }
}
