//! Wire types for the EVM JSON-RPC methods the engine issues. Quantities are
//! hex-encoded on the wire; `alloy_primitives::U64` handles the decoding.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    #[serde(default)]
    pub gas_used: U64,
    #[serde(default)]
    pub transactions: BlockTransactions,
}

/// `eth_getBlockByNumber` returns either full transaction objects or bare
/// hashes depending on the boolean flag sent with the request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Full(Vec<RpcTransaction>),
    Hashes(Vec<B256>),
}

impl Default for BlockTransactions {
    fn default() -> Self {
        BlockTransactions::Hashes(Vec::new())
    }
}

impl BlockTransactions {
    pub fn as_full(&self) -> &[RpcTransaction] {
        match self {
            BlockTransactions::Full(txs) => txs,
            BlockTransactions::Hashes(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BlockTransactions::Full(txs) => txs.len(),
            BlockTransactions::Hashes(hashes) => hashes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(default)]
    pub transaction_index: Option<U64>,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: U64,
    pub transaction_hash: B256,
    pub log_index: U64,
}

/// Filter object for `eth_getLogs`, restricted to the block-range form the
/// pipeline uses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub from_block: String,
    pub to_block: String,
}

impl LogFilter {
    pub fn for_range(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block: block_tag(from_block),
            to_block: block_tag(to_block),
        }
    }
}

/// `eth_call` request object (block tag is passed as a separate parameter).
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
}

/// Hex quantity block tag, e.g. `0x10d4f` for block 68943.
pub fn block_tag(number: u64) -> String {
    format!("0x{number:x}")
}
