//! JSON-RPC client plumbing: batching, metrics, timeout handling, and the
//! wire types for the EVM methods the pipeline issues.

pub mod client;
pub mod metrics;
pub mod options;
pub mod types;

pub use client::{EvmRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use types::{block_tag, BlockTransactions, CallRequest, LogFilter, RpcBlock, RpcLog, RpcTransaction};
