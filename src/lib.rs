//! Reorg-aware EVM chain synchronization engine.
//!
//! A dependency-ordered pipeline of jobs turns raw RPC data into typed
//! records: block bodies, logs, decoded ERC-20 transfers, and multicall-read
//! token balances. The sync controller drives the pipeline batch by batch,
//! persists a cursor only after each batch is durably exported, and detects
//! and repairs chain reorganizations without corrupting stored history.

pub mod buffer;
pub mod exceptions;
pub mod executor;
pub mod multicall;
pub mod pipeline;
pub mod records;
pub mod rpc;
pub mod runtime;
pub mod storage;
pub mod sync;

pub use buffer::SyncBuffer;
pub use exceptions::{ExceptionRecord, ExceptionRecorder, ExceptionSink, Severity};
pub use executor::BatchExecutor;
pub use multicall::{Call, CallOutput, CallReturn, MulticallEngine, MulticallSettings};
pub use pipeline::{BatchContext, BatchSummary, Dispatcher, Job};
pub use records::{Record, RecordKind, UpsertPolicy};
pub use rpc::{EvmRpcClient, RpcClientOptions, RpcError};
pub use runtime::{Runner, SyncConfig};
pub use storage::{MemoryStore, RecordStore};
pub use sync::{Cursor, CursorStore, SyncController};
