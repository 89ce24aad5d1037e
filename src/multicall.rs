//! Aggregated `eth_call` resolution through Multicall3, with a direct
//! batched-call pass for anything aggregation cannot answer.

pub mod call;
pub mod chunk;
pub mod engine;

pub use call::{Call, CallOutput, CallReturn};
pub use engine::{MulticallEngine, MulticallSettings, MULTICALL3_ADDRESS};
