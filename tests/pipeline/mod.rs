mod multicall_engine;
mod reorg_flow;
mod sync_flow;
