pub mod blocks;
pub mod logs;
pub mod token_balances;
pub mod token_transfers;

pub use blocks::BlocksJob;
pub use logs::LogsJob;
pub use token_balances::TokenBalancesJob;
pub use token_transfers::{TokenTransfersJob, TRANSFER_TOPIC};
