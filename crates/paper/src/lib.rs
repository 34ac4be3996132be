//! Live paper trading: the evaluation loop, its durable ledger, the candle
//! feed it polls and the dry-run broker checks.

pub mod commands;
pub mod feed;
pub mod store;
pub mod trader;
pub mod validator;

pub use commands::{forward_commands, quit_on, spawn_ctrl_c_listener, spawn_stdin_listener};
pub use feed::{CandleFeed, CsvFeed, MemoryFeed};
pub use store::{Recovered, StoredEvaluation, StoredFill, TradeStore};
pub use trader::PaperTrader;
pub use validator::DryRunValidator;
