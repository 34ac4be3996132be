pub mod candles;
pub mod config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod types;

pub use candles::CandleSeries;
pub use config::{
    AppConfig, DataConfig, EnvConfig, GeneralConfig, Interval, MaKind, OptimizationConfig,
    PaperConfig, RunMode, StoreConfig, StrategyConfig,
};
pub use context::RunContext;
pub use error::{Error, Result};
pub use exchange::{AcceptAll, OrderValidator};
pub use types::*;
