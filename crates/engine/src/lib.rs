//! Shared decision cycle, backtest replay, metrics, run artifacts and the
//! optimizer fitness contract.

pub mod backtest;
pub mod cycle;
pub mod metrics;
pub mod optimize;
pub mod report;

pub use backtest::{BacktestEngine, BacktestReport};
pub use cycle::{decide, CycleOutcome, INSUFFICIENT_BALANCE};
pub use metrics::Metrics;
pub use optimize::{evaluate, evaluate_trial, Trial, FAILED_TRIAL_SCORE};
pub use report::{prune_runs, write_run};
