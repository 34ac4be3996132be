//! Indicator computation and entry/exit signal rules.

pub mod engine;
pub mod evaluator;
pub mod indicators;

pub use engine::{IndicatorEngine, IndicatorSeries, IndicatorState};
pub use evaluator::{EntryEvaluation, ExitEvaluation, SignalEvaluator, INSUFFICIENT_HISTORY};
