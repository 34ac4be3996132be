//! Fitness contract for an external hyperparameter search.
//!
//! The search driver proposes an [`AppConfig`], calls [`evaluate`] and
//! maximizes the returned score. Invalid or failing trials score
//! [`FAILED_TRIAL_SCORE`] instead of erroring so the search can continue.

use tracing::debug;

use common::{AppConfig, CandleSeries, RunContext};

use crate::backtest::BacktestEngine;
use crate::metrics::Metrics;

pub const FAILED_TRIAL_SCORE: f64 = -9999.0;

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub fitness: f64,
    /// `None` when the trial failed.
    pub metrics: Option<Metrics>,
}

/// `return % − drawdown_penalty × max drawdown %` of a quiet backtest.
pub fn evaluate(config: &AppConfig, series: &CandleSeries) -> f64 {
    evaluate_trial(config, series).fitness
}

pub fn evaluate_trial(config: &AppConfig, series: &CandleSeries) -> Trial {
    let failed = Trial { fitness: FAILED_TRIAL_SCORE, metrics: None };

    if let Err(e) = config.validate() {
        debug!(error = %e, "Trial rejected: invalid parameters");
        return failed;
    }
    let ctx = RunContext::new(config.clone());
    let report = match BacktestEngine::new(&ctx).quiet().run(series) {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "Trial failed");
            return failed;
        }
    };

    let m = report.metrics;
    let fitness = m.return_pct - config.optimization.drawdown_penalty * m.max_drawdown_pct;
    if !fitness.is_finite() {
        debug!("Trial produced a non-finite score");
        return failed;
    }
    debug!(fitness, return_pct = m.return_pct, max_drawdown_pct = m.max_drawdown_pct, "Trial scored");
    Trial { fitness, metrics: Some(m) }
}
