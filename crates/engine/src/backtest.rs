use serde::Serialize;
use tracing::{debug, info};

use common::{Action, CandleSeries, Decision, EquityPoint, ExitReason, Result, RunContext, Trade, TradeSource};
use risk::PositionBook;
use strategy::SignalEvaluator;

use crate::cycle::decide;
use crate::metrics::Metrics;

/// Everything a backtest produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub decisions: Vec<Decision>,
    pub metrics: Metrics,
}

/// Deterministic replay of the strategy over a full candle series.
pub struct BacktestEngine {
    ctx: RunContext,
    evaluator: SignalEvaluator,
    quiet: bool,
}

impl BacktestEngine {
    pub fn new(ctx: &RunContext) -> Self {
        Self { ctx: ctx.clone(), evaluator: SignalEvaluator::from_context(ctx), quiet: false }
    }

    /// Log the run summary at `debug` instead of `info`.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn run(&self, series: &CandleSeries) -> Result<BacktestReport> {
        let candles = series.candles();
        let initial = self.ctx.config.general.initial_capital;
        let mut book = PositionBook::from_context(&self.ctx);
        let lookback = self.evaluator.engine().lookback();

        if candles.len() < lookback {
            debug!(candles = candles.len(), lookback, "Series shorter than lookback, nothing to replay");
            return Ok(BacktestReport {
                metrics: Metrics::compute(initial, &[], &[], candles),
                ..Default::default()
            });
        }

        let indicators = self.evaluator.engine().compute(candles);
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(candles.len() + 1 - lookback);
        let mut decisions = Vec::with_capacity(candles.len() + 1 - lookback);

        for i in (lookback - 1)..candles.len() {
            let candle = &candles[i];
            let outcome = decide(&indicators, i, &mut book, &self.evaluator);

            match outcome.decision.action {
                Action::Buy => {
                    if let Some(pending) = book.plan_open(
                        candle.close,
                        candle.timestamp,
                        TradeSource::Auto,
                        outcome.atr,
                        outcome.regime,
                    ) {
                        book.commit_open(pending);
                    }
                }
                Action::Sell => {
                    let reason = outcome.decision.exit_reason.unwrap_or(ExitReason::Signal);
                    if let Some(trade) = book.plan_close(candle.close, candle.timestamp, reason) {
                        book.commit_close(&trade);
                        trades.push(trade);
                    }
                }
                Action::Hold => {}
            }

            decisions.push(outcome.decision);
            equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                balance: book.balance(),
                unrealized_pl: book.unrealized_pl(candle.close),
            });
        }

        if let Some(last) = candles.last() {
            if let Some(trade) = book.plan_close(last.close, last.timestamp, ExitReason::EndOfData) {
                book.commit_close(&trade);
                trades.push(trade);
                if let Some(point) = equity_curve.last_mut() {
                    point.balance = book.balance();
                    point.unrealized_pl = 0.0;
                }
            }
        }

        let metrics = Metrics::compute(initial, &trades, &equity_curve, &candles[lookback - 1..]);
        if self.quiet {
            debug!(trades = metrics.num_trades, return_pct = metrics.return_pct, "Backtest finished");
        } else {
            info!(
                trades = metrics.num_trades,
                return_pct = format!("{:.2}", metrics.return_pct),
                win_rate = format!("{:.1}", metrics.win_rate_pct),
                max_drawdown_pct = format!("{:.2}", metrics.max_drawdown_pct),
                final_capital = format!("{:.2}", metrics.final_capital),
                "Backtest finished"
            );
        }

        Ok(BacktestReport { trades, equity_curve, decisions, metrics })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{AppConfig, Candle, Error, StrategyConfig};

    /// A zigzagging wave with a rising drift: gives both entries and exits.
    pub(crate) fn wave(n: usize) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let x = i as f64;
                let zigzag = if i % 2 == 0 { 0.6 } else { -0.6 };
                let close = 100.0 + (x / 6.0).sin() * 12.0 + x * 0.15 + zigzag;
                let open = close - (x / 3.0).cos();
                Candle {
                    timestamp: t0 + Duration::days(i as i64),
                    open,
                    high: close.max(open) + 1.5,
                    low: close.min(open) - 1.5,
                    close,
                    volume: 1_000.0 + ((x / 4.0).sin() + 1.0) * 600.0,
                }
            })
            .collect()
    }

    pub(crate) fn context() -> RunContext {
        let mut cfg = AppConfig::default();
        cfg.strategy = StrategyConfig {
            sma_short: 3,
            sma_long: 8,
            rsi_period: 5,
            rsi_threshold: 80.0,
            macd_fast: 3,
            macd_slow: 8,
            macd_signal: 3,
            volume_sma_period: 5,
            atr_period: 5,
            adx_period: 5,
            adx_threshold: 10.0,
            bollinger_period: 8,
            min_secondary_conditions: 2,
            trailing_stop_percentage: 0.08,
            ..StrategyConfig::default()
        };
        cfg.general.trade_fee = 0.001;
        cfg.general.slippage = 0.0005;
        RunContext::new(cfg)
    }

    #[test]
    fn replay_is_deterministic() {
        let series = CandleSeries::new(wave(200)).unwrap();
        let engine = BacktestEngine::new(&context());
        let a = engine.run(&series).unwrap();
        let b = engine.run(&series).unwrap();
        assert_eq!(a, b);
        assert!(!a.trades.is_empty(), "fixture should trade");
    }

    #[test]
    fn ledger_is_consistent() {
        let series = CandleSeries::new(wave(200)).unwrap();
        let report = BacktestEngine::new(&context()).run(&series).unwrap();

        let buys = report.decisions.iter().filter(|d| d.action == Action::Buy).count();
        let sells = report.decisions.iter().filter(|d| d.action == Action::Sell).count();
        let end_of_data = report.trades.iter().filter(|t| t.exit_reason == ExitReason::EndOfData).count();
        assert_eq!(buys, sells + end_of_data);
        assert_eq!(report.trades.len(), buys);

        for (i, t) in report.trades.iter().enumerate() {
            assert_eq!(t.trade_id, i as u64 + 1);
            assert!(t.balance_after >= 0.0);
            assert!(t.close_timestamp > t.open_timestamp || t.exit_reason == ExitReason::EndOfData);
        }
        for pair in report.trades.windows(2) {
            assert!(pair[1].open_timestamp >= pair[0].close_timestamp);
        }
        assert_eq!(report.metrics.final_capital, report.trades.last().unwrap().balance_after);
    }

    #[test]
    fn one_point_per_replayed_candle() {
        let ctx = context();
        let series = CandleSeries::new(wave(120)).unwrap();
        let engine = BacktestEngine::new(&ctx);
        let lookback = engine.evaluator.engine().lookback();
        let report = engine.run(&series).unwrap();
        assert_eq!(report.equity_curve.len(), 120 - lookback + 1);
        assert_eq!(report.decisions.len(), report.equity_curve.len());
    }

    #[test]
    fn unfundable_entries_are_recorded_as_holds() {
        let mut cfg = (*context().config).clone();
        cfg.general.initial_capital = 0.0;
        let series = CandleSeries::new(wave(200)).unwrap();
        let report = BacktestEngine::new(&RunContext::new(cfg)).run(&series).unwrap();

        assert!(report.trades.is_empty());
        assert!(report.decisions.iter().all(|d| d.action == Action::Hold));
        assert!(report.decisions.iter().any(|d| d.reason == crate::cycle::INSUFFICIENT_BALANCE));
    }

    #[test]
    fn short_series_gives_empty_ledger() {
        let series = CandleSeries::new(wave(5)).unwrap();
        let report = BacktestEngine::new(&context()).run(&series).unwrap();
        assert!(report.trades.is_empty());
        assert!(report.equity_curve.is_empty());
        assert_eq!(report.metrics.final_capital, 1_000.0);
    }

    #[test]
    fn unordered_candles_are_a_config_error() {
        let mut candles = wave(30);
        candles.swap(10, 11);
        assert!(matches!(CandleSeries::new(candles), Err(Error::Config(_))));
    }
}
