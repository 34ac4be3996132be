use chrono::{DateTime, Utc};

use common::{Action, Decision, ExitReason, Regime, TradeSource};
use risk::PositionBook;
use strategy::{IndicatorSeries, SignalEvaluator};

/// One evaluated candle: the auditable decision plus what an entry needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub decision: Decision,
    /// Rule set behind a BUY; carried onto the position.
    pub regime: Regime,
    /// ATR of the evaluated candle, fixed on the position at entry.
    pub atr: Option<f64>,
}

impl CycleOutcome {
    fn hold(reason: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { decision: Decision::hold(reason, timestamp, price), regime: Regime::Trend, atr: None }
    }
}

/// Reason recorded when the entry rules fire but the balance cannot fund a position.
pub const INSUFFICIENT_BALANCE: &str = "entry signal with nothing to invest";

/// Decide what to do on candle `i` of `series`.
///
/// FLAT: entry rules, downgraded to HOLD when no position can be funded. OPEN: risk exits first, then the signal exit of the
/// position's regime. Never exits on the candle the position was opened on.
/// The only book mutation is the trailing-peak ratchet.
pub fn decide(
    series: &IndicatorSeries,
    i: usize,
    book: &mut PositionBook,
    evaluator: &SignalEvaluator,
) -> CycleOutcome {
    let Some(state) = series.state_at(i) else {
        return CycleOutcome::hold("no candle", DateTime::<Utc>::default(), 0.0);
    };
    let (ts, close) = (state.timestamp, state.close);

    let (entry_ts, regime) = match book.position() {
        None => {
            let eval = evaluator.evaluate_entry(&state);
            let fundable = eval.fired
                && book.plan_open(close, ts, TradeSource::Auto, state.atr, eval.regime).is_some();
            let (action, reason) = match (eval.fired, fundable) {
                (true, true) => (Action::Buy, eval.reason),
                (true, false) => (Action::Hold, INSUFFICIENT_BALANCE.to_string()),
                _ => (Action::Hold, eval.reason),
            };
            return CycleOutcome {
                decision: Decision {
                    action,
                    reason,
                    exit_reason: None,
                    indicators: state.snapshot(),
                    conditions: eval.conditions,
                    timestamp: ts,
                    price: close,
                },
                regime: eval.regime,
                atr: state.atr,
            };
        }
        Some(p) => (p.entry_timestamp, p.regime),
    };

    if ts <= entry_ts {
        let mut outcome = CycleOutcome::hold("position opened on this candle", ts, close);
        outcome.decision.indicators = state.snapshot();
        outcome.regime = regime;
        return outcome;
    }

    let risk_exit = book.check_exit(close, ts);
    let eval = evaluator.evaluate_exit(&state, regime);
    let mut conditions = eval.conditions;
    for reason in [
        ExitReason::StopLoss,
        ExitReason::TakeProfit,
        ExitReason::TrailingStop,
        ExitReason::TimeStop,
    ] {
        conditions.insert(reason.as_str().to_string(), risk_exit == Some(reason));
    }

    let (action, exit_reason, reason) = match risk_exit {
        Some(r) => (Action::Sell, Some(r), format!("risk exit: {r}")),
        None if eval.fired => (Action::Sell, Some(ExitReason::Signal), eval.reason),
        None => (Action::Hold, None, eval.reason),
    };

    CycleOutcome {
        decision: Decision {
            action,
            reason,
            exit_reason,
            indicators: state.snapshot(),
            conditions,
            timestamp: ts,
            price: close,
        },
        regime,
        atr: state.atr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::{Candle, StrategyConfig};
    use risk::{CostModel, RiskRules};
    use strategy::{IndicatorEngine, INSUFFICIENT_HISTORY};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                timestamp: t0 + Duration::days(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    fn setup(cfg: &StrategyConfig) -> (SignalEvaluator, PositionBook) {
        let book = PositionBook::new(
            1_000.0,
            1.0,
            CostModel::frictionless(),
            RiskRules::from_config(cfg),
        );
        (SignalEvaluator::new(cfg), book)
    }

    #[test]
    fn short_window_holds() {
        let cfg = StrategyConfig::default();
        let (evaluator, mut book) = setup(&cfg);
        let data = candles(&[100.0, 105.0, 95.0]);
        let series = IndicatorEngine::new(&cfg).compute(&data);
        for i in 0..data.len() {
            let out = decide(&series, i, &mut book, &evaluator);
            assert_eq!(out.decision.action, Action::Hold);
            assert_eq!(out.decision.reason, INSUFFICIENT_HISTORY);
        }
    }

    #[test]
    fn stop_loss_overrides_signal_exit() {
        let cfg = StrategyConfig { stop_loss_atr_multiplier: 2.0, ..StrategyConfig::default() };
        let (evaluator, mut book) = setup(&cfg);
        let data = candles(&[100.0, 89.0]);
        let series = IndicatorEngine::new(&cfg).compute(&data);

        let pending = book
            .plan_open(100.0, data[0].timestamp, TradeSource::Auto, Some(5.0), Regime::Trend)
            .unwrap();
        book.commit_open(pending);

        // entry candle: no exit evaluation
        let out = decide(&series, 0, &mut book, &evaluator);
        assert_eq!(out.decision.action, Action::Hold);

        let out = decide(&series, 1, &mut book, &evaluator);
        assert_eq!(out.decision.action, Action::Sell);
        assert_eq!(out.decision.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(out.decision.conditions.get("stop_loss"), Some(&true));
    }

    #[test]
    fn re_deciding_a_completed_candle_is_stable() {
        let ctx = crate::backtest::tests::context();
        let data = crate::backtest::tests::wave(120);
        let evaluator = SignalEvaluator::from_context(&ctx);
        let series = evaluator.engine().compute(&data);

        let mut flat = PositionBook::from_context(&ctx);
        let mut open = PositionBook::from_context(&ctx);
        let pending = open
            .plan_open(data[0].close, data[0].timestamp, TradeSource::Auto, Some(2.0), Regime::Trend)
            .unwrap();
        open.commit_open(pending);

        for i in evaluator.engine().lookback() - 1..data.len() {
            for book in [&mut flat, &mut open] {
                let first = decide(&series, i, book, &evaluator);
                let again = decide(&series, i, book, &evaluator);
                assert_eq!(first, again, "candle {i}");
            }
        }
    }

    #[test]
    fn out_of_range_index_holds() {
        let cfg = StrategyConfig::default();
        let (evaluator, mut book) = setup(&cfg);
        let series = IndicatorEngine::new(&cfg).compute(&[]);
        assert_eq!(decide(&series, 0, &mut book, &evaluator).decision.action, Action::Hold);
    }
}
