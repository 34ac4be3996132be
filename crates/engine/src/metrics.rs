use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use common::{Candle, EquityPoint, Trade};

/// Summary statistics of one backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_profit: f64,
    pub return_pct: f64,
    pub num_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub total_fees: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub avg_trade_duration_hours: f64,
    /// Mean over standard deviation of per-trade returns. 0 with fewer than two trades.
    pub sharpe_ratio: f64,
    pub buy_and_hold_return_pct: f64,
    pub exit_counts: BTreeMap<String, usize>,
}

impl Metrics {
    pub fn compute(
        initial_capital: f64,
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        candles: &[Candle],
    ) -> Self {
        let final_capital = trades.last().map(|t| t.balance_after).unwrap_or(initial_capital);
        let total_profit = final_capital - initial_capital;
        let return_pct = if initial_capital > 0.0 { total_profit / initial_capital * 100.0 } else { 0.0 };

        let winning_trades = trades.iter().filter(|t| t.profit > 0.0).count();
        let losing_trades = trades.len() - winning_trades;
        let win_rate_pct = if trades.is_empty() {
            0.0
        } else {
            winning_trades as f64 / trades.len() as f64 * 100.0
        };

        let avg_trade_duration_hours = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(Trade::duration_hours).sum::<f64>() / trades.len() as f64
        };

        let (max_drawdown, max_drawdown_pct) = max_drawdown(initial_capital, equity_curve);

        let mut exit_counts = BTreeMap::new();
        for t in trades {
            *exit_counts.entry(t.exit_reason.to_string()).or_insert(0) += 1;
        }

        Self {
            initial_capital,
            final_capital,
            total_profit,
            return_pct,
            num_trades: trades.len(),
            winning_trades,
            losing_trades,
            win_rate_pct,
            total_fees: trades.iter().map(|t| t.fees_paid).sum(),
            max_drawdown,
            max_drawdown_pct,
            avg_trade_duration_hours,
            sharpe_ratio: sharpe(trades),
            buy_and_hold_return_pct: buy_and_hold(candles),
            exit_counts,
        }
    }
}

/// Largest peak-to-trough fall of equity, absolute and as % of the peak.
fn max_drawdown(initial_capital: f64, equity_curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = initial_capital;
    let mut max_abs = 0.0_f64;
    let mut max_pct = 0.0_f64;
    for point in equity_curve {
        let equity = point.equity();
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        max_abs = max_abs.max(dd);
        if peak > 0.0 {
            max_pct = max_pct.max(dd / peak * 100.0);
        }
    }
    (max_abs, max_pct)
}

fn sharpe(trades: &[Trade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct() / 100.0).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

fn buy_and_hold(candles: &[Candle]) -> f64 {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) if first.close > 0.0 => (last.close - first.close) / first.close * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{ExitReason, TradeSource};

    fn trade(id: u64, profit: f64, balance_after: f64, reason: ExitReason) -> Trade {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            trade_id: id,
            open_timestamp: t0,
            close_timestamp: t0 + Duration::hours(12),
            entry_price: 100.0,
            exit_price: 100.0 + profit,
            volume: 1.0,
            profit,
            fees_paid: 0.5,
            balance_after,
            source: TradeSource::Auto,
            exit_reason: reason,
        }
    }

    fn point(balance: f64, unrealized_pl: f64) -> EquityPoint {
        EquityPoint { timestamp: Utc::now(), balance, unrealized_pl }
    }

    #[test]
    fn summarises_trades() {
        let trades = vec![
            trade(1, 10.0, 1_010.0, ExitReason::Signal),
            trade(2, -5.0, 1_005.0, ExitReason::StopLoss),
            trade(3, 20.0, 1_025.0, ExitReason::Signal),
        ];
        let m = Metrics::compute(1_000.0, &trades, &[], &[]);
        assert_eq!(m.final_capital, 1_025.0);
        assert!((m.return_pct - 2.5).abs() < 1e-9);
        assert_eq!(m.num_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert!((m.win_rate_pct - 66.666_666).abs() < 1e-3);
        assert!((m.total_fees - 1.5).abs() < 1e-9);
        assert_eq!(m.avg_trade_duration_hours, 12.0);
        assert_eq!(m.exit_counts.get("signal"), Some(&2));
        assert_eq!(m.exit_counts.get("stop_loss"), Some(&1));
        assert!(m.sharpe_ratio > 0.0);
    }

    #[test]
    fn drawdown_uses_the_equity_curve() {
        let curve = vec![point(1_000.0, 200.0), point(1_000.0, -100.0), point(1_050.0, 0.0)];
        let m = Metrics::compute(1_000.0, &[], &curve, &[]);
        assert_eq!(m.max_drawdown, 300.0);
        assert!((m.max_drawdown_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_is_flat() {
        let m = Metrics::compute(1_000.0, &[], &[], &[]);
        assert_eq!(m.final_capital, 1_000.0);
        assert_eq!(m.return_pct, 0.0);
        assert_eq!(m.win_rate_pct, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }
}
