//! On-disk artifacts of a backtest run.
//!
//! Each run gets its own `backtest_<YYYYmmdd_HHMMSS>` directory under the
//! results directory; older run directories are pruned to a fixed count.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use common::{EquityPoint, Result, Trade};

use crate::backtest::BacktestReport;

const RUN_PREFIX: &str = "backtest_";

#[derive(Serialize)]
struct TradeRow<'a> {
    trade_id: u64,
    open_timestamp: String,
    close_timestamp: String,
    entry_price: f64,
    exit_price: f64,
    volume: f64,
    profit: f64,
    fees_paid: f64,
    balance_after: f64,
    source: String,
    exit_reason: &'a str,
    duration_hours: f64,
}

#[derive(Serialize)]
struct EquityRow {
    timestamp: String,
    balance: f64,
    unrealized_pl: f64,
    equity: f64,
}

/// Write every artifact of `report` into a fresh run directory and return its path.
pub fn write_run(results_dir: &Path, report: &BacktestReport, now: DateTime<Utc>) -> Result<PathBuf> {
    let run_dir = results_dir.join(format!("{RUN_PREFIX}{}", now.format("%Y%m%d_%H%M%S")));
    fs::create_dir_all(&run_dir)?;

    fs::write(run_dir.join("metrics.json"), serde_json::to_vec_pretty(&report.metrics)?)?;
    fs::write(run_dir.join("trades.json"), serde_json::to_vec_pretty(&report.trades)?)?;
    fs::write(run_dir.join("decisions.json"), serde_json::to_vec_pretty(&report.decisions)?)?;
    write_trades_csv(&run_dir.join("trades.csv"), &report.trades)?;
    write_equity_csv(&run_dir.join("equity.csv"), &report.equity_curve)?;
    fs::write(run_dir.join("equity.svg"), equity_svg(&report.equity_curve, &report.trades))?;

    info!(dir = %run_dir.display(), "Backtest artifacts written");
    Ok(run_dir)
}

fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for t in trades {
        writer.serialize(TradeRow {
            trade_id: t.trade_id,
            open_timestamp: t.open_timestamp.to_rfc3339(),
            close_timestamp: t.close_timestamp.to_rfc3339(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            volume: t.volume,
            profit: t.profit,
            fees_paid: t.fees_paid,
            balance_after: t.balance_after,
            source: t.source.to_string(),
            exit_reason: t.exit_reason.as_str(),
            duration_hours: t.duration_hours(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_equity_csv(path: &Path, curve: &[EquityPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for p in curve {
        writer.serialize(EquityRow {
            timestamp: p.timestamp.to_rfc3339(),
            balance: p.balance,
            unrealized_pl: p.unrealized_pl,
            equity: p.equity(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Equity line with green entry and red exit markers.
fn equity_svg(curve: &[EquityPoint], trades: &[Trade]) -> String {
    const W: f64 = 1000.0;
    const H: f64 = 400.0;
    const PAD: f64 = 40.0;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{W}" height="{H}" viewBox="0 0 {W} {H}">"#
    );
    svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
    if curve.is_empty() {
        svg.push_str("</svg>");
        return svg;
    }

    let t0 = curve[0].timestamp.timestamp() as f64;
    let t1 = curve[curve.len() - 1].timestamp.timestamp() as f64;
    let span = (t1 - t0).max(1.0);
    let (lo, hi) = curve
        .iter()
        .map(EquityPoint::equity)
        .fold((f64::MAX, f64::MIN), |(lo, hi), e| (lo.min(e), hi.max(e)));
    let range = (hi - lo).max(1e-9);

    let x = |ts: DateTime<Utc>| PAD + (ts.timestamp() as f64 - t0) / span * (W - 2.0 * PAD);
    let y = |equity: f64| H - PAD - (equity - lo) / range * (H - 2.0 * PAD);
    let equity_at = |ts: DateTime<Utc>| {
        let idx = curve.partition_point(|p| p.timestamp < ts).min(curve.len() - 1);
        curve[idx].equity()
    };

    let mut points = String::new();
    for p in curve {
        let _ = write!(points, "{:.1},{:.1} ", x(p.timestamp), y(p.equity()));
    }
    let _ = write!(
        svg,
        r##"<polyline fill="none" stroke="#1f77b4" stroke-width="1.5" points="{}"/>"##,
        points.trim_end()
    );

    for t in trades {
        let _ = write!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="4" fill="#2ca02c"/>"##,
            x(t.open_timestamp),
            y(equity_at(t.open_timestamp))
        );
        let _ = write!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="4" fill="#d62728"/>"##,
            x(t.close_timestamp),
            y(equity_at(t.close_timestamp))
        );
    }
    let _ = write!(
        svg,
        r#"<text x="{PAD}" y="20" font-family="sans-serif" font-size="12">equity {lo:.2} .. {hi:.2}</text>"#
    );
    svg.push_str("</svg>");
    svg
}

/// Keep the newest `keep` run directories under `results_dir`, delete the rest.
pub fn prune_runs(results_dir: &Path, keep: usize) -> Result<usize> {
    if !results_dir.exists() {
        return Ok(0);
    }
    let mut runs: Vec<PathBuf> = fs::read_dir(results_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(RUN_PREFIX))
        .map(|entry| entry.path())
        .collect();
    // the timestamp suffix sorts chronologically
    runs.sort();

    let excess = runs.len().saturating_sub(keep);
    for dir in &runs[..excess] {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to remove old run directory");
        }
    }
    if excess > 0 {
        info!(removed = excess, kept = keep, "Pruned old backtest runs");
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::tests::{context, wave};
    use crate::backtest::BacktestEngine;
    use chrono::{Duration, TimeZone};
    use common::CandleSeries;

    #[test]
    fn writes_every_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let series = CandleSeries::new(wave(150)).unwrap();
        let report = BacktestEngine::new(&context()).run(&series).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        let dir = write_run(tmp.path(), &report, now).unwrap();
        assert!(dir.ends_with("backtest_20240506_070809"));
        for name in ["metrics.json", "trades.json", "trades.csv", "equity.csv", "decisions.json", "equity.svg"] {
            assert!(dir.join(name).is_file(), "missing {name}");
        }

        let equity = fs::read_to_string(dir.join("equity.csv")).unwrap();
        assert_eq!(equity.lines().count(), report.equity_curve.len() + 1);
        let svg = fs::read_to_string(dir.join("equity.svg")).unwrap();
        assert!(svg.starts_with("<svg") && svg.ends_with("</svg>"));

        let metrics: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.join("metrics.json")).unwrap()).unwrap();
        assert_eq!(metrics["num_trades"], report.trades.len());
    }

    #[test]
    fn prunes_oldest_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            write_run(tmp.path(), &BacktestReport::default(), t0 + Duration::minutes(i)).unwrap();
        }
        fs::create_dir(tmp.path().join("unrelated")).unwrap();

        assert_eq!(prune_runs(tmp.path(), 2).unwrap(), 3);
        let mut left: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["backtest_20240101_000300", "backtest_20240101_000400", "unrelated"]);
    }

    #[test]
    fn pruning_a_missing_dir_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(prune_runs(&tmp.path().join("nope"), 3).unwrap(), 0);
    }
}
