use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{AppConfig, CandleSeries, EnvConfig, ManualCommand, RunContext, RunMode};
use engine::{prune_runs, write_run, BacktestEngine};
use paper::{spawn_ctrl_c_listener, spawn_stdin_listener, CsvFeed, DryRunValidator, PaperTrader, TradeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let env = EnvConfig::from_env()?;
    let mut cfg = AppConfig::load(&env.config_path)
        .with_context(|| format!("loading {}", env.config_path.display()))?;
    if let Some(url) = env.database_url {
        cfg.store.database_url = url;
    }
    let ctx = RunContext::new(cfg);
    info!(mode = %env.mode, config = %env.config_path.display(), "SwingBot starting");

    match env.mode {
        RunMode::Backtest => backtest(&ctx),
        RunMode::Paper => paper(&ctx).await,
    }
}

fn backtest(ctx: &RunContext) -> anyhow::Result<()> {
    let general = &ctx.config.general;
    let series = CandleSeries::load(&ctx.config.data)?;
    info!(candles = series.len(), interval = %ctx.config.data.interval, "Candles loaded");

    let report = BacktestEngine::new(ctx).run(&series)?;
    let dir = write_run(&general.results_dir, &report, Utc::now())?;
    prune_runs(&general.results_dir, general.results_cleanup_limit)?;
    info!(dir = %dir.display(), "Backtest complete");
    Ok(())
}

async fn paper(ctx: &RunContext) -> anyhow::Result<()> {
    // ── Store ─────────────────────────────────────────────────────────────────
    let store = TradeStore::connect(&ctx.config.store, ctx.bot_name.clone()).await?;

    // ── Trader ────────────────────────────────────────────────────────────────
    let feed = Arc::new(CsvFeed::new(ctx.config.data.file_path.clone()));
    let validator = Arc::new(DryRunValidator::from_config(&ctx.config.paper));
    let mut trader = PaperTrader::new(ctx, feed, validator, store);
    trader.start(Utc::now()).await?;

    // ── Operator commands ─────────────────────────────────────────────────────
    let (command_tx, command_rx) = mpsc::channel::<ManualCommand>(8);
    spawn_ctrl_c_listener(command_tx.clone());
    spawn_stdin_listener(command_tx).context("starting command listener")?;

    // ── Run until quit (typed or Ctrl-C) ──────────────────────────────────────
    trader.run(command_rx).await?;
    info!("Exiting");
    Ok(())
}
