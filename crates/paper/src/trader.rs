use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{
    Action, Decision, Error, ExitReason, ManualCommand, OrderRequest, OrderValidator, Regime, Result,
    RunContext, TradeSource, Validation,
};
use engine::decide;
use risk::{close_order, PositionBook};
use strategy::{SignalEvaluator, INSUFFICIENT_HISTORY};

use crate::feed::CandleFeed;
use crate::store::TradeStore;

/// Live paper-trading loop.
///
/// The trader task is the only writer of the position book and the store:
/// operator commands arrive as messages, so a manual transition and an
/// automatic cycle never interleave.
pub struct PaperTrader {
    ctx: RunContext,
    book: PositionBook,
    evaluator: SignalEvaluator,
    feed: Arc<dyn CandleFeed>,
    validator: Arc<dyn OrderValidator>,
    store: TradeStore,
    /// Timestamp of the newest completed candle already evaluated.
    last_evaluated: Option<DateTime<Utc>>,
}

impl PaperTrader {
    pub fn new(
        ctx: &RunContext,
        feed: Arc<dyn CandleFeed>,
        validator: Arc<dyn OrderValidator>,
        store: TradeStore,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            book: PositionBook::from_context(ctx),
            evaluator: SignalEvaluator::from_context(ctx),
            feed,
            validator,
            store,
            last_evaluated: None,
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Restore state from the store and register this run in `bot_status`.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<Uuid> {
        if let Some(rec) = self.store.recover().await? {
            info!(
                balance = rec.balance,
                open = rec.position.is_some(),
                next_trade_id = rec.next_trade_id,
                "Recovered state from store"
            );
            self.book.restore(rec.balance, rec.position, rec.next_trade_id);
        }
        self.last_evaluated = self.store.last_evaluation_time().await?;

        let run_id = Uuid::new_v4();
        self.store.mark_started(now, run_id).await?;
        info!(
            bot = %self.ctx.bot_name,
            %run_id,
            balance = self.book.balance(),
            interval = %self.ctx.config.data.interval,
            "Paper trader started"
        );
        Ok(run_id)
    }

    /// Drive the loop until `Quit` arrives or a fatal error occurs.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ManualCommand>) -> Result<()> {
        let paper = &self.ctx.config.paper;
        let mut eval_tick = tokio::time::interval(Duration::from_secs(paper.evaluation_interval_secs));
        let mut monitor_tick = tokio::time::interval(Duration::from_secs(paper.monitor_interval_secs));
        eval_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = eval_tick.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        recoverable(e, "Evaluation cycle failed")?;
                    }
                }
                _ = monitor_tick.tick() => self.report_status().await,
                Some(cmd) = commands.recv() => {
                    if cmd == ManualCommand::Quit {
                        info!("Quit requested");
                        break;
                    }
                    if let Err(e) = self.handle_command(cmd, Utc::now()).await {
                        recoverable(e, "Manual command failed")?;
                    }
                }
            }
        }

        info!(balance = self.book.balance(), open = self.book.is_open(), "Paper trader stopped");
        Ok(())
    }

    /// Evaluate the newest completed candle once.
    ///
    /// Returns `None` when there is no completed candle yet or the newest one
    /// was already evaluated, so calling it again with the same data is a no-op.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<Option<Decision>> {
        let interval = self.ctx.config.data.interval;
        let series = self.feed.reload().await?.closed_buckets(interval, now);
        let Some(last) = series.last().copied() else {
            debug!("No completed candle yet");
            return Ok(None);
        };
        if self.last_evaluated.is_some_and(|ts| ts >= last.timestamp) {
            debug!(candle = %last.timestamp, "Newest candle already evaluated");
            return Ok(None);
        }

        let candles = series.candles();
        let (decision, regime, atr) = if candles.len() < self.evaluator.engine().lookback() {
            (Decision::hold(INSUFFICIENT_HISTORY, last.timestamp, last.close), Regime::Trend, None)
        } else {
            let indicators = self.evaluator.engine().compute(candles);
            let outcome = decide(&indicators, candles.len() - 1, &mut self.book, &self.evaluator);
            (outcome.decision, outcome.regime, outcome.atr)
        };

        info!(
            candle = %last.timestamp,
            action = %decision.action,
            price = last.close,
            reason = %decision.reason,
            "Cycle evaluated"
        );

        // the evaluation row commits with the fill, so a failed fill leaves the candle pending
        let filled = match decision.action {
            Action::Buy => {
                self.open(last.close, last.timestamp, TradeSource::Auto, atr, regime, Some(&decision))
                    .await?
            }
            Action::Sell => {
                let reason = decision.exit_reason.unwrap_or(ExitReason::Signal);
                self.close(last.close, last.timestamp, reason, Some(&decision)).await?
            }
            Action::Hold => false,
        };
        if !filled {
            self.store.record_evaluation(&decision).await?;
        }
        self.last_evaluated = Some(last.timestamp);
        Ok(Some(decision))
    }

    /// Execute an operator command at the feed's latest price.
    /// Returns whether a transition was committed.
    pub async fn handle_command(&mut self, cmd: ManualCommand, now: DateTime<Utc>) -> Result<bool> {
        match cmd {
            ManualCommand::BuyNow => {
                if self.book.is_open() {
                    info!("Manual buy ignored: position already open");
                    return Ok(false);
                }
                let price = self.feed.latest_price().await?;
                let atr = self.latest_atr(now).await?;
                self.open(price, now, TradeSource::Manual, atr, Regime::Trend, None).await
            }
            ManualCommand::SellNow => {
                if !self.book.is_open() {
                    info!("Manual sell ignored: no open position");
                    return Ok(false);
                }
                let price = self.feed.latest_price().await?;
                self.close(price, now, ExitReason::Manual, None).await
            }
            ManualCommand::Quit => Ok(false),
        }
    }

    async fn open(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        source: TradeSource,
        atr: Option<f64>,
        regime: Regime,
        evaluation: Option<&Decision>,
    ) -> Result<bool> {
        let Some(pending) = self.book.plan_open(price, timestamp, source, atr, regime) else {
            return Ok(false);
        };
        if !self.accepted(&pending.order()).await? {
            return Ok(false);
        }
        self.store
            .record_open(self.book.next_trade_id(), &pending.position, self.book.balance(), evaluation)
            .await?;
        self.book.commit_open(pending);
        Ok(true)
    }

    async fn close(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
        evaluation: Option<&Decision>,
    ) -> Result<bool> {
        let Some(trade) = self.book.plan_close(price, timestamp, reason) else {
            return Ok(false);
        };
        if !self.accepted(&close_order(&trade)).await? {
            return Ok(false);
        }
        self.store.record_close(&trade, evaluation).await?;
        self.book.commit_close(&trade);
        Ok(true)
    }

    /// Rejections and recoverable validator errors roll the transition back.
    async fn accepted(&self, order: &OrderRequest) -> Result<bool> {
        match self.validator.validate_order(order).await {
            Ok(Validation::Accepted) => Ok(true),
            Ok(Validation::Rejected(reason)) => {
                let rejected = Error::ValidationRejected { reason };
                warn!(side = %order.side, price = order.price, volume = order.volume, error = %rejected, "Transition rolled back");
                Ok(false)
            }
            Err(e) if !e.is_fatal() => {
                warn!(side = %order.side, error = %e, "Validation failed, transition rolled back");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn latest_atr(&self, now: DateTime<Utc>) -> Result<Option<f64>> {
        let interval = self.ctx.config.data.interval;
        let series = self.feed.reload().await?.closed_buckets(interval, now);
        Ok(self.evaluator.engine().latest(series.candles()).and_then(|s| s.atr))
    }

    async fn report_status(&self) {
        let price = match self.feed.latest_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "Status check could not read the feed");
                return;
            }
        };
        match self.book.position() {
            Some(p) => info!(
                price,
                entry_price = p.entry_price,
                volume = p.volume,
                peak = p.peak_price,
                unrealized_pl = format!("{:.2}", self.book.unrealized_pl(price)),
                equity = format!("{:.2}", self.book.equity(price)),
                "Status: OPEN"
            ),
            None => info!(price, balance = format!("{:.2}", self.book.balance()), "Status: FLAT"),
        }
    }
}

fn recoverable(e: Error, context: &str) -> Result<()> {
    if e.is_fatal() {
        error!(error = %e, "{context}");
        Err(e)
    } else {
        warn!(error = %e, "{context}");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::{AppConfig, Candle, CandleSeries, RejectionReason, Side};

    use crate::feed::MemoryFeed;
    use crate::store::tests::store_config;
    use crate::DryRunValidator;

    struct RejectAll;

    #[async_trait]
    impl OrderValidator for RejectAll {
        async fn validate_order(&self, _order: &OrderRequest) -> Result<Validation> {
            Ok(Validation::Rejected(RejectionReason::Other("closed market".into())))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn daily(n: usize) -> CandleSeries {
        let candles = (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle {
                    timestamp: t0() + ChronoDuration::days(i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 50.0,
                }
            })
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    async fn trader(
        dir: &std::path::Path,
        feed: Arc<MemoryFeed>,
        validator: Arc<dyn OrderValidator>,
    ) -> PaperTrader {
        let mut cfg = AppConfig::default();
        cfg.store = store_config(dir);
        let ctx = RunContext::new(cfg);
        let store = TradeStore::connect(&ctx.config.store, ctx.bot_name.clone()).await.unwrap();
        PaperTrader::new(&ctx, feed, validator, store)
    }

    fn accept() -> Arc<dyn OrderValidator> {
        Arc::new(DryRunValidator::new(0.0001, 1.0))
    }

    #[tokio::test]
    async fn manual_sell_while_flat_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(5)));
        let mut trader = trader(tmp.path(), feed, accept()).await;

        assert!(!trader.handle_command(ManualCommand::SellNow, t0()).await.unwrap());
        assert!(!trader.book().is_open());
        assert_eq!(trader.book().balance(), 1_000.0);
        assert!(trader.store.fills().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_round_trip_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(5)));
        let mut trader = trader(tmp.path(), feed.clone(), accept()).await;
        let now = t0() + ChronoDuration::days(5);

        assert!(trader.handle_command(ManualCommand::BuyNow, now).await.unwrap());
        assert!(!trader.handle_command(ManualCommand::BuyNow, now).await.unwrap());
        assert_eq!(trader.book().position().unwrap().source, TradeSource::Manual);

        feed.set(daily(8)).await;
        assert!(trader.handle_command(ManualCommand::SellNow, now).await.unwrap());
        assert!(!trader.book().is_open());
        assert!(trader.book().balance() > 1_000.0);

        let fills = trader.store.fills().await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, Side::Buy);
        assert_eq!(fills[1].exit_reason, Some(ExitReason::Manual));
        assert_eq!(fills[1].price, 107.0);
    }

    #[tokio::test]
    async fn rejected_order_leaves_state_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(5)));
        let mut trader = trader(tmp.path(), feed, Arc::new(RejectAll)).await;

        assert!(!trader.handle_command(ManualCommand::BuyNow, t0()).await.unwrap());
        assert!(!trader.book().is_open());
        assert_eq!(trader.book().next_trade_id(), 1);
        assert!(trader.store.fills().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_candle_is_evaluated_once() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(5)));
        let mut trader = trader(tmp.path(), feed, accept()).await;
        let now = t0() + ChronoDuration::days(5);

        let first = trader.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(first.action, Action::Hold);
        assert_eq!(first.reason, INSUFFICIENT_HISTORY);
        assert_eq!(first.timestamp, t0() + ChronoDuration::days(4));

        assert_eq!(trader.run_cycle(now).await.unwrap(), None);
        assert_eq!(trader.run_cycle(now + ChronoDuration::hours(3)).await.unwrap(), None);
        assert_eq!(trader.store.evaluations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_progress_candle_is_not_evaluated() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(1)));
        let mut trader = trader(tmp.path(), feed, accept()).await;

        assert_eq!(trader.run_cycle(t0() + ChronoDuration::hours(12)).await.unwrap(), None);
        assert!(trader.run_cycle(t0() + ChronoDuration::days(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn restart_recovers_open_position() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(5)));
        let now = t0() + ChronoDuration::days(5);

        let mut first = trader(tmp.path(), feed.clone(), accept()).await;
        first.start(now).await.unwrap();
        first.run_cycle(now).await.unwrap();
        first.handle_command(ManualCommand::BuyNow, now).await.unwrap();
        let entry = first.book().position().unwrap().entry_price;
        drop(first);

        let mut second = trader(tmp.path(), feed, accept()).await;
        second.start(now).await.unwrap();
        let p = second.book().position().unwrap();
        assert_eq!(p.entry_price, entry);
        assert_eq!(p.source, TradeSource::Manual);
        assert_eq!(second.run_cycle(now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn quit_stops_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let feed = Arc::new(MemoryFeed::new(daily(3)));
        let trader = trader(tmp.path(), feed, accept()).await;
        let (tx, rx) = mpsc::channel(4);
        tx.send(ManualCommand::SellNow).await.unwrap();
        tx.send(ManualCommand::Quit).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), trader.run(rx))
            .await
            .expect("loop should stop on quit")
            .unwrap();
    }
}
