use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{
    ExitReason, OrderRequest, Position, Regime, RunContext, Side, Trade, TradeSource,
};

use crate::{CostModel, RiskRules};

/// A sized entry that has not been committed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOpen {
    pub position: Position,
}

impl PendingOpen {
    pub fn order(&self) -> OrderRequest {
        OrderRequest {
            side: Side::Buy,
            price: self.position.entry_price,
            volume: self.position.volume,
        }
    }
}

/// Order submitted for validation before a planned close is committed.
pub fn close_order(trade: &Trade) -> OrderRequest {
    OrderRequest { side: Side::Sell, price: trade.exit_price, volume: trade.volume }
}

/// Single-position book: FLAT or OPEN, never more than one position.
///
/// Transitions are two-phase. `plan_*` computes the outcome without touching
/// state, so the caller can validate and persist it first; `commit_*` applies
/// it. Planning in the wrong state returns `None`.
#[derive(Debug, Clone)]
pub struct PositionBook {
    balance: f64,
    position: Option<Position>,
    next_trade_id: u64,
    investment_fraction: f64,
    cost: CostModel,
    rules: RiskRules,
}

impl PositionBook {
    pub fn new(initial_balance: f64, investment_fraction: f64, cost: CostModel, rules: RiskRules) -> Self {
        Self {
            balance: initial_balance,
            position: None,
            next_trade_id: 1,
            investment_fraction,
            cost,
            rules,
        }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        let cfg = &ctx.config;
        Self::new(
            cfg.general.initial_capital,
            cfg.general.investment_fraction,
            CostModel::from_config(&cfg.general),
            RiskRules::from_config(&cfg.strategy),
        )
    }

    /// Replace state with what a durable store recorded.
    pub fn restore(&mut self, balance: f64, position: Option<Position>, next_trade_id: u64) {
        self.balance = balance;
        self.position = position;
        self.next_trade_id = next_trade_id.max(1);
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }

    pub fn next_trade_id(&self) -> u64 {
        self.next_trade_id
    }

    pub fn cost(&self) -> &CostModel {
        &self.cost
    }

    pub fn rules(&self) -> &RiskRules {
        &self.rules
    }

    pub fn plan_open(
        &self,
        price: f64,
        timestamp: DateTime<Utc>,
        source: TradeSource,
        atr: Option<f64>,
        regime: Regime,
    ) -> Option<PendingOpen> {
        if self.position.is_some() {
            debug!(%source, "Open ignored: position already open");
            return None;
        }
        if !(price.is_finite() && price > 0.0) {
            debug!(price, "Open ignored: invalid price");
            return None;
        }
        let fill = self.cost.buy_fill(price);
        let volume = self.investment_fraction * self.cost.available_balance(self.balance) / fill;
        if !(volume.is_finite() && volume > 0.0) {
            debug!(balance = self.balance, "Open ignored: nothing to invest");
            return None;
        }
        Some(PendingOpen {
            position: Position {
                entry_price: fill,
                volume,
                entry_timestamp: timestamp,
                source,
                entry_atr: atr,
                peak_price: price,
                regime,
            },
        })
    }

    pub fn commit_open(&mut self, pending: PendingOpen) {
        if self.position.is_some() {
            debug!("Commit ignored: position already open");
            return;
        }
        let p = pending.position;
        info!(
            price = p.entry_price,
            volume = p.volume,
            source = %p.source,
            regime = %p.regime,
            "Position opened"
        );
        self.position = Some(p);
    }

    pub fn plan_close(&self, price: f64, timestamp: DateTime<Utc>, reason: ExitReason) -> Option<Trade> {
        let Some(p) = &self.position else {
            debug!(%reason, "Close ignored: no open position");
            return None;
        };
        if !(price.is_finite() && price > 0.0) {
            debug!(price, "Close ignored: invalid price");
            return None;
        }
        let exit = self.cost.sell_fill(price);
        let fees = self.cost.round_trip_fees(p.entry_price * p.volume, exit * p.volume);
        let profit = (exit - p.entry_price) * p.volume - fees;
        let source = if reason == ExitReason::Manual { TradeSource::Manual } else { TradeSource::Auto };
        Some(Trade {
            trade_id: self.next_trade_id,
            open_timestamp: p.entry_timestamp,
            close_timestamp: timestamp,
            entry_price: p.entry_price,
            exit_price: exit,
            volume: p.volume,
            profit,
            fees_paid: fees,
            balance_after: (self.balance + profit).max(0.0),
            source,
            exit_reason: reason,
        })
    }

    pub fn commit_close(&mut self, trade: &Trade) {
        if self.position.take().is_none() {
            debug!("Commit ignored: no open position");
            return;
        }
        self.balance = trade.balance_after;
        self.next_trade_id = trade.trade_id + 1;
        info!(
            trade_id = trade.trade_id,
            exit_price = trade.exit_price,
            profit = trade.profit,
            balance = self.balance,
            reason = %trade.exit_reason,
            "Position closed"
        );
    }

    /// Ratchet the trailing peak with an evaluated close. Never moves it down.
    pub fn observe(&mut self, close: f64) {
        if let Some(p) = self.position.as_mut() {
            if close > p.peak_price {
                p.peak_price = close;
            }
        }
    }

    /// Ratchet the peak with `close`, then check the risk exits against it.
    pub fn check_exit(&mut self, close: f64, now: DateTime<Utc>) -> Option<ExitReason> {
        self.observe(close);
        let p = self.position.as_ref()?;
        self.rules.check(p, close, now)
    }

    pub fn unrealized_pl(&self, price: f64) -> f64 {
        self.position
            .as_ref()
            .map(|p| (price - p.entry_price) * p.volume)
            .unwrap_or(0.0)
    }

    pub fn equity(&self, price: f64) -> f64 {
        self.balance + self.unrealized_pl(price)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
