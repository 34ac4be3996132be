use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV aggregation over a fixed time bucket. `timestamp` is the bucket start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of a simulated fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Who initiated a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradeSource {
    Auto,
    Manual,
}

impl std::fmt::Display for TradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSource::Auto => write!(f, "auto"),
            TradeSource::Manual => write!(f, "manual"),
        }
    }
}

/// Which rule set opened a position. It also selects the exit rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Regime {
    #[default]
    Trend,
    Range,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trend => write!(f, "trend"),
            Regime::Range => write!(f, "range"),
        }
    }
}

/// Trinary outcome of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeStop,
    Manual,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeStop => "time_stop",
            ExitReason::Manual => "manual",
            ExitReason::EndOfData => "end_of_data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "signal" => ExitReason::Signal,
            "stop_loss" => ExitReason::StopLoss,
            "take_profit" => ExitReason::TakeProfit,
            "trailing_stop" => ExitReason::TrailingStop,
            "time_stop" => ExitReason::TimeStop,
            "manual" => ExitReason::Manual,
            "end_of_data" => ExitReason::EndOfData,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The output of one evaluation cycle, kept for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    pub indicators: BTreeMap<String, Option<f64>>,
    pub conditions: BTreeMap<String, bool>,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Decision {
    pub fn hold(reason: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            action: Action::Hold,
            reason: reason.into(),
            exit_reason: None,
            indicators: BTreeMap::new(),
            conditions: BTreeMap::new(),
            timestamp,
            price,
        }
    }

    pub fn is_trade(&self) -> bool {
        self.action != Action::Hold
    }
}

/// The single open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Fill price, already adjusted for spread and slippage.
    pub entry_price: f64,
    pub volume: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub source: TradeSource,
    /// ATR of the entry candle; `None` when it was not yet defined.
    pub entry_atr: Option<f64>,
    /// Highest evaluated close since entry. Only ever moves up.
    pub peak_price: f64,
    pub regime: Regime,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.entry_price * self.volume
    }
}

/// A closed-position record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub open_timestamp: DateTime<Utc>,
    pub close_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    /// Net of fees.
    pub profit: f64,
    pub fees_paid: f64,
    pub balance_after: f64,
    pub source: TradeSource,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn duration_hours(&self) -> f64 {
        (self.close_timestamp - self.open_timestamp).num_seconds() as f64 / 3600.0
    }

    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.volume;
        if notional > 0.0 {
            self.profit / notional * 100.0
        } else {
            0.0
        }
    }
}

/// One point of a backtest equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub unrealized_pl: f64,
}

impl EquityPoint {
    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized_pl
    }
}

/// A simulated order submitted to the broker validation contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub price: f64,
    pub volume: f64,
}

impl OrderRequest {
    pub fn notional(&self) -> f64 {
        self.price * self.volume
    }
}

/// Outcome of broker-side validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Validation {
    Accepted,
    Rejected(RejectionReason),
}

/// Reason a simulated order was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    InvalidPrice,
    BelowMinimumVolume,
    BelowMinimumNotional,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::InvalidPrice => write!(f, "invalid price"),
            RejectionReason::BelowMinimumVolume => write!(f, "volume below minimum trade size"),
            RejectionReason::BelowMinimumNotional => write!(f, "notional below minimum order value"),
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Commands accepted by the paper-trading loop between automatic cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCommand {
    BuyNow,
    SellNow,
    Quit,
}

impl ManualCommand {
    /// Parse one line of operator input. The trimmed line must be a single character.
    pub fn parse(input: &str) -> Option<Self> {
        let mut chars = input.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c.to_ascii_lowercase() {
            'b' => Some(ManualCommand::BuyNow),
            's' => Some(ManualCommand::SellNow),
            'q' => Some(ManualCommand::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_command_parses_single_characters() {
        assert_eq!(ManualCommand::parse("b"), Some(ManualCommand::BuyNow));
        assert_eq!(ManualCommand::parse("  S\n"), Some(ManualCommand::SellNow));
        assert_eq!(ManualCommand::parse("q"), Some(ManualCommand::Quit));
        assert_eq!(ManualCommand::parse("x"), None);
        assert_eq!(ManualCommand::parse(""), None);
    }

    #[test]
    fn manual_command_ignores_words() {
        for line in ["bogus", "sell", "quiet", "stop", "b s", "qq"] {
            assert_eq!(ManualCommand::parse(line), None, "{line:?}");
        }
    }

    #[test]
    fn exit_reason_round_trips_through_its_name() {
        for reason in [
            ExitReason::Signal,
            ExitReason::StopLoss,
            ExitReason::TakeProfit,
            ExitReason::TrailingStop,
            ExitReason::TimeStop,
            ExitReason::Manual,
            ExitReason::EndOfData,
        ] {
            assert_eq!(ExitReason::parse(reason.as_str()), Some(reason));
        }
    }
}
