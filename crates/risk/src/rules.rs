use chrono::{DateTime, Duration, Utc};

use common::{ExitReason, Position, StrategyConfig};

/// Risk-driven exits that override the signal rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRules {
    pub stop_loss_atr_multiplier: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_multiplier: f64,
    pub take_profit_pct: Option<f64>,
    pub trailing_stop_percentage: f64,
    pub time_stop_days: u32,
    pub time_stop_loss_pct: f64,
}

impl RiskRules {
    pub fn from_config(cfg: &StrategyConfig) -> Self {
        Self {
            stop_loss_atr_multiplier: cfg.stop_loss_atr_multiplier,
            stop_loss_pct: cfg.stop_loss_pct,
            take_profit_multiplier: cfg.take_profit_multiplier,
            take_profit_pct: cfg.take_profit_pct,
            trailing_stop_percentage: cfg.trailing_stop_percentage,
            time_stop_days: cfg.time_stop_days,
            time_stop_loss_pct: cfg.time_stop_loss_pct,
        }
    }

    /// `None` when the position has no entry ATR and no fixed percentage is set.
    pub fn stop_loss_level(&self, p: &Position) -> Option<f64> {
        match self.stop_loss_pct {
            Some(pct) => Some(p.entry_price * (1.0 - pct)),
            None => p.entry_atr.map(|atr| p.entry_price - atr * self.stop_loss_atr_multiplier),
        }
    }

    pub fn take_profit_level(&self, p: &Position) -> Option<f64> {
        match self.take_profit_pct {
            Some(pct) => Some(p.entry_price * (1.0 + pct)),
            None => p.entry_atr.map(|atr| {
                p.entry_price + atr * self.stop_loss_atr_multiplier * self.take_profit_multiplier
            }),
        }
    }

    pub fn trailing_level(&self, p: &Position) -> f64 {
        p.peak_price * (1.0 - self.trailing_stop_percentage)
    }

    /// First matching risk exit for `close`, checked in order: stop-loss,
    /// take-profit, trailing stop, time stop.
    pub fn check(&self, p: &Position, close: f64, now: DateTime<Utc>) -> Option<ExitReason> {
        if self.stop_loss_level(p).is_some_and(|level| close <= level) {
            return Some(ExitReason::StopLoss);
        }
        if self.take_profit_level(p).is_some_and(|level| close >= level) {
            return Some(ExitReason::TakeProfit);
        }
        if close < self.trailing_level(p) {
            return Some(ExitReason::TrailingStop);
        }
        if self.time_stop_days > 0 {
            let held = now - p.entry_timestamp;
            let change_pct = (close - p.entry_price) / p.entry_price * 100.0;
            if held >= Duration::days(self.time_stop_days as i64)
                && change_pct < -self.time_stop_loss_pct
            {
                return Some(ExitReason::TimeStop);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{Regime, TradeSource};

    fn position(entry: f64, atr: Option<f64>) -> Position {
        Position {
            entry_price: entry,
            volume: 1.0,
            entry_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            source: TradeSource::Auto,
            entry_atr: atr,
            peak_price: entry,
            regime: Regime::Trend,
        }
    }

    fn rules() -> RiskRules {
        RiskRules {
            stop_loss_atr_multiplier: 2.0,
            stop_loss_pct: None,
            take_profit_multiplier: 3.0,
            take_profit_pct: None,
            trailing_stop_percentage: 0.2,
            time_stop_days: 5,
            time_stop_loss_pct: 3.0,
        }
    }

    #[test]
    fn atr_levels() {
        let p = position(100.0, Some(5.0));
        assert_eq!(rules().stop_loss_level(&p), Some(90.0));
        assert_eq!(rules().take_profit_level(&p), Some(130.0));
        let now = p.entry_timestamp + Duration::days(1);
        assert_eq!(rules().check(&p, 89.0, now), Some(ExitReason::StopLoss));
        assert_eq!(rules().check(&p, 131.0, now), Some(ExitReason::TakeProfit));
        assert_eq!(rules().check(&p, 100.0, now), None);
    }

    #[test]
    fn fixed_percentages_replace_atr_levels() {
        let r = RiskRules { stop_loss_pct: Some(0.05), take_profit_pct: Some(0.1), ..rules() };
        let p = position(200.0, None);
        assert!((r.stop_loss_level(&p).unwrap() - 190.0).abs() < 1e-9);
        assert!((r.take_profit_level(&p).unwrap() - 220.0).abs() < 1e-9);
    }

    #[test]
    fn no_atr_means_no_atr_stop() {
        let p = position(100.0, None);
        let now = p.entry_timestamp + Duration::days(1);
        assert_eq!(rules().check(&p, 85.0, now), None);
    }

    #[test]
    fn trailing_stop_follows_the_peak() {
        let mut p = position(100.0, None);
        p.peak_price = 150.0;
        let now = p.entry_timestamp + Duration::days(1);
        assert_eq!(rules().check(&p, 121.0, now), None);
        assert_eq!(rules().check(&p, 119.0, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn time_stop_needs_age_and_loss() {
        let p = position(100.0, None);
        let early = p.entry_timestamp + Duration::days(2);
        let late = p.entry_timestamp + Duration::days(5);
        assert_eq!(rules().check(&p, 95.0, early), None);
        assert_eq!(rules().check(&p, 98.0, late), None);
        assert_eq!(rules().check(&p, 95.0, late), Some(ExitReason::TimeStop));
    }

    #[test]
    fn stop_loss_wins_over_time_stop() {
        let p = position(100.0, Some(1.0));
        let late = p.entry_timestamp + Duration::days(10);
        assert_eq!(rules().check(&p, 90.0, late), Some(ExitReason::StopLoss));
    }
}
