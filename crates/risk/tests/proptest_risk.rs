use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::{ExitReason, Regime, TradeSource};
use risk::{CostModel, PositionBook, RiskRules};

fn rules(trailing: f64) -> RiskRules {
    RiskRules {
        stop_loss_atr_multiplier: 1.5,
        stop_loss_pct: None,
        take_profit_multiplier: 3.0,
        take_profit_pct: None,
        trailing_stop_percentage: trailing,
        time_stop_days: 3,
        time_stop_loss_pct: 2.0,
    }
}

proptest! {
    /// Whatever the prices and costs, cash never goes negative and a close is
    /// only ever planned against exactly one open position.
    #[test]
    fn balance_never_negative_and_single_position(
        prices in prop::collection::vec(0.01f64..100_000.0, 2..80),
        fraction in 0.01f64..=1.0,
        fee in 0.0f64..0.05,
        spread in 0.0f64..0.05,
        slippage in 0.0f64..0.05,
        trailing in 0.01f64..0.5,
        atr in prop::option::of(0.01f64..5_000.0),
    ) {
        let cost = CostModel { trade_fee: fee, spread, slippage };
        let mut book = PositionBook::new(10_000.0, fraction, cost, rules(trailing));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut opens = 0u32;
        let mut closes = 0u32;

        for (i, &price) in prices.iter().enumerate() {
            let now = t0 + Duration::days(i as i64);
            if book.is_open() {
                prop_assert!(book.plan_open(price, now, TradeSource::Auto, atr, Regime::Trend).is_none());
                let reason = book.check_exit(price, now).unwrap_or(ExitReason::Signal);
                let trade = book.plan_close(price, now, reason).unwrap();
                prop_assert!(trade.balance_after >= 0.0);
                prop_assert!(trade.fees_paid >= 0.0);
                book.commit_close(&trade);
                closes += 1;
            } else {
                prop_assert!(book.plan_close(price, now, ExitReason::Signal).is_none());
                if let Some(pending) = book.plan_open(price, now, TradeSource::Auto, atr, Regime::Trend) {
                    prop_assert!(pending.order().notional() * (1.0 + fee) <= book.balance() * (1.0 + 1e-9));
                    book.commit_open(pending);
                    opens += 1;
                }
            }
            prop_assert!(book.balance() >= 0.0);
            prop_assert!(opens - closes <= 1);
        }
    }

    /// The trailing peak never retreats, whatever closes are observed.
    #[test]
    fn peak_is_monotonic(closes in prop::collection::vec(1.0f64..1_000.0, 1..50)) {
        let mut book = PositionBook::new(1_000.0, 1.0, CostModel::frictionless(), rules(0.99));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pending = book.plan_open(100.0, t0, TradeSource::Manual, None, Regime::Range).unwrap();
        book.commit_open(pending);

        let mut last_peak = 100.0;
        for close in closes {
            book.observe(close);
            let peak = book.position().unwrap().peak_price;
            prop_assert!(peak >= last_peak);
            prop_assert!(peak >= close);
            last_peak = peak;
        }
    }
}
