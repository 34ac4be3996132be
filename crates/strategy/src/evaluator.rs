use std::collections::BTreeMap;

use tracing::debug;

use common::{Candle, Regime, RunContext, StrategyConfig};

use crate::engine::{IndicatorEngine, IndicatorState};

pub const INSUFFICIENT_HISTORY: &str = "insufficient history";

/// Entry rules evaluated against one indicator state.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryEvaluation {
    pub fired: bool,
    /// Rule set that was evaluated; stored on the position when `fired`.
    pub regime: Regime,
    pub conditions: BTreeMap<String, bool>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvaluation {
    pub fired: bool,
    pub conditions: BTreeMap<String, bool>,
    pub reason: String,
}

/// Stateless entry/exit rules over [`IndicatorState`].
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    cfg: StrategyConfig,
    lateral_mode: bool,
    engine: IndicatorEngine,
}

struct TrendInputs {
    ma_short: f64,
    ma_long: f64,
    ma_short_prev: f64,
    ma_long_prev: f64,
    macd: f64,
    macd_hist: f64,
    rsi: f64,
    volume_sma: f64,
    adx: f64,
    atr: f64,
    atr_sma: f64,
    supertrend_up: Option<bool>,
}

impl SignalEvaluator {
    /// Range rules are off until [`with_lateral_mode`](Self::with_lateral_mode) enables them.
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self { cfg: cfg.clone(), lateral_mode: false, engine: IndicatorEngine::new(cfg) }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        Self::new(&ctx.config.strategy).with_lateral_mode(ctx.config.general.lateral_mode)
    }

    pub fn with_lateral_mode(mut self, enabled: bool) -> Self {
        self.lateral_mode = enabled;
        self
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    /// True when the last candle of `window` fires an entry.
    pub fn entry_signal(&self, window: &[Candle]) -> bool {
        self.engine
            .latest(window)
            .map(|state| self.evaluate_entry(&state).fired)
            .unwrap_or(false)
    }

    /// True when the last candle of `window` fires the exit rules of `regime`.
    pub fn exit_signal(&self, window: &[Candle], regime: Regime) -> bool {
        self.engine
            .latest(window)
            .map(|state| self.evaluate_exit(&state, regime).fired)
            .unwrap_or(false)
    }

    pub fn evaluate_entry(&self, s: &IndicatorState) -> EntryEvaluation {
        let Some(adx) = s.adx else {
            return EntryEvaluation::insufficient();
        };
        let lateral = adx < self.cfg.lateral_adx_threshold;

        if self.lateral_mode && lateral {
            let (Some(bb_lower), Some(volume_sma), Some(rsi)) = (s.bb_lower, s.volume_sma, s.rsi)
            else {
                return EntryEvaluation::insufficient();
            };
            let mut conditions = BTreeMap::new();
            conditions.insert("lateral_market".to_string(), true);
            conditions.insert(
                "buy_near_support".to_string(),
                s.close < bb_lower * self.cfg.support_margin * 1.02,
            );
            conditions.insert("volume_confirmation".to_string(), s.volume > 1.5 * volume_sma);
            conditions.insert("rsi_not_oversold".to_string(), rsi > 20.0);

            let fired = conditions.values().all(|&c| c);
            let reason = if fired {
                "range entry: price near support on volume".to_string()
            } else {
                failed_reason("range entry", &conditions)
            };
            debug!(fired, regime = %Regime::Range, "Entry evaluated");
            return EntryEvaluation { fired, regime: Regime::Range, conditions, reason };
        }

        let Some(t) = self.trend_inputs(s) else {
            return EntryEvaluation::insufficient();
        };
        let mut conditions = BTreeMap::new();
        conditions.insert("lateral_market".to_string(), lateral);
        let main = [
            ("ma_crossover", t.ma_short > t.ma_long && t.ma_short_prev > t.ma_long_prev),
            ("macd_above_signal", t.macd_hist > -self.cfg.macd_threshold),
            ("rsi_below_threshold", t.rsi < self.cfg.rsi_threshold),
        ];
        let secondary = [
            ("volume_above_sma", s.volume > 1.2 * t.volume_sma),
            ("supertrend_uptrend", !self.cfg.use_supertrend || t.supertrend_up == Some(true)),
            ("adx_trend", !self.cfg.use_adx_positive || t.adx > self.cfg.adx_threshold),
            ("macd_positive", !self.cfg.use_macd_positive || t.macd > 0.0),
            ("volatility_filter", t.atr > t.atr_sma),
        ];
        let main_pass = main.iter().all(|(_, c)| *c);
        let secondary_count = secondary.iter().filter(|(_, c)| *c).count();
        for (name, value) in main.into_iter().chain(secondary) {
            conditions.insert(name.to_string(), value);
        }

        let fired = main_pass && secondary_count >= self.cfg.min_secondary_conditions;
        let reason = if fired {
            format!("trend entry: {secondary_count}/5 secondary filters")
        } else if !main_pass {
            failed_reason("trend entry", &conditions)
        } else {
            format!(
                "trend entry: only {secondary_count}/5 secondary filters, need {}",
                self.cfg.min_secondary_conditions
            )
        };
        debug!(fired, regime = %Regime::Trend, secondary_count, "Entry evaluated");
        EntryEvaluation { fired, regime: Regime::Trend, conditions, reason }
    }

    pub fn evaluate_exit(&self, s: &IndicatorState, regime: Regime) -> ExitEvaluation {
        let mut conditions = BTreeMap::new();
        match regime {
            Regime::Range => {
                let Some(bb_upper) = s.bb_upper else {
                    return ExitEvaluation::insufficient();
                };
                let near_resistance = s.close > bb_upper * self.cfg.resistance_margin;
                conditions.insert("sell_near_resistance".to_string(), near_resistance);
                ExitEvaluation {
                    fired: near_resistance,
                    conditions,
                    reason: if near_resistance {
                        "range exit: price at resistance".to_string()
                    } else {
                        "range exit: below resistance".to_string()
                    },
                }
            }
            Regime::Trend => {
                let Some(hist) = s.macd_hist else {
                    return ExitEvaluation::insufficient();
                };
                if self.cfg.use_supertrend && s.supertrend_up.is_none() {
                    return ExitEvaluation::insufficient();
                }
                let macd_below = hist < -self.cfg.macd_threshold;
                let supertrend_down = self.cfg.use_supertrend && s.supertrend_up == Some(false);
                conditions.insert("macd_below_signal".to_string(), macd_below);
                conditions.insert("supertrend_downtrend".to_string(), supertrend_down);

                let reason = match (macd_below, supertrend_down) {
                    (true, _) => "trend exit: MACD below signal",
                    (false, true) => "trend exit: Supertrend turned down",
                    (false, false) => "trend exit: trend intact",
                };
                ExitEvaluation { fired: macd_below || supertrend_down, conditions, reason: reason.to_string() }
            }
        }
    }

    fn trend_inputs(&self, s: &IndicatorState) -> Option<TrendInputs> {
        let supertrend_up = if self.cfg.use_supertrend { Some(s.supertrend_up?) } else { None };
        Some(TrendInputs {
            ma_short: s.ma_short?,
            ma_long: s.ma_long?,
            ma_short_prev: s.ma_short_prev?,
            ma_long_prev: s.ma_long_prev?,
            macd: s.macd?,
            macd_hist: s.macd_hist?,
            rsi: s.rsi?,
            volume_sma: s.volume_sma?,
            adx: s.adx?,
            atr: s.atr?,
            atr_sma: s.atr_sma?,
            supertrend_up,
        })
    }
}

impl EntryEvaluation {
    fn insufficient() -> Self {
        Self {
            fired: false,
            regime: Regime::Trend,
            conditions: BTreeMap::new(),
            reason: INSUFFICIENT_HISTORY.to_string(),
        }
    }
}

impl ExitEvaluation {
    fn insufficient() -> Self {
        Self { fired: false, conditions: BTreeMap::new(), reason: INSUFFICIENT_HISTORY.to_string() }
    }
}

fn failed_reason(label: &str, conditions: &BTreeMap<String, bool>) -> String {
    let failed: Vec<&str> = conditions
        .iter()
        .filter(|(_, &v)| !v)
        .map(|(k, _)| k.as_str())
        .collect();
    format!("{label}: failed {}", failed.join(", "))
}
