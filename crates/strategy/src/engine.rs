use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use common::{Candle, MaKind, StrategyConfig};

use crate::indicators::{
    adx, atr, defined, ema, sma, BollingerBands, MacdIndicator, RsiIndicator, Supertrend,
};

/// Computes every configured indicator over a candle window.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    cfg: StrategyConfig,
}

/// Full indicator columns aligned with the candles they were computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSeries {
    pub timestamp: Vec<DateTime<Utc>>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub sma_short: Vec<Option<f64>>,
    pub sma_long: Vec<Option<f64>>,
    pub ema_short: Vec<Option<f64>>,
    pub ema_long: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_hist: Vec<Option<f64>>,
    pub bb_upper: Vec<Option<f64>>,
    pub bb_middle: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub atr_sma: Vec<Option<f64>>,
    pub adx: Vec<Option<f64>>,
    pub volume_sma: Vec<Option<f64>>,
    /// Empty unless Supertrend is enabled.
    pub supertrend: Vec<Option<f64>>,
    pub supertrend_up: Vec<Option<bool>>,
    ma_kind: MaKind,
}

/// Indicator values for one candle, plus the previous candle's moving averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorState {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
    pub ma_short: Option<f64>,
    pub ma_long: Option<f64>,
    pub ma_short_prev: Option<f64>,
    pub ma_long_prev: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub atr_sma: Option<f64>,
    pub adx: Option<f64>,
    pub volume_sma: Option<f64>,
    pub supertrend: Option<f64>,
    pub supertrend_up: Option<bool>,
}

impl IndicatorEngine {
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    /// Number of candles after which every configured indicator, and the
    /// previous candle's moving averages, are defined.
    pub fn lookback(&self) -> usize {
        let c = &self.cfg;
        let mut lookback = [
            c.sma_long + 1,
            c.rsi_period + 1,
            MacdIndicator::new(c.macd_fast, c.macd_slow, c.macd_signal).lookback(),
            c.bollinger_period,
            2 * c.atr_period - 1,
            2 * c.adx_period,
            c.volume_sma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1);
        if c.use_supertrend {
            lookback = lookback.max(c.atr_period);
        }
        lookback.max(1)
    }

    pub fn compute(&self, candles: &[Candle]) -> IndicatorSeries {
        let c = &self.cfg;
        let closes: Vec<f64> = candles.iter().map(|k| k.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|k| k.volume).collect();
        let closes_opt = defined(&closes);

        let macd = MacdIndicator::new(c.macd_fast, c.macd_slow, c.macd_signal).series(&closes);
        let bands = BollingerBands::new(c.bollinger_period, c.bollinger_std_dev).series(&closes);
        let atr = atr(candles, c.atr_period);
        let atr_sma = sma(&atr, c.atr_period);
        let supertrend = if c.use_supertrend {
            Supertrend::new(c.atr_period, c.supertrend_multiplier).series(candles)
        } else {
            Default::default()
        };

        IndicatorSeries {
            timestamp: candles.iter().map(|k| k.timestamp).collect(),
            sma_short: sma(&closes_opt, c.sma_short),
            sma_long: sma(&closes_opt, c.sma_long),
            ema_short: ema(&closes_opt, c.sma_short),
            ema_long: ema(&closes_opt, c.sma_long),
            rsi: RsiIndicator::new(c.rsi_period).series(&closes),
            macd: macd.line,
            macd_signal: macd.signal,
            macd_hist: macd.histogram,
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            atr,
            atr_sma,
            adx: adx(candles, c.adx_period),
            volume_sma: sma(&defined(&volumes), c.volume_sma_period),
            supertrend: supertrend.line,
            supertrend_up: supertrend.up,
            close: closes,
            volume: volumes,
            ma_kind: c.ma_kind,
        }
    }

    /// State for the last candle of `window`, or `None` for an empty window.
    pub fn latest(&self, window: &[Candle]) -> Option<IndicatorState> {
        let series = self.compute(window);
        series.len().checked_sub(1).and_then(|i| series.state_at(i))
    }
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn state_at(&self, i: usize) -> Option<IndicatorState> {
        if i >= self.len() {
            return None;
        }
        let (short, long) = match self.ma_kind {
            MaKind::Sma => (&self.sma_short, &self.sma_long),
            MaKind::Ema => (&self.ema_short, &self.ema_long),
        };
        let prev = |col: &Vec<Option<f64>>| i.checked_sub(1).and_then(|p| col[p]);
        let opt = |col: &Vec<Option<f64>>| col.get(i).copied().flatten();

        Some(IndicatorState {
            timestamp: self.timestamp[i],
            close: self.close[i],
            volume: self.volume[i],
            ma_short: short[i],
            ma_long: long[i],
            ma_short_prev: prev(short),
            ma_long_prev: prev(long),
            rsi: self.rsi[i],
            macd: self.macd[i],
            macd_signal: self.macd_signal[i],
            macd_hist: self.macd_hist[i],
            bb_upper: self.bb_upper[i],
            bb_middle: self.bb_middle[i],
            bb_lower: self.bb_lower[i],
            atr: self.atr[i],
            atr_sma: self.atr_sma[i],
            adx: self.adx[i],
            volume_sma: self.volume_sma[i],
            supertrend: opt(&self.supertrend),
            supertrend_up: self.supertrend_up.get(i).copied().flatten(),
        })
    }
}

impl IndicatorState {
    /// Ordered name → value map, as recorded with every decision.
    pub fn snapshot(&self) -> BTreeMap<String, Option<f64>> {
        let mut map = BTreeMap::new();
        let mut put = |k: &str, v: Option<f64>| {
            map.insert(k.to_string(), v);
        };
        put("close", Some(self.close));
        put("volume", Some(self.volume));
        put("ma_short", self.ma_short);
        put("ma_long", self.ma_long);
        put("ma_short_prev", self.ma_short_prev);
        put("ma_long_prev", self.ma_long_prev);
        put("rsi", self.rsi);
        put("macd", self.macd);
        put("macd_signal", self.macd_signal);
        put("macd_hist", self.macd_hist);
        put("bb_upper", self.bb_upper);
        put("bb_middle", self.bb_middle);
        put("bb_lower", self.bb_lower);
        put("atr", self.atr);
        put("atr_sma", self.atr_sma);
        put("adx", self.adx);
        put("volume_sma", self.volume_sma);
        put("supertrend", self.supertrend);
        put("supertrend_up", self.supertrend_up.map(|up| if up { 1.0 } else { 0.0 }));
        map
    }
}
