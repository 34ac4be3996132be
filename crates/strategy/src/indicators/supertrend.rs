//! Supertrend: ATR bands around the candle midpoint that only tighten while
//! the trend holds. Direction flips when the close crosses the active band.

use common::Candle;

use super::atr;

#[derive(Debug, Clone)]
pub struct Supertrend {
    pub period: usize,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupertrendSeries {
    /// Active band: lower band in an uptrend, upper band in a downtrend.
    pub line: Vec<Option<f64>>,
    pub up: Vec<Option<bool>>,
}

impl Supertrend {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self { period, multiplier }
    }

    pub fn series(&self, candles: &[Candle]) -> SupertrendSeries {
        let n = candles.len();
        let mut out = SupertrendSeries { line: vec![None; n], up: vec![None; n] };
        let atr = atr(candles, self.period);
        let Some(start) = atr.iter().position(Option::is_some) else {
            return out;
        };

        let band = |i: usize, a: f64| {
            let hl2 = (candles[i].high + candles[i].low) / 2.0;
            (hl2 + self.multiplier * a, hl2 - self.multiplier * a)
        };

        let Some(a0) = atr[start] else { return out };
        let (mut upper, mut lower) = band(start, a0);
        let mut trending_up = true;
        out.line[start] = Some(lower);
        out.up[start] = Some(true);

        for i in (start + 1)..n {
            let Some(a) = atr[i] else { break };
            let (basic_upper, basic_lower) = band(i, a);
            let prev_close = candles[i - 1].close;

            upper = if prev_close <= upper { basic_upper.min(upper) } else { basic_upper };
            lower = if prev_close >= lower { basic_lower.max(lower) } else { basic_lower };

            if trending_up && candles[i].close < lower {
                trending_up = false;
            } else if !trending_up && candles[i].close > upper {
                trending_up = true;
            }

            out.line[i] = Some(if trending_up { lower } else { upper });
            out.up[i] = Some(trending_up);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::atr::tests::bars;

    #[test]
    fn uptrend_stays_below_price() {
        let data: Vec<_> = (0..15)
            .map(|i| {
                let b = 100.0 + i as f64 * 2.0;
                (b - 1.0, b + 3.0, b - 3.0, b + 1.0)
            })
            .collect();
        let candles = bars(&data);
        let st = Supertrend::new(3, 2.0).series(&candles);
        for i in 5..15 {
            assert_eq!(st.up[i], Some(true));
            assert!(st.line[i].unwrap() < candles[i].close);
        }
    }

    #[test]
    fn downtrend_flips_direction() {
        let data: Vec<_> = (0..15)
            .map(|i| {
                let b = 200.0 - i as f64 * 3.0;
                (b + 1.0, b + 3.0, b - 3.0, b - 1.0)
            })
            .collect();
        let st = Supertrend::new(3, 2.0).series(&bars(&data));
        assert!(st.up.iter().any(|d| *d == Some(false)));
    }

    #[test]
    fn too_few_bars() {
        let st = Supertrend::new(3, 2.0).series(&bars(&[(100.0, 105.0, 95.0, 102.0)]));
        assert!(st.line.iter().all(Option::is_none));
    }
}
