use super::{defined, ema};

/// MACD (Moving Average Convergence/Divergence).
///
/// Line = EMA(fast) − EMA(slow), defined from index `slow - 1`.
/// Signal = EMA(signal) of the line, seeded the same way, so it is defined
/// from index `slow + signal - 2`. Histogram = line − signal.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdSeries {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }

    /// Candles needed before the histogram is defined.
    pub fn lookback(&self) -> usize {
        self.slow + self.signal - 1
    }

    pub fn series(&self, closes: &[f64]) -> MacdSeries {
        let closes = defined(closes);
        let fast = ema(&closes, self.fast);
        let slow = ema(&closes, self.slow);

        let line: Vec<Option<f64>> = fast
            .iter()
            .zip(&slow)
            .map(|(f, s)| Some((*f)? - (*s)?))
            .collect();
        let signal = ema(&line, self.signal);
        let histogram = line
            .iter()
            .zip(&signal)
            .map(|(l, s)| Some((*l)? - (*s)?))
            .collect();

        MacdSeries { line, signal, histogram }
    }
}
