//! Indicator series over candle history.
//!
//! Every function returns one `Option<f64>` per input element. Warm-up
//! positions are `None`. All outputs are causal: the value at index `i`
//! depends only on inputs `0..=i`.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod supertrend;

pub use adx::adx;
pub use atr::{atr, true_range};
pub use bollinger::{BollingerBands, BollingerSeries};
pub use macd::{MacdIndicator, MacdSeries};
pub use moving_average::{ema, sma, wilder_smooth};
pub use rsi::RsiIndicator;
pub use supertrend::{Supertrend, SupertrendSeries};

/// Lift a plain slice into the `Option` form the smoothing helpers take.
pub(crate) fn defined(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|&v| Some(v)).collect()
}
