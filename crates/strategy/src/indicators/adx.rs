//! ADX (Wilder).
//!
//! +DM/−DM and true range are Wilder-smoothed from the second candle,
//! DX = 100 × |+DI − −DI| / (+DI + −DI), ADX = Wilder-smoothed DX.
//! Defined from index `2 * period - 1`.

use common::Candle;

use super::{true_range, wilder_smooth};

pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    if n < 2 {
        return vec![None; n];
    }

    let tr = true_range(candles);
    let mut plus_dm = vec![None; n];
    let mut minus_dm = vec![None; n];
    let mut range = vec![None; n];
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        plus_dm[i] = Some(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm[i] = Some(if down > up && down > 0.0 { down } else { 0.0 });
        range[i] = Some(tr[i]);
    }

    let smooth_tr = wilder_smooth(&range, period);
    let smooth_plus = wilder_smooth(&plus_dm, period);
    let smooth_minus = wilder_smooth(&minus_dm, period);

    let dx: Vec<Option<f64>> = (0..n)
        .map(|i| {
            let tr = smooth_tr[i]?;
            if tr == 0.0 {
                return Some(0.0);
            }
            let plus_di = 100.0 * smooth_plus[i]? / tr;
            let minus_di = 100.0 * smooth_minus[i]? / tr;
            let sum = plus_di + minus_di;
            Some(if sum == 0.0 { 0.0 } else { 100.0 * (plus_di - minus_di).abs() / sum })
        })
        .collect();

    wilder_smooth(&dx, period)
}
