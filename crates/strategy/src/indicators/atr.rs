use common::Candle;

use super::wilder_smooth;

/// True range per candle. The first candle has no previous close, so its
/// range is `high - low`.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let hl = c.high - c.low;
            match i.checked_sub(1).map(|p| candles[p].close) {
                Some(pc) => hl.max((c.high - pc).abs()).max((c.low - pc).abs()),
                None => hl,
            }
        })
        .collect()
}

/// Average True Range: Wilder-smoothed true range, seeded with the SMA of the
/// first `period` ranges. Defined from index `period - 1`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let tr: Vec<Option<f64>> = true_range(candles).into_iter().map(Some).collect();
    wilder_smooth(&tr, period)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn bars(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: t0 + Duration::days(i as i64),
                open,
                high,
                low,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn true_range_uses_gaps() {
        let candles = bars(&[(10.0, 12.0, 9.0, 11.0), (15.0, 16.0, 14.0, 15.0)]);
        let tr = true_range(&candles);
        assert_eq!(tr, vec![3.0, 5.0]);
    }

    #[test]
    fn atr_of_constant_range() {
        let data: Vec<_> = (0..10).map(|_| (100.0, 102.0, 98.0, 100.0)).collect();
        let out = atr(&bars(&data), 3);
        assert!(out[..2].iter().all(Option::is_none));
        assert!(out[2..].iter().all(|v| *v == Some(4.0)));
    }
}
