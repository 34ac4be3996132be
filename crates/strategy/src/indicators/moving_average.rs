/// Simple moving average. Defined once `period` consecutive inputs are defined.
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if let Some(sum) = window.iter().copied().sum::<Option<f64>>() {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

/// Exponential moving average with `k = 2 / (period + 1)`, seeded with the
/// SMA of the first `period` defined inputs.
pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    recursive_average(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder's smoothing (`alpha = 1 / period`), seeded the same way as [`ema`].
pub fn wilder_smooth(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    recursive_average(values, period, 1.0 / period as f64)
}

fn recursive_average(values: &[Option<f64>], period: usize, alpha: f64) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 {
        return out;
    }
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };
    let seed_end = start + period;
    if seed_end > n {
        return out;
    }
    let Some(seed) = values[start..seed_end].iter().copied().sum::<Option<f64>>() else {
        return out;
    };

    let mut prev = seed / period as f64;
    out[seed_end - 1] = Some(prev);
    for i in seed_end..n {
        // A hole after warm-up ends the series rather than re-seeding it.
        let Some(v) = values[i] else { break };
        prev = alpha * v + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}
