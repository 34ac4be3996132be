use super::{defined, sma};

/// Bollinger Bands: SMA(period) ± k × sample standard deviation (n − 1).
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        Self { period, std_dev }
    }

    pub fn series(&self, closes: &[f64]) -> BollingerSeries {
        let n = closes.len();
        let middle = sma(&defined(closes), self.period);
        let mut upper = vec![None; n];
        let mut lower = vec![None; n];

        if self.period >= 2 {
            for i in 0..n {
                let Some(mean) = middle[i] else { continue };
                let window = &closes[i + 1 - self.period..=i];
                let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
                    / (self.period - 1) as f64;
                let band = self.std_dev * variance.sqrt();
                upper[i] = Some(mean + band);
                lower[i] = Some(mean - band);
            }
        }

        BollingerSeries { upper, middle, lower }
    }
}
