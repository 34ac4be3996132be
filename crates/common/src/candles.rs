use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Candle, DataConfig, Error, Interval, Result};

/// An ordered, validated OHLCV history.
///
/// Construction guarantees strictly increasing timestamps and
/// `low <= min(open, close) <= max(open, close) <= high` on every candle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "timestamp")]
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(alias = "open", rename = "Open")]
    open: f64,
    #[serde(alias = "high", rename = "High")]
    high: f64,
    #[serde(alias = "low", rename = "Low")]
    low: f64,
    #[serde(alias = "close", rename = "Close")]
    close: f64,
    #[serde(alias = "volume", rename = "Volume")]
    volume: f64,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for (i, c) in candles.iter().enumerate() {
            let values = [c.open, c.high, c.low, c.close, c.volume];
            if values.iter().any(|v| !v.is_finite()) || c.volume < 0.0 {
                return Err(Error::Config(format!(
                    "candle {i} at {} has non-finite or negative values",
                    c.timestamp
                )));
            }
            if c.high < c.open.max(c.close) || c.low > c.open.min(c.close) {
                return Err(Error::Config(format!(
                    "candle {i} at {} is inconsistent: high {} low {} open {} close {}",
                    c.timestamp, c.high, c.low, c.open, c.close
                )));
            }
            if i > 0 && candles[i - 1].timestamp >= c.timestamp {
                return Err(Error::Config(format!(
                    "candle timestamps must be strictly increasing: {} is not after {}",
                    c.timestamp,
                    candles[i - 1].timestamp
                )));
            }
        }
        Ok(Self { candles })
    }

    /// Load the configured file, restrict it to the configured dates and
    /// resample it to the evaluation interval.
    pub fn load(cfg: &DataConfig) -> Result<Self> {
        let raw = Self::from_csv_path(&cfg.file_path)?;
        let series = raw.filter_dates(cfg.start_date, cfg.end_date).resample(cfg.interval);
        debug!(
            raw = raw.len(),
            resampled = series.len(),
            interval = %cfg.interval,
            "Prepared candle series"
        );
        Ok(series)
    }

    /// Load a `Timestamp,Open,High,Low,Close,Volume` CSV file.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Feed(format!("cannot open candle file '{}': {e}", path.display()))
        })?;
        let series = Self::from_csv_reader(file)?;
        debug!(path = %path.display(), candles = series.len(), "Loaded candles");
        Ok(series)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut candles = Vec::new();
        for row in csv_reader.deserialize() {
            let row: CsvRow = row?;
            candles.push(Candle {
                timestamp: parse_timestamp(&row.timestamp)?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        Self::new(candles)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Keep candles whose calendar date falls in `[start, end]`. Either bound may be open.
    pub fn filter_dates(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let candles = self
            .candles
            .iter()
            .filter(|c| {
                let day = c.timestamp.date_naive();
                start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e)
            })
            .copied()
            .collect();
        Self { candles }
    }

    /// Aggregate into buckets of `interval` aligned to the Unix epoch:
    /// first open, max high, min low, last close, summed volume.
    ///
    /// Buckets with no source candle are dropped; each run of missing buckets
    /// is reported as a [`Error::DataGap`] warning, never as a failure.
    pub fn resample(&self, interval: Interval) -> Self {
        let width = interval.seconds();
        let mut out: Vec<Candle> = Vec::new();
        for c in &self.candles {
            let start = bucket_start(c.timestamp, width);
            match out.last_mut() {
                Some(bucket) if bucket.timestamp == start => {
                    bucket.high = bucket.high.max(c.high);
                    bucket.low = bucket.low.min(c.low);
                    bucket.close = c.close;
                    bucket.volume += c.volume;
                }
                _ => out.push(Candle { timestamp: start, ..*c }),
            }
        }

        for pair in out.windows(2) {
            let missing = (pair[1].timestamp - pair[0].timestamp).num_seconds() / width - 1;
            if missing > 0 {
                let gap = Error::DataGap(format!(
                    "{missing} empty {interval} bucket(s) between {} and {}",
                    pair[0].timestamp, pair[1].timestamp
                ));
                warn!(%gap, "Resampling skipped empty buckets");
            }
        }

        Self { candles: out }
    }

    /// Resample raw candles and keep the buckets that are closed at `now`
    /// and that the raw data actually reaches the end of.
    ///
    /// A lagging feed therefore never completes a bucket on a partial close.
    pub fn closed_buckets(&self, interval: Interval, now: DateTime<Utc>) -> Self {
        let cutoff = self.data_end().map_or(now, |end| end.min(now));
        self.resample(interval).completed(interval, cutoff)
    }

    /// Close time of the newest raw candle, its width taken from the tightest
    /// spacing in the series. `None` with fewer than two candles.
    fn data_end(&self) -> Option<DateTime<Utc>> {
        let width = self.candles.windows(2).map(|w| w[1].timestamp - w[0].timestamp).min()?;
        Some(self.candles.last()?.timestamp + width)
    }

    /// Drop the trailing bucket if it is still in progress at `now`.
    pub fn completed(&self, interval: Interval, now: DateTime<Utc>) -> Self {
        let candles = self
            .candles
            .iter()
            .take_while(|c| c.timestamp + interval.duration() <= now)
            .copied()
            .collect();
        Self { candles }
    }

    /// The first `len` candles.
    pub fn prefix(&self, len: usize) -> Self {
        Self { candles: self.candles[..len.min(self.candles.len())].to_vec() }
    }
}

fn bucket_start(ts: DateTime<Utc>, width: i64) -> DateTime<Utc> {
    let secs = ts.timestamp().div_euclid(width) * width;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
}

/// Accepts RFC 3339, `YYYY-mm-dd HH:MM:SS`, `YYYY-mm-dd` or Unix seconds.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(ts);
        }
    }
    Err(Error::Config(format!("unparseable candle timestamp '{raw}'")))
}
