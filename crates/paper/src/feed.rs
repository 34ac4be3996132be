use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use common::{CandleSeries, Error, Result};

/// Source of raw candles for the paper-trading loop.
///
/// `reload` is called on every evaluation cycle; the feed is expected to be
/// refreshed by an external updater between calls.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn reload(&self) -> Result<CandleSeries>;

    /// Close of the newest raw candle, completed or not.
    async fn latest_price(&self) -> Result<f64> {
        self.reload()
            .await?
            .last()
            .map(|c| c.close)
            .ok_or_else(|| Error::Feed("feed has no candles".into()))
    }
}

/// Re-reads a candle CSV file on every call.
pub struct CsvFeed {
    path: PathBuf,
}

impl CsvFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandleFeed for CsvFeed {
    async fn reload(&self) -> Result<CandleSeries> {
        let path = self.path.clone();
        let series = tokio::task::spawn_blocking(move || CandleSeries::from_csv_path(path))
            .await
            .map_err(|e| Error::Feed(format!("candle reader task failed: {e}")))??;
        debug!(path = %self.path.display(), candles = series.len(), "Feed reloaded");
        Ok(series)
    }
}

/// In-memory feed, replaced wholesale with [`MemoryFeed::set`].
#[derive(Default)]
pub struct MemoryFeed {
    series: RwLock<CandleSeries>,
}

impl MemoryFeed {
    pub fn new(series: CandleSeries) -> Self {
        Self { series: RwLock::new(series) }
    }

    pub async fn set(&self, series: CandleSeries) {
        *self.series.write().await = series;
    }
}

#[async_trait]
impl CandleFeed for MemoryFeed {
    async fn reload(&self) -> Result<CandleSeries> {
        Ok(self.series.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn csv_feed_sees_appended_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Timestamp,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-01,100,101,99,100.5,3").unwrap();
        file.flush().unwrap();

        let feed = CsvFeed::new(file.path());
        assert_eq!(feed.reload().await.unwrap().len(), 1);
        assert_eq!(feed.latest_price().await.unwrap(), 100.5);

        writeln!(file, "2024-01-02,100.5,103,100,102.25,4").unwrap();
        file.flush().unwrap();
        assert_eq!(feed.reload().await.unwrap().len(), 2);
        assert_eq!(feed.latest_price().await.unwrap(), 102.25);
    }

    #[tokio::test]
    async fn missing_file_is_a_feed_error() {
        let feed = CsvFeed::new("/nonexistent/candles.csv");
        assert!(matches!(feed.reload().await, Err(Error::Feed(_))));
    }

    #[tokio::test]
    async fn empty_memory_feed_has_no_price() {
        let feed = MemoryFeed::default();
        assert!(matches!(feed.latest_price().await, Err(Error::Feed(_))));
    }
}
