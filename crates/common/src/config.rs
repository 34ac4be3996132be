use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Full run configuration, loaded once from a TOML document.
///
/// Example `config/swingbot.toml`:
/// ```toml
/// [general]
/// initial_capital = 1000.0
/// trade_fee = 0.0026
/// spread = 0.0004
/// slippage = 0.0005
/// investment_fraction = 1.0
///
/// [strategy]
/// sma_short = 10
/// sma_long = 50
/// # ...
///
/// [data]
/// file_path = "data/ohlc_60min.csv"
/// interval = "1D"
/// ```
///
/// Every group rejects unknown keys. Call [`AppConfig::validate`] (done by
/// [`AppConfig::load`] and [`AppConfig::from_toml_str`]) before use.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub strategy: StrategyConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    pub initial_capital: f64,
    /// Proportional fee per fill (0.0026 = 0.26%).
    pub trade_fee: f64,
    /// Full bid/ask spread as a fraction of price; each fill pays half of it.
    pub spread: f64,
    /// Adverse price offset per fill as a fraction of price.
    pub slippage: f64,
    /// Fraction of the available balance committed to each entry.
    pub investment_fraction: f64,
    /// Allow the range rule set when ADX says the market is sideways.
    #[serde(default = "default_true")]
    pub lateral_mode: bool,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Number of backtest run directories kept under `results_dir`.
    #[serde(default = "default_cleanup_limit")]
    pub results_cleanup_limit: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000.0,
            trade_fee: 0.0026,
            spread: 0.0,
            slippage: 0.0,
            investment_fraction: 1.0,
            lateral_mode: true,
            results_dir: default_results_dir(),
            results_cleanup_limit: default_cleanup_limit(),
        }
    }
}

/// Which moving-average family drives the crossover condition.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MaKind {
    #[default]
    Sma,
    Ema,
}

/// Indicator periods, thresholds, multipliers and feature toggles.
/// Immutable once built; fully determines signal behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub sma_short: usize,
    pub sma_long: usize,
    #[serde(default)]
    pub ma_kind: MaKind,
    pub rsi_period: usize,
    pub rsi_threshold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Tolerance on the MACD histogram for entries and exits.
    pub macd_threshold: f64,
    pub volume_sma_period: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
    /// ADX below this marks a sideways market.
    pub lateral_adx_threshold: f64,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub use_supertrend: bool,
    pub supertrend_multiplier: f64,
    pub use_adx_positive: bool,
    pub use_macd_positive: bool,
    /// How many of the five secondary trend filters must pass.
    #[serde(default = "default_min_secondary")]
    pub min_secondary_conditions: usize,
    pub support_margin: f64,
    pub resistance_margin: f64,
    pub stop_loss_atr_multiplier: f64,
    /// Fixed stop distance as a fraction of entry; replaces the ATR stop when set.
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    pub take_profit_multiplier: f64,
    /// Fixed target distance as a fraction of entry; replaces the ATR target when set.
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    pub trailing_stop_percentage: f64,
    /// Minimum holding time before the time stop may fire. 0 disables it.
    pub time_stop_days: u32,
    /// Unrealized loss, in percent, the time stop requires.
    pub time_stop_loss_pct: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            sma_short: 10,
            sma_long: 30,
            ma_kind: MaKind::Sma,
            rsi_period: 14,
            rsi_threshold: 70.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            macd_threshold: 0.0,
            volume_sma_period: 20,
            atr_period: 14,
            adx_period: 14,
            adx_threshold: 20.0,
            lateral_adx_threshold: 15.0,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            use_supertrend: false,
            supertrend_multiplier: 3.0,
            use_adx_positive: true,
            use_macd_positive: false,
            min_secondary_conditions: default_min_secondary(),
            support_margin: 1.0,
            resistance_margin: 1.0,
            stop_loss_atr_multiplier: 1.5,
            stop_loss_pct: None,
            take_profit_multiplier: 3.0,
            take_profit_pct: None,
            trailing_stop_percentage: 0.03,
            time_stop_days: 0,
            time_stop_loss_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub file_path: PathBuf,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Evaluation unit the raw candles are resampled to.
    #[serde(default = "default_interval")]
    pub interval: Interval,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("data/ohlc.csv"),
            start_date: None,
            end_date: None,
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PaperConfig {
    /// Distinguishes this process's rows in a shared store.
    pub bot_name: String,
    pub evaluation_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub min_trade_volume: f64,
    pub min_order_notional: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            bot_name: "live_paper".to_string(),
            evaluation_interval_secs: 60,
            monitor_interval_secs: 5,
            min_trade_volume: 0.0001,
            min_order_notional: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_write_retries: u32,
    /// Base delay; doubles on every retry.
    pub retry_backoff_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://results/swingbot.db".to_string(),
            max_write_retries: 5,
            retry_backoff_ms: 50,
            busy_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct OptimizationConfig {
    /// Fitness = return % − penalty × max drawdown %.
    pub drawdown_penalty: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self { drawdown_penalty: 0.5 }
    }
}

/// A resampling bucket width such as `"1D"`, `"4H"`, `"60min"` or `"15m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    seconds: i64,
}

impl Interval {
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(Error::Config(format!("interval must be positive, got {seconds}s")));
        }
        // chrono durations hold milliseconds in an i64
        if seconds > i64::MAX / 1_000 {
            return Err(Error::Config(format!("interval of {seconds}s is out of range")));
        }
        Ok(Self { seconds })
    }

    pub fn daily() -> Self {
        Self { seconds: 86_400 }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::Config(format!("interval '{s}' has no unit")))?;
        let (count, unit) = s.split_at(split);
        let count: i64 = count
            .parse()
            .map_err(|_| Error::Config(format!("interval '{s}' has no count")))?;
        let unit_secs = match unit.to_lowercase().as_str() {
            "s" | "sec" => 1,
            "m" | "min" | "t" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 7 * 86_400,
            other => return Err(Error::Config(format!("unknown interval unit '{other}' in '{s}'"))),
        };
        let seconds = count
            .checked_mul(unit_secs)
            .ok_or_else(|| Error::Config(format!("interval '{s}' is out of range")))?;
        Interval::from_seconds(seconds)
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}D", s / 86_400)
        } else if s % 3_600 == 0 {
            write!(f, "{}H", s / 3_600)
        } else if s % 60 == 0 {
            write!(f, "{}min", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config at '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.general.validate()?;
        self.strategy.validate()?;
        self.data.validate()?;
        self.paper.validate()?;
        self.store.validate()?;
        if !(self.optimization.drawdown_penalty >= 0.0) {
            return Err(out_of_range("optimization.drawdown_penalty", self.optimization.drawdown_penalty));
        }
        Ok(())
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<()> {
        ensure_range("general.initial_capital", self.initial_capital, f64::MIN_POSITIVE, f64::MAX)?;
        ensure_range("general.trade_fee", self.trade_fee, 0.0, 0.1)?;
        ensure_range("general.spread", self.spread, 0.0, 0.1)?;
        ensure_range("general.slippage", self.slippage, 0.0, 0.1)?;
        ensure_range("general.investment_fraction", self.investment_fraction, f64::MIN_POSITIVE, 1.0)?;
        if self.results_cleanup_limit == 0 {
            return Err(out_of_range("general.results_cleanup_limit", 0.0));
        }
        Ok(())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, period) in [
            ("strategy.sma_short", self.sma_short),
            ("strategy.sma_long", self.sma_long),
            ("strategy.macd_fast", self.macd_fast),
            ("strategy.macd_slow", self.macd_slow),
            ("strategy.macd_signal", self.macd_signal),
            ("strategy.volume_sma_period", self.volume_sma_period),
            ("strategy.atr_period", self.atr_period),
            ("strategy.adx_period", self.adx_period),
            ("strategy.bollinger_period", self.bollinger_period),
        ] {
            if period == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        if self.rsi_period < 2 {
            return Err(Error::Config("strategy.rsi_period must be at least 2".into()));
        }
        if self.bollinger_period < 2 {
            return Err(Error::Config("strategy.bollinger_period must be at least 2".into()));
        }
        if self.sma_short >= self.sma_long {
            return Err(Error::Config(format!(
                "strategy.sma_short ({}) must be less than strategy.sma_long ({})",
                self.sma_short, self.sma_long
            )));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(Error::Config(format!(
                "strategy.macd_fast ({}) must be less than strategy.macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        ensure_range("strategy.rsi_threshold", self.rsi_threshold, 0.0, 100.0)?;
        ensure_range("strategy.adx_threshold", self.adx_threshold, 0.0, 100.0)?;
        ensure_range("strategy.lateral_adx_threshold", self.lateral_adx_threshold, 0.0, 100.0)?;
        ensure_range("strategy.macd_threshold", self.macd_threshold, 0.0, f64::MAX)?;
        ensure_range("strategy.bollinger_std_dev", self.bollinger_std_dev, f64::MIN_POSITIVE, 10.0)?;
        ensure_range("strategy.supertrend_multiplier", self.supertrend_multiplier, f64::MIN_POSITIVE, 20.0)?;
        ensure_range("strategy.support_margin", self.support_margin, f64::MIN_POSITIVE, 2.0)?;
        ensure_range("strategy.resistance_margin", self.resistance_margin, f64::MIN_POSITIVE, 2.0)?;
        ensure_range("strategy.stop_loss_atr_multiplier", self.stop_loss_atr_multiplier, f64::MIN_POSITIVE, 100.0)?;
        ensure_range("strategy.take_profit_multiplier", self.take_profit_multiplier, f64::MIN_POSITIVE, 100.0)?;
        ensure_range("strategy.trailing_stop_percentage", self.trailing_stop_percentage, f64::MIN_POSITIVE, 0.99)?;
        ensure_range("strategy.time_stop_loss_pct", self.time_stop_loss_pct, 0.0, 100.0)?;
        if let Some(pct) = self.stop_loss_pct {
            ensure_range("strategy.stop_loss_pct", pct, f64::MIN_POSITIVE, 0.99)?;
        }
        if let Some(pct) = self.take_profit_pct {
            ensure_range("strategy.take_profit_pct", pct, f64::MIN_POSITIVE, 100.0)?;
        }
        if self.min_secondary_conditions > 5 {
            return Err(Error::Config(format!(
                "strategy.min_secondary_conditions must be between 0 and 5, got {}",
                self.min_secondary_conditions
            )));
        }
        Ok(())
    }
}

impl DataConfig {
    fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(Error::Config(format!(
                    "data.start_date ({start}) is after data.end_date ({end})"
                )));
            }
        }
        Ok(())
    }
}

impl PaperConfig {
    fn validate(&self) -> Result<()> {
        if self.bot_name.trim().is_empty() {
            return Err(Error::Config("paper.bot_name must not be empty".into()));
        }
        if self.evaluation_interval_secs == 0 || self.monitor_interval_secs == 0 {
            return Err(Error::Config("paper intervals must be at least 1 second".into()));
        }
        ensure_range("paper.min_trade_volume", self.min_trade_volume, 0.0, f64::MAX)?;
        ensure_range("paper.min_order_notional", self.min_order_notional, 0.0, f64::MAX)?;
        Ok(())
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.max_write_retries == 0 {
            return Err(Error::Config("store.max_write_retries must be at least 1".into()));
        }
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("store.database_url must not be empty".into()));
        }
        Ok(())
    }
}

fn ensure_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(out_of_range(name, value))
    }
}

fn out_of_range(name: &str, value: f64) -> Error {
    Error::Config(format!("{name} is out of range: {value}"))
}

fn default_true() -> bool {
    true
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_cleanup_limit() -> usize {
    10
}

fn default_min_secondary() -> usize {
    3
}

fn default_interval() -> Interval {
    Interval::daily()
}

/// Which loop the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Paper,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Paper => write!(f, "paper"),
        }
    }
}

/// Process-level settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub mode: RunMode,
    pub config_path: PathBuf,
    /// Overrides `store.database_url` when set.
    pub database_url: Option<String>,
}

impl EnvConfig {
    /// Read `SWINGBOT_MODE`, `SWINGBOT_CONFIG` and `DATABASE_URL`.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let mode = match optional_env("SWINGBOT_MODE")
            .unwrap_or_else(|| "backtest".to_string())
            .to_lowercase()
            .as_str()
        {
            "backtest" => RunMode::Backtest,
            "paper" => RunMode::Paper,
            other => {
                return Err(Error::Config(format!(
                    "SWINGBOT_MODE must be 'backtest' or 'paper', got: '{other}'"
                )))
            }
        };

        Ok(EnvConfig {
            mode,
            config_path: optional_env("SWINGBOT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/swingbot.toml")),
            database_url: optional_env("DATABASE_URL"),
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        initial_capital = 1000.0
        trade_fee = 0.0026
        spread = 0.0004
        slippage = 0.0005
        investment_fraction = 1.0

        [strategy]
        sma_short = 10
        sma_long = 50
        rsi_period = 14
        rsi_threshold = 70.0
        macd_fast = 12
        macd_slow = 26
        macd_signal = 9
        macd_threshold = 0.0
        volume_sma_period = 20
        atr_period = 14
        adx_period = 14
        adx_threshold = 20.0
        lateral_adx_threshold = 15.0
        bollinger_period = 20
        bollinger_std_dev = 2.0
        use_supertrend = true
        supertrend_multiplier = 3.0
        use_adx_positive = true
        use_macd_positive = false
        support_margin = 1.0
        resistance_margin = 1.0
        stop_loss_atr_multiplier = 1.5
        take_profit_multiplier = 3.0
        trailing_stop_percentage = 0.03
        time_stop_days = 10
        time_stop_loss_pct = 5.0

        [data]
        file_path = "data/ohlc.csv"
        start_date = "2023-01-01"
        end_date = "2023-12-31"
        interval = "1D"
    "#;

    #[test]
    fn parses_full_document_with_defaults() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.strategy.sma_long, 50);
        assert_eq!(cfg.strategy.ma_kind, MaKind::Sma);
        assert_eq!(cfg.strategy.min_secondary_conditions, 3);
        assert_eq!(cfg.data.interval, Interval::daily());
        assert_eq!(cfg.paper, PaperConfig::default());
        assert_eq!(cfg.store.max_write_retries, 5);
    }

    #[test]
    fn rejects_unknown_keys() {
        let doc = SAMPLE.replace("[data]", "[data]\nbogus = 1");
        assert!(matches!(AppConfig::from_toml_str(&doc), Err(Error::Toml(_))));
    }

    #[test]
    fn rejects_missing_keys() {
        let doc = SAMPLE.replace("rsi_period = 14\n", "");
        assert!(AppConfig::from_toml_str(&doc).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let doc = SAMPLE.replace("investment_fraction = 1.0", "investment_fraction = 1.5");
        assert!(matches!(AppConfig::from_toml_str(&doc), Err(Error::Config(_))));

        let doc = SAMPLE.replace("sma_short = 10", "sma_short = 60");
        assert!(matches!(AppConfig::from_toml_str(&doc), Err(Error::Config(_))));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!("1D".parse::<Interval>().unwrap().seconds(), 86_400);
        assert_eq!("4H".parse::<Interval>().unwrap().seconds(), 14_400);
        assert_eq!("60min".parse::<Interval>().unwrap().seconds(), 3_600);
        assert_eq!("15m".parse::<Interval>().unwrap().seconds(), 900);
        assert!("D".parse::<Interval>().is_err());
        assert!("3x".parse::<Interval>().is_err());
        assert!("0D".parse::<Interval>().is_err());
        assert_eq!(Interval::daily().to_string(), "1D");
    }

    #[test]
    fn oversized_interval_is_a_config_error() {
        for raw in ["99999999999999999w", "9223372036854775807s", "9223372036854775807d"] {
            assert!(matches!(raw.parse::<Interval>(), Err(Error::Config(_))), "{raw}");
        }
    }

    #[test]
    fn shipped_config_is_valid() {
        let cfg = AppConfig::from_toml_str(include_str!("../../../config/swingbot.toml")).unwrap();
        assert_eq!(cfg.paper.bot_name, "live_paper");
        assert_eq!(cfg.optimization.drawdown_penalty, 0.5);
    }

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }
}
