use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range parameters, or an inconsistent candle series.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data gap: {0}")]
    DataGap(String),

    #[error("Order rejected: {reason}")]
    ValidationRejected { reason: RejectionReason },

    #[error("Store contention: '{operation}' failed after {attempts} attempts")]
    PersistenceContention { operation: String, attempts: u32 },

    #[error("Candle feed error: {0}")]
    Feed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fatal errors terminate the run; everything else is logged and the loop continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::DataGap(_) | Error::ValidationRejected { .. } | Error::Feed(_) => false,
            Error::Config(_)
            | Error::PersistenceContention { .. }
            | Error::Database(_)
            | Error::Migrate(_)
            | Error::Json(_)
            | Error::Toml(_)
            | Error::Csv(_)
            | Error::Io(_) => true,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
