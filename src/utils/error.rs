use thiserror::Error;

/// Failure taxonomy for a single scrape. Everything the engine does per
/// (product, platform) pair is reduced to one of these before it can reach
/// the batch coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    /// Missing or unusable credential for an optional capability.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Render, screenshot or inference call failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Strategy ran but found no price.
    #[error("No price data found")]
    NoData,

    /// Data found but it violates the price or field rules.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No strategy or no known URL for the pair. Skipped, not retried.
    #[error("Configuration gap: {0}")]
    ConfigurationGap(String),
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Transport(_) | ScrapeError::NoData | ScrapeError::Validation(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scraping error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
