pub mod aggregation;
pub mod batch;
pub mod browser;
pub mod config;
pub mod currency;
pub mod models;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod strategies;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use aggregation::PriceComparison;
pub use batch::{BatchCoordinator, RunSummary};
pub use config::AppConfig;
pub use currency::ExchangeRates;
pub use orchestrator::{ScrapeOrchestrator, ScrapeOutcome};
pub use store::ObservationStore;
pub use utils::error::{AppError, ScrapeError};

pub type Result<T> = std::result::Result<T, AppError>;
