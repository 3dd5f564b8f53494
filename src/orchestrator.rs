use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::models::{NewObservation, Platform, PriceObservation, Product};
use crate::resolver::StrategyResolver;
use crate::store::ObservationStore;
use crate::utils::ScrapeError;
use crate::utils::error::Result;
use crate::validation;

/// Result of scraping one (product, platform) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    Success(PriceObservation),
    NoData,
    InvalidData(String),
    TransportFailure(String),
}

impl ScrapeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ScrapeOutcome::Success(_) => "success",
            ScrapeOutcome::NoData => "no_data",
            ScrapeOutcome::InvalidData(_) => "invalid_data",
            ScrapeOutcome::TransportFailure(_) => "transport_failure",
        }
    }

    pub fn observation(&self) -> Option<&PriceObservation> {
        match self {
            ScrapeOutcome::Success(observation) => Some(observation),
            _ => None,
        }
    }
}

impl fmt::Display for ScrapeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeOutcome::Success(o) => write!(f, "{} {} ({})", o.price, o.currency, o.availability),
            ScrapeOutcome::NoData => f.write_str("no price data found"),
            ScrapeOutcome::InvalidData(reason) => write!(f, "invalid data: {}", reason),
            ScrapeOutcome::TransportFailure(reason) => write!(f, "transport failure: {}", reason),
        }
    }
}

/// Attempts and exponential backoff for the scrape-validate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Full backoff schedule. No wait follows the final attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|attempt| self.delay_after(attempt)).collect()
    }
}

/// Where backoff sleeps go. Swapped out in tests so retries run instantly.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

enum AttemptFailure {
    NoData,
    Invalid(String),
    Transport(String),
}

/// Drives one pair through resolve, scrape, validate and persist.
pub struct ScrapeOrchestrator {
    resolver: Arc<StrategyResolver>,
    store: ObservationStore,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    attempt_timeout: Duration,
}

impl ScrapeOrchestrator {
    pub fn new(resolver: Arc<StrategyResolver>, store: ObservationStore, config: &ScraperConfig) -> Self {
        Self {
            resolver,
            store,
            policy: RetryPolicy::from_config(config),
            clock: Arc::new(TokioClock),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn resolver(&self) -> &StrategyResolver {
        &self.resolver
    }

    pub async fn scrape_one(&self, product: &Product, platform: &Platform, url: &str) -> Result<ScrapeOutcome> {
        self.scrape_one_with_attempts(product, platform, url, self.policy.max_attempts)
            .await
    }

    /// Only a failing datastore is an `Err`; every per-pair failure comes
    /// back as a [`ScrapeOutcome`].
    pub async fn scrape_one_with_attempts(
        &self,
        product: &Product,
        platform: &Platform,
        url: &str,
        max_attempts: u32,
    ) -> Result<ScrapeOutcome> {
        let outcome = self.run(product, platform, url, max_attempts.max(1)).await?;

        metrics::counter!(
            "scrape_outcomes_total",
            "platform" => platform.name.clone(),
            "outcome" => outcome.label()
        )
        .increment(1);

        Ok(outcome)
    }

    async fn run(&self, product: &Product, platform: &Platform, url: &str, max_attempts: u32) -> Result<ScrapeOutcome> {
        if !platform.is_active {
            info!(platform = %platform.name, "Platform is not active, skipping");
            return Ok(ScrapeOutcome::InvalidData(format!("platform '{}' is not active", platform.name)));
        }

        if !is_absolute_http_url(url) {
            error!(product = %product.name, platform = %platform.name, url = %url, "Invalid product URL");
            return Ok(ScrapeOutcome::InvalidData(format!("invalid url '{}'", url)));
        }

        let Some(strategy) = self.resolver.resolve(platform, self.resolver.prefers_vision()) else {
            return Ok(ScrapeOutcome::TransportFailure("no strategy".to_string()));
        };

        let policy = RetryPolicy {
            max_attempts,
            ..self.policy
        };
        let mut last_failure = AttemptFailure::NoData;

        for attempt in 1..=max_attempts {
            info!(
                product = %product.name,
                platform = %platform.name,
                attempt,
                strategy = %strategy.kind(),
                "Scraping (attempt {}/{})",
                attempt,
                max_attempts
            );
            metrics::counter!("scrape_attempts_total", "platform" => platform.name.clone()).increment(1);

            let result = tokio::time::timeout(self.attempt_timeout, strategy.scrape(url, Some(&product.name))).await;

            last_failure = match result {
                Err(_) => {
                    warn!(platform = %platform.name, "Attempt {} timed out", attempt);
                    AttemptFailure::Transport(format!("timed out after {}s", self.attempt_timeout.as_secs()))
                }
                Ok(Err(e)) => {
                    error!(product = %product.name, platform = %platform.name, "Error scraping: {}", e);
                    AttemptFailure::Transport(transport_reason(e))
                }
                Ok(Ok(None)) => {
                    warn!(product = %product.name, platform = %platform.name, "No data returned");
                    AttemptFailure::NoData
                }
                Ok(Ok(Some(raw))) => match validation::validate(&raw, platform) {
                    Ok(valid) => {
                        let observation = self
                            .store
                            .append(NewObservation {
                                product_id: product.id.clone(),
                                platform_id: platform.id.clone(),
                                price: valid.price,
                                currency: valid.currency,
                                source_url: url.to_string(),
                                availability: valid.availability,
                                seller_name: valid.seller_name,
                                quantity_available: valid.quantity_available,
                            })
                            .await?;

                        info!(
                            product = %product.name,
                            platform = %platform.name,
                            "Scraped {} {} - {}",
                            observation.price,
                            observation.currency,
                            observation.availability
                        );
                        return Ok(ScrapeOutcome::Success(observation));
                    }
                    Err(reason) => {
                        error!(product = %product.name, platform = %platform.name, "Invalid price data: {}", reason);
                        AttemptFailure::Invalid(reason)
                    }
                },
            };

            if attempt < max_attempts {
                let wait = policy.delay_after(attempt);
                info!("Retrying in {:?}", wait);
                self.clock.sleep(wait).await;
            }
        }

        error!(
            product = %product.name,
            platform = %platform.name,
            "All {} attempts failed",
            max_attempts
        );

        Ok(match last_failure {
            AttemptFailure::NoData => ScrapeOutcome::NoData,
            AttemptFailure::Invalid(reason) => ScrapeOutcome::InvalidData(reason),
            AttemptFailure::Transport(reason) => ScrapeOutcome::TransportFailure(reason),
        })
    }
}

fn transport_reason(error: ScrapeError) -> String {
    match error {
        ScrapeError::Transport(reason) | ScrapeError::Configuration(reason) => reason,
        other => other.to_string(),
    }
}

fn is_absolute_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some())
        .unwrap_or(false)
}
