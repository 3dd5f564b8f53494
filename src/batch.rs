use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::models::{Platform, Product};
use crate::orchestrator::{ScrapeOrchestrator, ScrapeOutcome};
use crate::utils::error::{AppError, Result};

/// Counts reported after a full run. A partial failure is still a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_products: usize,
    /// Products with at least one successful platform.
    pub scraped_products: usize,
    pub total_prices: usize,
    /// Pairs with no known URL yet.
    pub skipped_pairs: usize,
    /// Pairs that ran but produced no observation.
    pub failed_pairs: usize,
    pub errors: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} products, {} prices collected",
            self.scraped_products, self.total_products, self.total_prices
        )?;
        if self.skipped_pairs > 0 {
            write!(f, ", {} pairs without URL", self.skipped_pairs)?;
        }
        if !self.errors.is_empty() {
            write!(f, ", {} errors", self.errors.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformStatus {
    Skipped(String),
    /// Dry run: the URL that would have been scraped.
    WouldScrape,
    Scraped(ScrapeOutcome),
}

/// What happened to one platform of a single-product scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformReport {
    pub platform: String,
    pub url: Option<String>,
    pub status: PlatformStatus,
}

impl PlatformReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, PlatformStatus::Scraped(ScrapeOutcome::Success(_)))
    }
}

impl fmt::Display for PlatformReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            PlatformStatus::Skipped(reason) => write!(f, "{}: skipped, {}", self.platform, reason),
            PlatformStatus::WouldScrape => write!(
                f,
                "{}: [DRY RUN] would scrape {}",
                self.platform,
                self.url.as_deref().unwrap_or_default()
            ),
            PlatformStatus::Scraped(ScrapeOutcome::Success(o)) => {
                write!(f, "{}: {} {} - {}", self.platform, o.currency, o.price, o.availability)
            }
            PlatformStatus::Scraped(outcome) => write!(f, "{}: failed, {}", self.platform, outcome),
        }
    }
}

struct PairJob {
    product_index: usize,
    product: Product,
    platform: Platform,
    url: String,
}

#[derive(Default)]
struct ProductTally {
    successes: usize,
    error: Option<String>,
}

/// Runs every active (product, platform) pair through the orchestrator.
pub struct BatchCoordinator {
    orchestrator: Arc<ScrapeOrchestrator>,
    workers: usize,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<ScrapeOrchestrator>, workers: usize) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
        }
    }

    pub fn orchestrator(&self) -> &ScrapeOrchestrator {
        &self.orchestrator
    }

    /// At most `workers` pairs in flight overall and one per platform.
    /// Only a failing datastore while listing products or platforms is an
    /// `Err`; everything per product lands in `errors`.
    pub async fn run_all(&self) -> Result<RunSummary> {
        let store = self.orchestrator.store();
        let products = store.active_products().await?;
        let platforms = store.active_platforms().await?;

        info!(
            "Starting run over {} products and {} platforms with {} workers",
            products.len(),
            platforms.len(),
            self.workers
        );

        let mut summary = RunSummary {
            total_products: products.len(),
            ..RunSummary::default()
        };
        let mut tallies: Vec<ProductTally> = products.iter().map(|_| ProductTally::default()).collect();
        let mut jobs = Vec::new();

        for (product_index, product) in products.iter().enumerate() {
            match self.pairs_for(product_index, product, &platforms).await {
                Ok((pairs, skipped)) => {
                    jobs.extend(pairs);
                    summary.skipped_pairs += skipped;
                }
                Err(e) => tallies[product_index].error = Some(e.to_string()),
            }
        }

        let workers = Arc::new(Semaphore::new(self.workers));
        let mut platform_slots: HashMap<String, Arc<Semaphore>> = HashMap::new();
        let mut handles = Vec::new();

        for job in jobs {
            let orchestrator = Arc::clone(&self.orchestrator);
            let workers = Arc::clone(&workers);
            let platform_slot = Arc::clone(
                platform_slots
                    .entry(job.platform.id.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(1))),
            );
            let product_index = job.product_index;

            let handle = tokio::spawn(async move {
                let _platform_permit = platform_slot
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                let _worker_permit = workers
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;

                orchestrator.scrape_one(&job.product, &job.platform, &job.url).await
            });

            handles.push((product_index, handle));
        }

        for (product_index, handle) in handles {
            let tally = &mut tallies[product_index];
            match handle.await {
                Ok(Ok(ScrapeOutcome::Success(_))) => tally.successes += 1,
                Ok(Ok(_)) => summary.failed_pairs += 1,
                Ok(Err(e)) => {
                    summary.failed_pairs += 1;
                    tally.error.get_or_insert_with(|| e.to_string());
                }
                Err(e) => {
                    summary.failed_pairs += 1;
                    tally.error.get_or_insert_with(|| format!("task failed: {}", e));
                }
            }
        }

        for (product, tally) in products.iter().zip(tallies) {
            if tally.successes > 0 {
                summary.scraped_products += 1;
                summary.total_prices += tally.successes;
            }
            if let Some(e) = tally.error {
                let message = format!("Error scraping {}: {}", product.name, e);
                error!("{}", message);
                summary.errors.push(message);
            }
        }

        info!("Run completed: {}", summary);
        Ok(summary)
    }

    async fn pairs_for(
        &self,
        product_index: usize,
        product: &Product,
        platforms: &[Platform],
    ) -> Result<(Vec<PairJob>, usize)> {
        let mut pairs = Vec::new();
        let mut skipped = 0;

        for platform in platforms {
            match self.orchestrator.store().target_url(&product.id, &platform.id).await? {
                Some(url) => pairs.push(PairJob {
                    product_index,
                    product: product.clone(),
                    platform: platform.clone(),
                    url,
                }),
                None => {
                    warn!(product = %product.name, platform = %platform.name, "No product URL found, skipping");
                    skipped += 1;
                }
            }
        }

        Ok((pairs, skipped))
    }

    /// Scrapes one active product, by id or slug, on every active platform
    /// or those whose name contains `platform_filter`. Runs sequentially.
    pub async fn scrape_product(
        &self,
        key: &str,
        platform_filter: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<PlatformReport>> {
        let store = self.orchestrator.store();
        let product = store.get_product(key).await?;
        if !product.is_active {
            return Err(AppError::NotFound {
                resource: format!("active product '{}'", key),
            });
        }

        let platforms = match platform_filter {
            Some(filter) => {
                let matching = store.platforms_matching(filter).await?;
                if matching.is_empty() {
                    return Err(AppError::NotFound {
                        resource: format!("active platform matching '{}'", filter),
                    });
                }
                matching
            }
            None => store.active_platforms().await?,
        };

        info!(product = %product.name, dry_run, "Scraping product on {} platforms", platforms.len());

        let mut reports = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let url = store.target_url(&product.id, &platform.id).await?;

            let status = match &url {
                None => {
                    warn!(product = %product.name, platform = %platform.name, "No URL found, skipping");
                    PlatformStatus::Skipped("no URL found".to_string())
                }
                Some(_) if dry_run => PlatformStatus::WouldScrape,
                Some(url) => PlatformStatus::Scraped(self.orchestrator.scrape_one(&product, &platform, url).await?),
            };

            reports.push(PlatformReport {
                platform: platform.name,
                url,
                status,
            });
        }

        Ok(reports)
    }
}
