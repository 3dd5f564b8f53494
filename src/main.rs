use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use price_compare::aggregation::{PriceComparison, history_by_platform};
use price_compare::batch::BatchCoordinator;
use price_compare::browser::{ChromeRenderer, PageRenderer, ScreenshotRequest};
use price_compare::config::{AppConfig, LoggingConfig};
use price_compare::currency::ExchangeRates;
use price_compare::models::{NewPlatform, NewProduct};
use price_compare::orchestrator::ScrapeOrchestrator;
use price_compare::resolver::StrategyResolver;
use price_compare::scheduler::PriceScheduler;
use price_compare::store::ObservationStore;
use price_compare::utils::ScrapeError;

#[derive(Parser)]
#[command(name = "price-compare", about = "Collect and compare product prices across e-commerce platforms", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Apply schema migrations
    Migrate,

    /// Register a platform to collect prices from
    AddPlatform {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_url: Option<String>,
        /// Currency its prices are quoted in
        #[arg(long, default_value = "MYR")]
        currency: String,
        /// Seconds between two requests to this platform
        #[arg(long, default_value_t = 2)]
        delay: u32,
        #[arg(long)]
        inactive: bool,
    },

    /// Add a product to track
    AddProduct {
        #[arg(long)]
        name: String,
    },

    /// Set the page to scrape for a product on a platform
    Track {
        /// Product id or slug
        #[arg(long)]
        product: String,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        url: String,
    },

    /// Scrape every active product on every active platform
    Run,

    /// Scrape a single product
    Scrape {
        /// Product id or slug
        #[arg(long)]
        product: String,
        /// Only platforms whose name contains this text
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the latest prices, summary and recent history of a product
    Compare {
        /// Product id or slug
        #[arg(long)]
        product: String,
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// List latest prices older than the given age
    Stale {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Run scheduled scraping until interrupted
    Daemon,
}

/// Stands in for the browser when nothing will be fetched.
struct OfflineRenderer;

#[async_trait]
impl PageRenderer for OfflineRenderer {
    async fn render(&self, url: &str, _timeout: Duration) -> Result<String, ScrapeError> {
        Err(ScrapeError::Transport(format!("rendering disabled, not fetching {}", url)))
    }

    async fn screenshot(&self, request: &ScreenshotRequest, _timeout: Duration) -> Result<Vec<u8>, ScrapeError> {
        Err(ScrapeError::Transport(format!("rendering disabled, not capturing {}", request.url)))
    }
}

fn init_tracing(verbose: u8, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let directive = match verbose {
        0 => logging.filter.clone(),
        1 => "price_compare=debug,info".to_string(),
        _ => "trace".to_string(),
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directive)?,
    };

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "price-compare.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn open_store(config: &AppConfig) -> Result<ObservationStore> {
    let store = ObservationStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to apply migrations")?;
    Ok(store)
}

fn coordinator(config: &AppConfig, store: ObservationStore, renderer: Arc<dyn PageRenderer>) -> Arc<BatchCoordinator> {
    let resolver = StrategyResolver::new(renderer, config.scraper.clone(), config.vision.clone());
    let orchestrator = ScrapeOrchestrator::new(Arc::new(resolver), store, &config.scraper);
    Arc::new(BatchCoordinator::new(Arc::new(orchestrator), config.scraper.workers))
}

fn chrome(config: &AppConfig) -> Result<Arc<dyn PageRenderer>> {
    let renderer = ChromeRenderer::new(&config.scraper).context("Failed to start headless browser")?;
    Ok(Arc::new(renderer))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _guard = init_tracing(cli.verbose, &config.logging)?;

    match cli.command {
        Command::Migrate => {
            open_store(&config).await?;
            println!("Migrations applied.");
        }

        Command::AddPlatform {
            name,
            base_url,
            currency,
            delay,
            inactive,
        } => {
            let store = open_store(&config).await?;
            let platform = store
                .create_platform(NewPlatform {
                    name,
                    base_url,
                    currency: Some(currency),
                    is_active: Some(!inactive),
                    scraping_delay: Some(delay),
                })
                .await?;
            println!("Added platform {} ({})", platform.name, platform.id);
        }

        Command::AddProduct { name } => {
            let store = open_store(&config).await?;
            let product = store.create_product(NewProduct { name, is_active: None }).await?;
            println!("Added product {} (slug: {}, id: {})", product.name, product.slug, product.id);
        }

        Command::Track { product, platform, url } => {
            url::Url::parse(&url).with_context(|| format!("Invalid URL: {}", url))?;
            let store = open_store(&config).await?;
            let product = store.get_product(&product).await?;
            let platform = store.platform_by_name(&platform).await?;
            store.set_target_url(&product.id, &platform.id, &url).await?;
            println!("Tracking {} on {}: {}", product.name, platform.name, url);
        }

        Command::Run => {
            let store = open_store(&config).await?;
            let coordinator = coordinator(&config, store, chrome(&config)?);
            let summary = coordinator.run_all().await?;

            println!("Total products: {}", summary.total_products);
            println!("Scraped successfully: {}", summary.scraped_products);
            println!("Total prices collected: {}", summary.total_prices);
            println!("Pairs without URL: {}", summary.skipped_pairs);
            if !summary.errors.is_empty() {
                println!("Errors:");
                for error in &summary.errors {
                    println!("  {}", error);
                }
            }
        }

        Command::Scrape {
            product,
            platform,
            dry_run,
        } => {
            let store = open_store(&config).await?;
            let renderer: Arc<dyn PageRenderer> = if dry_run {
                Arc::new(OfflineRenderer)
            } else {
                chrome(&config)?
            };
            let coordinator = coordinator(&config, store, renderer);

            let reports = coordinator
                .scrape_product(&product, platform.as_deref(), dry_run)
                .await?;
            for report in &reports {
                println!("  {}", report);
            }

            let succeeded = reports.iter().filter(|report| report.is_success()).count();
            println!("Completed: {}/{} platforms scraped successfully", succeeded, reports.len());
        }

        Command::Compare { product, days } => {
            let store = open_store(&config).await?;
            let rates = ExchangeRates::from_config(&config.currency);
            let product = store.get_product(&product).await?;
            let comparison = PriceComparison::for_product(&store, &product.id, &rates).await?;

            println!("{}", product.name);
            for entry in comparison.latest() {
                println!(
                    "  {:<20} {:<32} {:<14} {}",
                    entry.platform_name,
                    entry.observation.price_display(&rates),
                    entry.observation.availability,
                    entry.observation.captured_at.format("%Y-%m-%d %H:%M")
                );
            }
            if let Some(average) = comparison.average() {
                println!("  Average: {}", rates.format_base(average));
            }
            if let Some(highest) = comparison.highest() {
                println!(
                    "  Highest: {} on {}",
                    highest.observation.price_display(&rates),
                    highest.platform_name
                );
            }
            println!("{}", comparison.summary_text());

            let history = history_by_platform(&store, &product.id, days, Utc::now(), &rates).await?;
            if !history.is_empty() {
                println!("History (last {} days):", days);
                for (platform, points) in &history {
                    let line: Vec<String> = points
                        .iter()
                        .map(|point| format!("{} {:.2}", point.captured_at.format("%Y-%m-%d %H:%M"), point.price))
                        .collect();
                    println!("  {}: {}", platform, line.join(", "));
                }
            }
        }

        Command::Stale { hours } => {
            let store = open_store(&config).await?;
            let max_age =
                chrono::Duration::try_hours(hours).with_context(|| format!("--hours {} is out of range", hours))?;
            let stale = store.stale_latest(max_age, Utc::now()).await?;
            if stale.is_empty() {
                println!("All latest prices are newer than {} hours.", hours);
            }
            for (product, latest) in &stale {
                println!(
                    "  {} on {}: last captured {}",
                    product.name,
                    latest.platform_name,
                    latest.observation.captured_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Command::Daemon => {
            if config.metrics.enabled {
                let address = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
                PrometheusBuilder::new()
                    .with_http_listener(address)
                    .install()
                    .context("Failed to install Prometheus exporter")?;
                info!("Serving metrics on {}", address);
            }

            let store = open_store(&config).await?;
            let coordinator = coordinator(&config, store, chrome(&config)?);
            let mut scheduler = PriceScheduler::new(coordinator, config.scheduler.clone()).await?;
            scheduler.start().await?;

            info!("Price scheduler running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}
