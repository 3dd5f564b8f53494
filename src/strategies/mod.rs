//! Price extraction strategies.
//!
//! Two structurally different ways of getting a price off a product page:
//! selector parsing of rendered HTML (one parser per platform family) and
//! vision inference over a screenshot. Both produce [`RawPriceData`]; a miss
//! is `Ok(None)`, only capability failures are errors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

pub mod aliexpress;
pub mod ebay;
pub mod fetcher;
pub mod inference;
pub mod lazada;
pub mod selectors;
pub mod vision;

pub use fetcher::{PageFetcher, Throttle};
pub use inference::{GeminiClient, InferenceService};
pub use vision::VisionScraper;

use crate::utils::ScrapeError;

/// Unvalidated price data as a strategy found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPriceData {
    pub price: Decimal,
    pub currency: String,
    pub availability: String,
    pub seller_name: String,
    pub quantity_available: Option<u32>,
}

/// Storefront families with a hand-written selector parser, in the order
/// platform names are matched against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Lazada,
    Ebay,
    AliExpress,
}

impl PlatformFamily {
    pub const ALL: [PlatformFamily; 3] = [PlatformFamily::Lazada, PlatformFamily::Ebay, PlatformFamily::AliExpress];

    pub fn key(&self) -> &'static str {
        match self {
            PlatformFamily::Lazada => "lazada",
            PlatformFamily::Ebay => "ebay",
            PlatformFamily::AliExpress => "aliexpress",
        }
    }

    /// First family whose key occurs in the platform name, ignoring case.
    pub fn matching(platform_name: &str) -> Option<Self> {
        let name = platform_name.to_lowercase();
        Self::ALL.into_iter().find(|family| name.contains(family.key()))
    }

    pub fn parse(&self, html: &str) -> Option<RawPriceData> {
        match self {
            PlatformFamily::Lazada => lazada::parse(html),
            PlatformFamily::Ebay => ebay::parse(html),
            PlatformFamily::AliExpress => aliexpress::parse(html),
        }
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Rendered HTML through one family's selector table.
pub struct SelectorScraper {
    family: PlatformFamily,
    fetcher: PageFetcher,
}

impl SelectorScraper {
    pub fn new(family: PlatformFamily, fetcher: PageFetcher) -> Self {
        Self { family, fetcher }
    }

    pub async fn scrape(&self, url: &str) -> Result<Option<RawPriceData>, ScrapeError> {
        let html = self.fetcher.html(url).await?;
        let data = self.family.parse(&html);

        match &data {
            Some(found) => info!(family = %self.family, url = %url, "Found {} {}", found.price, found.currency),
            None => warn!(family = %self.family, url = %url, "Could not extract price"),
        }

        Ok(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Selector(PlatformFamily),
    Vision,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Selector(family) => write!(f, "selector:{}", family),
            StrategyKind::Vision => f.write_str("vision"),
        }
    }
}

/// The closed set of extraction strategies.
pub enum ExtractionStrategy {
    Selector(SelectorScraper),
    Vision(VisionScraper),
}

impl ExtractionStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ExtractionStrategy::Selector(scraper) => StrategyKind::Selector(scraper.family),
            ExtractionStrategy::Vision(_) => StrategyKind::Vision,
        }
    }

    pub async fn scrape(&self, url: &str, product_name: Option<&str>) -> Result<Option<RawPriceData>, ScrapeError> {
        match self {
            ExtractionStrategy::Selector(scraper) => scraper.scrape(url).await,
            ExtractionStrategy::Vision(scraper) => scraper.scrape(url, product_name).await,
        }
    }
}
