use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::browser::PageRenderer;
use crate::config::{ScraperConfig, VisionConfig};
use crate::models::Platform;
use crate::strategies::{
    ExtractionStrategy, GeminiClient, InferenceService, PageFetcher, PlatformFamily, SelectorScraper, StrategyKind,
    Throttle, VisionScraper,
};

/// Which strategy serves a platform, as a pure function of its name and the
/// vision settings. Vision wins when preferred and usable, otherwise the first
/// selector family whose key is in the name.
pub fn resolve_kind(platform_name: &str, prefer_vision: bool, has_credential: bool) -> Option<StrategyKind> {
    if prefer_vision && has_credential {
        return Some(StrategyKind::Vision);
    }
    PlatformFamily::matching(platform_name).map(StrategyKind::Selector)
}

/// Builds strategies for platforms. Owns one politeness throttle per
/// platform so every strategy hitting the same site shares it.
pub struct StrategyResolver {
    renderer: Arc<dyn PageRenderer>,
    scraper: ScraperConfig,
    vision: VisionConfig,
    inference: Option<Arc<dyn InferenceService>>,
    throttles: Mutex<HashMap<String, Arc<Throttle>>>,
}

impl StrategyResolver {
    pub fn new(renderer: Arc<dyn PageRenderer>, scraper: ScraperConfig, vision: VisionConfig) -> Self {
        Self {
            renderer,
            scraper,
            vision,
            inference: None,
            throttles: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `inference` for vision scraping instead of a Gemini client built
    /// from the credential.
    pub fn with_inference(mut self, inference: Arc<dyn InferenceService>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn prefers_vision(&self) -> bool {
        self.vision.enabled
    }

    fn has_credential(&self) -> bool {
        self.inference.is_some() || self.vision.credential().is_some()
    }

    pub fn throttle_for(&self, platform: &Platform) -> Arc<Throttle> {
        let mut throttles = match self.throttles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        throttles
            .entry(platform.id.clone())
            .or_insert_with(|| Arc::new(Throttle::new(platform.politeness_delay())))
            .clone()
    }

    fn fetcher_for(&self, platform: &Platform) -> PageFetcher {
        PageFetcher::new(
            Arc::clone(&self.renderer),
            self.throttle_for(platform),
            self.scraper.fetch_retries,
            self.scraper.screenshot_retries,
            self.scraper.render_timeout(),
        )
    }

    fn vision_strategy(&self, platform: &Platform) -> Option<ExtractionStrategy> {
        let inference = match &self.inference {
            Some(inference) => Arc::clone(inference),
            None => match GeminiClient::new(&self.vision) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(platform = %platform.name, "Vision scraper unavailable: {}. Falling back to selectors.", e);
                    return None;
                }
            },
        };

        Some(ExtractionStrategy::Vision(VisionScraper::new(
            self.fetcher_for(platform),
            inference,
            &platform.currency,
        )))
    }

    /// `None` means no capability for this platform: skip it, don't fail.
    pub fn resolve(&self, platform: &Platform, prefer_vision: bool) -> Option<ExtractionStrategy> {
        if let Some(StrategyKind::Vision) = resolve_kind(&platform.name, prefer_vision, self.has_credential()) {
            if let Some(strategy) = self.vision_strategy(platform) {
                info!(platform = %platform.name, "Using vision scraper");
                return Some(strategy);
            }
        }

        match PlatformFamily::matching(&platform.name) {
            Some(family) => {
                info!(platform = %platform.name, "Using {} selector scraper", family);
                Some(ExtractionStrategy::Selector(SelectorScraper::new(
                    family,
                    self.fetcher_for(platform),
                )))
            }
            None => {
                warn!(platform = %platform.name, "No scraper found for platform");
                None
            }
        }
    }
}
