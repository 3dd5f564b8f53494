// Shared fixtures for the integration tests: an in-memory store, a scripted
// renderer standing in for the browser and a clock that records backoff
// instead of sleeping.

pub mod batch_tests;
pub mod orchestrator_tests;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use price_compare::batch::BatchCoordinator;
use price_compare::browser::{PageRenderer, ScreenshotRequest};
use price_compare::config::{ScraperConfig, VisionConfig};
use price_compare::models::{NewPlatform, NewProduct, Platform, Product};
use price_compare::orchestrator::{Clock, ScrapeOrchestrator};
use price_compare::resolver::StrategyResolver;
use price_compare::store::ObservationStore;
use price_compare::strategies::InferenceService;
use price_compare::utils::ScrapeError;

/// Renderer answering from a per-URL script. Once a script runs out the
/// last answer repeats; an unscripted URL fails like an unreachable host.
#[derive(Default)]
pub struct FakeRenderer {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ScrapeError>>>>,
    last: Mutex<HashMap<String, Result<String, ScrapeError>>>,
    calls: Mutex<Vec<String>>,
    screenshot: Mutex<Option<Vec<u8>>>,
    latency: Mutex<Option<Duration>>,
    hanging: Mutex<HashSet<String>>,
    in_flight: Mutex<InFlight>,
}

/// Concurrent renders, per host and overall.
#[derive(Default)]
struct InFlight {
    by_host: HashMap<String, usize>,
    total: usize,
    max_by_host: HashMap<String, usize>,
    max_total: usize,
}

impl InFlight {
    fn enter(&mut self, host: &str) {
        let current = self.by_host.entry(host.to_string()).or_default();
        *current += 1;
        let current = *current;
        let max = self.max_by_host.entry(host.to_string()).or_default();
        *max = (*max).max(current);
        self.total += 1;
        self.max_total = self.max_total.max(self.total);
    }

    fn leave(&mut self, host: &str) {
        if let Some(current) = self.by_host.get_mut(host) {
            *current -= 1;
        }
        self.total -= 1;
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default()
}

impl FakeRenderer {
    pub fn script(&self, url: &str, responses: Vec<Result<String, ScrapeError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into_iter().collect());
    }

    pub fn serve(&self, url: &str, html: String) {
        self.script(url, vec![Ok(html)]);
    }

    pub fn serve_screenshot(&self, png: Vec<u8>) {
        *self.screenshot.lock().unwrap() = Some(png);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|called| called.as_str() == url).count()
    }

    /// Every render takes this long to answer.
    pub fn slow_down(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Renders of `url` never complete.
    pub fn hang(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    pub fn max_concurrent_for_host(&self, host: &str) -> usize {
        self.in_flight.lock().unwrap().max_by_host.get(host).copied().unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.in_flight.lock().unwrap().max_total
    }

    fn answer(&self, url: &str) -> Result<String, ScrapeError> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());

        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                last.insert(url.to_string(), response.clone());
                response
            }
            None => last
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(ScrapeError::Transport(format!("connection refused: {}", url)))),
        }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, url: &str, _timeout: Duration) -> Result<String, ScrapeError> {
        self.calls.lock().unwrap().push(url.to_string());

        let hangs = self.hanging.lock().unwrap().contains(url);
        if hangs {
            std::future::pending::<()>().await;
        }

        let host = host_of(url);
        self.in_flight.lock().unwrap().enter(&host);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.lock().unwrap().leave(&host);

        self.answer(url)
    }

    async fn screenshot(&self, request: &ScreenshotRequest, _timeout: Duration) -> Result<Vec<u8>, ScrapeError> {
        self.calls.lock().unwrap().push(request.url.clone());
        self.screenshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ScrapeError::Transport(format!("screenshot failed: {}", request.url)))
    }
}

/// Inference service replying with canned text and keeping the prompts.
pub struct FakeInference {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl FakeInference {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn extract(&self, _image: &[u8], prompt: &str) -> Result<String, ScrapeError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn test_scraper_config() -> ScraperConfig {
    ScraperConfig {
        workers: 2,
        fetch_retries: 1,
        screenshot_retries: 1,
        attempt_timeout: 5,
        render_timeout: 5,
        settle_ms: 0,
        ..ScraperConfig::default()
    }
}

pub struct TestEnv {
    pub store: ObservationStore,
    pub renderer: Arc<FakeRenderer>,
    pub clock: Arc<RecordingClock>,
    pub orchestrator: Arc<ScrapeOrchestrator>,
}

impl TestEnv {
    pub async fn new() -> anyhow::Result<Self> {
        Self::build(test_scraper_config(), None).await
    }

    pub async fn with_config(config: ScraperConfig) -> anyhow::Result<Self> {
        Self::build(config, None).await
    }

    /// Vision preferred, backed by `inference`.
    pub async fn with_vision(inference: Arc<dyn InferenceService>) -> anyhow::Result<Self> {
        Self::build(test_scraper_config(), Some(inference)).await
    }

    async fn build(config: ScraperConfig, inference: Option<Arc<dyn InferenceService>>) -> anyhow::Result<Self> {
        let store = ObservationStore::in_memory().await?;
        let renderer = Arc::new(FakeRenderer::default());
        let clock = Arc::new(RecordingClock::default());

        let vision = VisionConfig {
            enabled: inference.is_some(),
            api_key: None,
            ..VisionConfig::default()
        };
        let mut resolver = StrategyResolver::new(renderer.clone(), config.clone(), vision);
        if let Some(inference) = inference {
            resolver = resolver.with_inference(inference);
        }
        let orchestrator =
            ScrapeOrchestrator::new(Arc::new(resolver), store.clone(), &config).with_clock(clock.clone());

        Ok(Self {
            store,
            renderer,
            clock,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn coordinator(&self, workers: usize) -> BatchCoordinator {
        BatchCoordinator::new(Arc::clone(&self.orchestrator), workers)
    }

    pub async fn platform(&self, name: &str, currency: &str) -> anyhow::Result<Platform> {
        Ok(self
            .store
            .create_platform(NewPlatform {
                name: name.to_string(),
                base_url: None,
                currency: Some(currency.to_string()),
                is_active: Some(true),
                scraping_delay: Some(0),
            })
            .await?)
    }

    pub async fn product(&self, name: &str) -> anyhow::Result<Product> {
        Ok(self
            .store
            .create_product(NewProduct {
                name: name.to_string(),
                is_active: None,
            })
            .await?)
    }
}

pub fn lazada_page(price: &str) -> String {
    format!(
        r#"<html><body>
            <span class="pdp-price pdp-price_type_normal">{}</span>
            <div class="stock-status">In stock</div>
            <a class="seller-name">Official Store</a>
        </body></html>"#,
        price
    )
}

pub fn ebay_page(price: &str, currency: &str) -> String {
    format!(
        r#"<html><head>
            <script type="application/ld+json">
                {{"@type": "Product", "offers": {{"price": "{}", "priceCurrency": "{}"}}}}
            </script>
        </head><body></body></html>"#,
        price, currency
    )
}

pub fn empty_page() -> String {
    "<html><body><h1>Something went wrong</h1></body></html>".to_string()
}
