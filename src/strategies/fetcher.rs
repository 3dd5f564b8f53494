use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::browser::{PageRenderer, ScreenshotRequest};
use crate::utils::ScrapeError;

/// Minimum spacing between two requests to the same platform. Holding the
/// lock across the sleep serialises callers sharing one throttle.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        let mut last_request = self.last_request.lock().await;

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                let remaining = self.delay - elapsed;
                debug!("Throttling for {:?}", remaining);
                tokio::time::sleep(remaining).await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

/// Render and screenshot calls with the strategy-level retry, distinct from
/// the orchestrator's retry around the whole scrape.
#[derive(Clone)]
pub struct PageFetcher {
    renderer: Arc<dyn PageRenderer>,
    throttle: Arc<Throttle>,
    render_retries: usize,
    screenshot_retries: usize,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        throttle: Arc<Throttle>,
        render_retries: usize,
        screenshot_retries: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            throttle,
            render_retries: render_retries.max(1),
            screenshot_retries: screenshot_retries.max(1),
            timeout,
        }
    }

    /// Waits `delay * n` before the n-th retry.
    fn backoff(&self, attempts: usize) -> impl Iterator<Item = Duration> {
        let step = self.throttle.delay();
        (1..attempts).map(move |n| step * n as u32)
    }

    pub async fn html(&self, url: &str) -> Result<String, ScrapeError> {
        let action = || {
            let renderer = Arc::clone(&self.renderer);
            let throttle = Arc::clone(&self.throttle);
            let url = url.to_string();
            let timeout = self.timeout;

            async move {
                throttle.wait().await;
                renderer.render(&url, timeout).await.inspect_err(|e| {
                    warn!(url = %url, "Render failed: {}", e);
                })
            }
        };

        Retry::spawn(self.backoff(self.render_retries), action).await
    }

    pub async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, ScrapeError> {
        let action = || {
            let renderer = Arc::clone(&self.renderer);
            let throttle = Arc::clone(&self.throttle);
            let request = request.clone();
            let timeout = self.timeout;

            async move {
                throttle.wait().await;
                renderer.screenshot(&request, timeout).await.inspect_err(|e| {
                    warn!(url = %request.url, "Screenshot failed: {}", e);
                })
            }
        };

        Retry::spawn(self.backoff(self.screenshot_retries), action).await
    }
}
