use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::utils::ScrapeError;

/// Window size every pooled browser is launched with.
pub const VIEWPORT: (u32, u32) = (1280, 1024);

const SCREENSHOT_SETTLE: Duration = Duration::from_secs(5);

/// The page-rendering capability the strategies consume. Implementations may
/// retry internally; callers only ever see the terminal result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, ScrapeError>;

    async fn screenshot(&self, request: &ScreenshotRequest, timeout: Duration) -> Result<Vec<u8>, ScrapeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRequest {
    pub url: String,
    pub locale: Option<String>,
    /// `name=value` pairs sent as a `Cookie` header with the navigation.
    pub cookies: Vec<(String, String)>,
}

impl ScreenshotRequest {
    /// Seeds the cookies and locale some storefronts need before they show
    /// prices instead of a language picker.
    pub fn for_url(url: &str) -> Self {
        let mut request = Self {
            url: url.to_string(),
            locale: Some("en-MY".to_string()),
            cookies: Vec::new(),
        };

        if url.to_lowercase().contains("shopee") {
            request.cookies.push(("SPC_F".to_string(), "en".to_string()));
            request.cookies.push(("language".to_string(), "en".to_string()));
        }

        request
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

struct BrowserPool {
    browsers: Vec<Arc<Browser>>,
    current_index: AtomicUsize,
}

impl BrowserPool {
    fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let mut browsers = Vec::new();

        // Never more than 3 Chrome processes, whatever the worker count
        for _ in 0..config.workers.clamp(1, 3) {
            let mut launch_options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .window_size(Some(VIEWPORT))
                .args(vec![
                    OsStr::new("--no-sandbox"),
                    OsStr::new("--disable-dev-shm-usage"),
                    OsStr::new("--disable-gpu"),
                    OsStr::new("--disable-extensions"),
                    OsStr::new("--disable-background-timer-throttling"),
                    OsStr::new("--disable-renderer-backgrounding"),
                ])
                .build()
                .map_err(|e| ScrapeError::Configuration(format!("Failed to create launch options: {}", e)))?;

            if let Some(chrome_path) = &config.chrome_path {
                launch_options.path = Some(PathBuf::from(chrome_path));
            }

            let browser = Browser::new(launch_options)
                .map_err(|e| ScrapeError::Transport(format!("Failed to launch browser: {}", e)))?;

            browsers.push(Arc::new(browser));
        }

        Ok(Self {
            browsers,
            current_index: AtomicUsize::new(0),
        })
    }

    fn get_browser(&self) -> Arc<Browser> {
        let index = self.current_index.fetch_add(1, Ordering::Relaxed) % self.browsers.len();
        self.browsers[index].clone()
    }
}

/// Headless Chrome behind the [`PageRenderer`] seam.
pub struct ChromeRenderer {
    pool: Arc<BrowserPool>,
    user_agent: String,
    settle: Duration,
}

impl ChromeRenderer {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let pool = BrowserPool::new(config)?;
        info!("Launched {} headless browser(s)", pool.browsers.len());

        Ok(Self {
            pool: Arc::new(pool),
            user_agent: config.user_agent.clone(),
            settle: Duration::from_millis(config.settle_ms),
        })
    }

    /// Runs a blocking CDP session off the async runtime, bounded by `timeout`.
    async fn run_blocking<T, F>(&self, url: &str, timeout: Duration, job: F) -> Result<T, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, ScrapeError> + Send + 'static,
    {
        let browser = self.pool.get_browser();
        let user_agent = self.user_agent.clone();

        let task = tokio::task::spawn_blocking(move || {
            let tab = browser
                .new_tab()
                .map_err(|e| ScrapeError::Transport(format!("Failed to create tab: {}", e)))?;
            tab.set_default_timeout(timeout);
            tab.set_user_agent(&user_agent, None, None)
                .map_err(|e| ScrapeError::Transport(format!("Failed to set user agent: {}", e)))?;

            let result = job(tab.clone());
            let _ = tab.close(true);
            result
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ScrapeError::Transport(format!("Render task failed: {}", join_error))),
            Err(_) => Err(ScrapeError::Transport(format!(
                "Rendering {} timed out after {}s",
                url,
                timeout.as_secs()
            ))),
        }
    }
}

fn navigate(tab: &Tab, url: &str) -> Result<(), ScrapeError> {
    tab.navigate_to(url)
        .map_err(|e| ScrapeError::Transport(format!("Navigation failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| ScrapeError::Transport(format!("Page load failed: {}", e)))?;
    Ok(())
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, ScrapeError> {
        let target = url.to_string();
        let settle = self.settle;

        let html = self
            .run_blocking(url, timeout, move |tab| {
                navigate(&tab, &target)?;
                // Prices on these storefronts are filled in by JavaScript
                std::thread::sleep(settle);
                tab.get_content()
                    .map_err(|e| ScrapeError::Transport(format!("Failed to get page content: {}", e)))
            })
            .await?;

        debug!(url = %url, bytes = html.len(), "Rendered page");
        Ok(html)
    }

    async fn screenshot(&self, request: &ScreenshotRequest, timeout: Duration) -> Result<Vec<u8>, ScrapeError> {
        let request = request.clone();
        let url = request.url.clone();

        let png = self
            .run_blocking(&url, timeout, move |tab| {
                let mut headers = HashMap::new();
                let cookie = request.cookie_header();
                if let Some(cookie) = cookie.as_deref() {
                    headers.insert("Cookie", cookie);
                }
                if let Some(locale) = request.locale.as_deref() {
                    headers.insert("Accept-Language", locale);
                }
                if !headers.is_empty() {
                    tab.set_extra_http_headers(headers)
                        .map_err(|e| ScrapeError::Transport(format!("Failed to set headers: {}", e)))?;
                }

                navigate(&tab, &request.url)?;
                std::thread::sleep(SCREENSHOT_SETTLE);

                tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| ScrapeError::Transport(format!("Screenshot capture failed: {}", e)))
            })
            .await?;

        debug!(url = %url, bytes = png.len(), "Captured screenshot");
        Ok(png)
    }
}
