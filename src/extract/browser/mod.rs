use anyhow::{Context, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::PageRenderer;
use crate::config::ConfigError;
use crate::{GranthError, Result};

/// Selector that signals the main content of a page has rendered
const CONTENT_SELECTOR: &str = r#"main, [role="main"], .content, #content"#;

/// Configuration for headless page rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    /// Upper bound for navigation to settle, in seconds
    pub navigation_timeout_seconds: u64,
    /// Fixed pause after navigation so client-side rendering can finish
    pub settle_delay_ms: u64,
    /// Best-effort wait for a main-content element, in seconds
    pub content_wait_seconds: u64,
    /// Maximum number of pages rendered at the same time
    pub max_tabs: usize,
    /// Whether to run the browser in headless mode
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Additional Chrome arguments
    pub chrome_args: Vec<String>,
    /// User agent sent by the browser and the video client
    pub user_agent: String,
}

impl Default for BrowserConfig {
    #[inline]
    fn default() -> Self {
        Self {
            navigation_timeout_seconds: 30,
            settle_delay_ms: 3000,
            content_wait_seconds: 10,
            max_tabs: 4,
            headless: true,
            window_width: 1280,
            window_height: 720,
            chrome_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
                "--disable-extensions".to_string(),
                "--disable-background-timer-throttling".to_string(),
                "--disable-renderer-backgrounding".to_string(),
            ],
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0 Safari/537.36 granthx/0.1.0"
                .to_string(),
        }
    }
}

impl BrowserConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.navigation_timeout_seconds == 0 || self.navigation_timeout_seconds > 300 {
            return Err(ConfigError::InvalidBrowserTimeout(
                self.navigation_timeout_seconds,
            ));
        }

        if self.content_wait_seconds > 300 {
            return Err(ConfigError::InvalidBrowserTimeout(self.content_wait_seconds));
        }

        if self.max_tabs == 0 || self.max_tabs > 16 {
            return Err(ConfigError::InvalidTabLimit(self.max_tabs));
        }

        if !(100..=4000).contains(&self.window_width) || !(100..=4000).contains(&self.window_height)
        {
            return Err(ConfigError::InvalidWindowDimensions(
                self.window_width,
                self.window_height,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[inline]
    pub fn content_wait(&self) -> Duration {
        Duration::from_secs(self.content_wait_seconds)
    }
}

/// Renders JavaScript-heavy pages with a lazily launched headless Chrome.
///
/// A single browser process is shared by all renders; concurrent tabs are
/// bounded by `max_tabs`. A browser that stops responding is relaunched on
/// the next render.
pub struct BrowserClient {
    config: BrowserConfig,
    browser: Arc<Mutex<Option<Browser>>>,
    semaphore: Arc<Semaphore>,
}

impl BrowserClient {
    #[inline]
    pub fn new(config: BrowserConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_tabs.max(1)));
        Self {
            config,
            browser: Arc::new(Mutex::new(None)),
            semaphore,
        }
    }

    #[inline]
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Render a URL and return the HTML after client-side rendering settled
    #[inline]
    pub async fn render_page(&self, url: &Url) -> Result<String> {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| GranthError::Extraction(format!("Browser is shutting down: {e}")))?;

        let config = self.config.clone();
        let browser = Arc::clone(&self.browser);
        let target = url.clone();
        let start_time = Instant::now();

        let content = tokio::task::spawn_blocking(move || {
            render_blocking(&browser, &config, &target)
        })
        .await
        .map_err(|e| GranthError::Extraction(format!("Render task failed: {e}")))?
        .map_err(|e| GranthError::Extraction(format!("Failed to render {url}: {e:#}")))?;

        debug!(
            "Rendered {} ({} bytes, took {:?})",
            url,
            content.len(),
            start_time.elapsed()
        );
        Ok(content)
    }
}

impl Default for BrowserClient {
    #[inline]
    fn default() -> Self {
        Self::new(BrowserConfig::default())
    }
}

#[async_trait]
impl PageRenderer for BrowserClient {
    #[inline]
    async fn render(&self, url: &Url) -> Result<String> {
        self.render_page(url).await
    }
}

fn render_blocking(
    browser: &Mutex<Option<Browser>>,
    config: &BrowserConfig,
    url: &Url,
) -> anyhow::Result<String> {
    let tab = match open_tab(browser, config) {
        Ok(tab) => tab,
        Err(e) => {
            warn!("Browser tab creation failed, relaunching browser: {:#}", e);
            reset_browser(browser);
            open_tab(browser, config)?
        }
    };

    let result = load_page(&tab, config, url);

    if let Err(e) = tab.close(false) {
        debug!("Failed to close tab for {}: {}", url, e);
    }

    result
}

fn load_page(tab: &Tab, config: &BrowserConfig, url: &Url) -> anyhow::Result<String> {
    let url_str = url.as_str();
    debug!("Navigating to URL: {}", url_str);

    tab.set_default_timeout(config.navigation_timeout());
    tab.navigate_to(url_str)
        .with_context(|| format!("Failed to navigate to {}", url_str))?;
    tab.wait_until_navigated()
        .with_context(|| format!("Navigation to {} did not complete", url_str))?;

    std::thread::sleep(config.settle_delay());

    if let Err(e) = tab.wait_for_element_with_custom_timeout(CONTENT_SELECTOR, config.content_wait())
    {
        debug!("No main content element on {}: {}", url_str, e);
    }

    tab.get_content()
        .with_context(|| format!("Failed to get content of {}", url_str))
}

fn open_tab(browser: &Mutex<Option<Browser>>, config: &BrowserConfig) -> anyhow::Result<Arc<Tab>> {
    let browser = {
        let mut guard = browser
            .lock()
            .map_err(|e| anyhow!("Browser lock poisoned: {}", e))?;
        match guard.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let launched = launch(config)?;
                *guard = Some(launched.clone());
                launched
            }
        }
    };

    let tab = browser
        .new_tab()
        .with_context(|| "Failed to create new browser tab")?;

    tab.set_user_agent(&config.user_agent, None, None)
        .with_context(|| "Failed to set user agent")?;

    Ok(tab)
}

fn launch(config: &BrowserConfig) -> anyhow::Result<Browser> {
    let args: Vec<&OsStr> = config.chrome_args.iter().map(OsStr::new).collect();
    let launch_options = LaunchOptions {
        headless: config.headless,
        window_size: Some((config.window_width, config.window_height)),
        args,
        idle_browser_timeout: Duration::from_secs(300),
        ..Default::default()
    };

    let browser =
        Browser::new(launch_options).with_context(|| "Failed to launch browser instance")?;
    info!("Launched headless browser");
    Ok(browser)
}

fn reset_browser(browser: &Mutex<Option<Browser>>) {
    if let Ok(mut guard) = browser.lock() {
        *guard = None;
    }
}

#[cfg(test)]
mod tests;
