use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DiscoverySection;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid start url {0}")]
    InvalidUrl(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser error: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for DiscoveryError {
    fn from(error: chromiumoxide::error::CdpError) -> Self {
        DiscoveryError::Browser(error.to_string())
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Produces the ordered list of locators to acquire.
#[async_trait]
pub trait LocatorSource: Send + Sync {
    async fn locators(&self) -> DiscoveryResult<Vec<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticLocatorSource {
    locators: Vec<String>,
}

impl StaticLocatorSource {
    pub fn new(locators: Vec<String>) -> Self {
        Self { locators }
    }
}

#[async_trait]
impl LocatorSource for StaticLocatorSource {
    async fn locators(&self) -> DiscoveryResult<Vec<String>> {
        Ok(self.locators.clone())
    }
}

/// One locator per line; blank lines and `#` comments are ignored.
#[derive(Debug, Clone)]
pub struct FileLocatorSource {
    path: PathBuf,
}

impl FileLocatorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn parse_locator_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl LocatorSource for FileLocatorSource {
    async fn locators(&self) -> DiscoveryResult<Vec<String>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DiscoveryError::Io {
                source,
                path: self.path.clone(),
            })?;
        Ok(parse_locator_list(&contents))
    }
}

/// Collects link targets from a listing page in headless Chromium.
#[derive(Debug, Clone)]
pub struct BrowserLocatorSource {
    settings: DiscoverySection,
}

impl BrowserLocatorSource {
    pub fn new(settings: DiscoverySection) -> Self {
        Self { settings }
    }

    fn chromium_config(&self) -> DiscoveryResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .no_sandbox()
            .request_timeout(Duration::from_secs(60));
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.settings.chromium_executable {
            builder = builder.chrome_executable(executable);
        }
        let mut args = vec![
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
        ];
        if let Some(agent) = &self.settings.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        builder.args(args).build().map_err(DiscoveryError::Launch)
    }

    fn collect_script(&self) -> String {
        let selector =
            serde_json::to_string(&self.settings.selector).unwrap_or_else(|_| "\"a[href]\"".into());
        format!(
            "(() => Array.from(document.querySelectorAll({selector})).map(el => el.getAttribute('href') || '').filter(Boolean))()"
        )
    }

    async fn collect(&self, browser: &Browser, start: &Url) -> DiscoveryResult<Vec<String>> {
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        let params = NavigateParams::builder()
            .url(start.as_str())
            .build()
            .map_err(DiscoveryError::Browser)?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;

        for _ in 0..self.settings.scroll_steps {
            page.evaluate("window.scrollBy(0, 4000);").await?;
            tokio::time::sleep(Duration::from_millis(self.settings.scroll_pause_ms)).await;
        }
        tokio::time::sleep(Duration::from_millis(self.settings.settle_ms)).await;

        let hrefs: Vec<String> = page
            .evaluate(self.collect_script().as_str())
            .await?
            .into_value()
            .map_err(|err| DiscoveryError::Browser(format!("failed to decode links: {err}")))?;
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed to close discovery page");
        }
        Ok(hrefs)
    }
}

#[async_trait]
impl LocatorSource for BrowserLocatorSource {
    async fn locators(&self) -> DiscoveryResult<Vec<String>> {
        let start = Url::parse(&self.settings.start_url)
            .map_err(|_| DiscoveryError::InvalidUrl(self.settings.start_url.clone()))?;
        info!(url = %start, selector = %self.settings.selector, "collecting locators");

        let (mut browser, mut handler) = Browser::launch(self.chromium_config()?)
            .await
            .map_err(|err| DiscoveryError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let collected = self.collect(&browser, &start).await;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        handler_task.abort();

        let locators = absolutize_locators(&start, collected?, self.settings.limit);
        info!(count = locators.len(), "locators collected");
        Ok(locators)
    }
}

/// Resolves relative links, keeps http(s) only, dedupes in order and caps at `limit` (0 = none).
pub fn absolutize_locators(base: &Url, hrefs: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for href in hrefs {
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            out.push(resolved);
        }
        if limit > 0 && out.len() >= limit {
            break;
        }
    }
    out
}
