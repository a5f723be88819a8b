use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::config::FetcherConfig;
use crate::error::FetchError;

/// Produces the rendered markup of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Starts a browser for a single fetch.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Session: BrowserSession;

    async fn launch(&self, timeout: Duration) -> Result<Self::Session, FetchError>;
}

/// A running browser. Every session handed out by a [`Launcher`] is closed once.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    type Page: RenderedPage;

    async fn open(&self, url: &str) -> Result<Self::Page, FetchError>;

    /// Shuts the browser down, killing it if it has not exited within `grace`.
    async fn close(self, grace: Duration);
}

#[async_trait]
pub trait RenderedPage: Send + Sync {
    async fn check(&self, script: &str) -> Result<bool, FetchError>;

    async fn content(&self) -> Result<String, FetchError>;
}

/// Renders pages in a headless browser, one browser per fetch.
pub struct BrowserFetcher<L = ChromiumLauncher> {
    config: FetcherConfig,
    table_selector: String,
    launcher: L,
}

impl BrowserFetcher {
    pub fn new(config: FetcherConfig, table_selector: impl Into<String>) -> Self {
        Self::with_launcher(config, table_selector, ChromiumLauncher)
    }
}

impl<L: Launcher> BrowserFetcher<L> {
    pub fn with_launcher(config: FetcherConfig, table_selector: impl Into<String>, launcher: L) -> Self {
        Self {
            config,
            table_selector: table_selector.into(),
            launcher,
        }
    }

    /// JS predicate that holds once the history table has rendered enough rows.
    fn readiness_script(&self) -> String {
        // serde_json gives a correctly escaped JS string literal
        let selector = serde_json::to_string(&self.table_selector)
            .unwrap_or_else(|_| "\"table\"".to_string());
        format!(
            "(() => {{ const table = document.querySelector({selector}); \
             return !!table && table.rows.length > {}; }})()",
            self.config.min_rendered_rows
        )
    }

    async fn render(&self, session: &L::Session, url: &str) -> Result<String, FetchError> {
        let navigation_timeout = self.config.navigation_timeout();
        let page = time::timeout(navigation_timeout, session.open(url))
            .await
            .map_err(|_| FetchError::NavigationTimeout(navigation_timeout))??;

        info!("Waiting for table to load...");
        self.wait_for_table(&page).await?;

        // late rows keep arriving for a moment after the threshold is met
        time::sleep(self.config.settle()).await;

        page.content().await
    }

    async fn wait_for_table(&self, page: &<L::Session as BrowserSession>::Page) -> Result<(), FetchError> {
        let script = self.readiness_script();
        let table_timeout = self.config.table_timeout();

        let poll = async {
            loop {
                match page.check(&script).await {
                    Ok(true) => return,
                    Ok(false) => {}
                    // the document may still be swapping in, keep polling until the deadline
                    Err(e) => debug!("Table readiness check failed: {e}"),
                }
                time::sleep(self.config.poll_interval()).await;
            }
        };

        time::timeout(table_timeout, poll)
            .await
            .map_err(|_| FetchError::TableTimeout {
                selector: self.table_selector.clone(),
                timeout: table_timeout,
            })
    }
}

#[async_trait]
impl<L: Launcher> PageSource for BrowserFetcher<L> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        info!("Navigating to {url}");
        let session = self.launcher.launch(self.config.navigation_timeout()).await?;

        let rendered = self.render(&session, url).await;
        session.close(self.config.close_timeout()).await;

        if let Err(e) = &rendered {
            error!("Error during page navigation or extraction: {e}");
        }
        rendered
    }
}

/// Launches a local headless Chromium.
pub struct ChromiumLauncher;

#[async_trait]
impl Launcher for ChromiumLauncher {
    type Session = ChromiumSession;

    async fn launch(&self, timeout: Duration) -> Result<ChromiumSession, FetchError> {
        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .build()
            .map_err(FetchError::Launch)?;

        let (browser, mut handler) = time::timeout(timeout, Browser::launch(config))
            .await
            .map_err(|_| FetchError::Launch(format!("browser did not start within {timeout:?}")))?
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {e}");
                }
            }
        });

        Ok(ChromiumSession { browser, handler })
    }
}

/// A launched browser and the task driving its CDP connection.
pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    type Page = Page;

    async fn open(&self, url: &str) -> Result<Page, FetchError> {
        self.browser
            .new_page(url)
            .await
            .map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn close(mut self, grace: Duration) {
        let browser = &mut self.browser;
        let exited = time::timeout(grace, async {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {e}");
            }
            browser.wait().await
        })
        .await;

        match exited {
            Ok(Ok(_)) => debug!("Browser exited"),
            Ok(Err(e)) => warn!("Failed to reap browser process: {e}"),
            Err(_) => {
                warn!("Browser did not exit within {grace:?}, killing it");
                if let Some(Err(e)) = self.browser.kill().await {
                    warn!("Failed to kill browser: {e}");
                }
            }
        }
    }
}

impl Drop for ChromiumSession {
    // runs on every exit path, including a fetch future dropped mid-flight
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl RenderedPage for Page {
    async fn check(&self, script: &str) -> Result<bool, FetchError> {
        let result = self
            .evaluate(script)
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    async fn content(&self) -> Result<String, FetchError> {
        Page::content(self)
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))
    }
}
