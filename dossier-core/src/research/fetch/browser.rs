//! Headless Chrome page loader for JavaScript-heavy sites.
//!
//! Requires the `browser` feature flag:
//! ```toml
//! dossier-core = { path = "dossier-core", features = ["browser"] }
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PageLoader, RawPage, check_scheme};
use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};

/// Renders pages in a shared headless Chrome and returns the final DOM.
pub struct BrowserPageLoader {
    browser: Arc<Mutex<chromiumoxide::Browser>>,
    timeout: Duration,
    _handler: tokio::task::JoinHandle<()>,
}

impl BrowserPageLoader {
    /// Launch Chrome/Chromium.
    pub async fn launch(config: &FetchConfig) -> Result<Self, ConfigError> {
        let chrome_path = find_chrome_binary(config.chrome_path.as_ref())?;

        let user_data_dir = std::env::temp_dir().join(format!("dossier-chrome-{}", std::process::id()));
        let browser_config = chromiumoxide::BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-dev-shm-usage")
            .user_data_dir(user_data_dir)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to build browser config: {}", e),
            })?;

        let (browser, mut handler) = chromiumoxide::Browser::launch(browser_config)
            .await
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to launch Chrome: {}", e),
            })?;

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            timeout: Duration::from_secs(config.timeout_secs),
            _handler: handler_task,
        })
    }

    async fn render(&self, url: &str) -> Result<RawPage, FetchError> {
        let render_err = |e: chromiumoxide::error::CdpError| FetchError::Render {
            url: url.into(),
            message: e.to_string(),
        };

        let page = {
            let browser = self.browser.lock().await;
            browser.new_page(url).await.map_err(render_err)?
        };
        page.wait_for_navigation().await.map_err(render_err)?;
        let body = page.content().await.map_err(render_err)?;
        let final_url = page
            .url()
            .await
            .map_err(render_err)?
            .unwrap_or_else(|| url.to_string());
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "Failed to close rendered page");
        }

        Ok(RawPage {
            final_url,
            content_type: "text/html".into(),
            body,
        })
    }
}

#[async_trait]
impl PageLoader for BrowserPageLoader {
    async fn load(&self, url: &str) -> Result<RawPage, FetchError> {
        check_scheme(url)?;
        match tokio::time::timeout(self.timeout, self.render(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Render {
                url: url.into(),
                message: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }

    fn name(&self) -> &str {
        "browser"
    }
}

impl Drop for BrowserPageLoader {
    fn drop(&mut self) {
        self._handler.abort();
    }
}

fn find_chrome_binary(configured: Option<&PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = configured
        && path.exists()
    {
        return Ok(path.clone());
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    };

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| ConfigError::Invalid {
            message: "No Chrome/Chromium binary found; set fetch.chrome_path".into(),
        })
}
