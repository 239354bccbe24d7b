//! Headless Chromium driver over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::session::{BrowserDriver, BrowserLauncher};
use crate::error::BrowserError;

/// Launches one headless Chromium per delivery run.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    pub chrome_path: Option<String>,
    pub navigation_timeout: Duration,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self {
            chrome_path: None,
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, BrowserError> {
        let mut builder = CdpBrowserConfig::builder().request_timeout(self.navigation_timeout);
        if let Some(ref path) = self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!(?event, "browser event");
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("failed to open page: {e}")))?;

        tracing::debug!("Chromium launched");
        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            events,
        }))
    }
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
}

impl ChromiumDriver {
    async fn eval<T: serde::de::DeserializeOwned>(&self, js: String) -> Result<T, BrowserError> {
        self.page
            .evaluate(js.as_str())
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Command(format!("{e:?}")))
    }
}

fn quoted(selector: &str) -> Result<String, BrowserError> {
    serde_json::to_string(selector).map_err(|e| BrowserError::Command(e.to_string()))
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = self.page.wait_for_navigation().await {
            tracing::debug!(url, error = %e, "navigation did not settle");
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| BrowserError::Command(e.to_string()))
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError> {
        self.eval(format!("document.querySelector({}) !== null", quoted(selector)?))
            .await
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let text = serde_json::to_string(text).map_err(|e| BrowserError::Command(e.to_string()))?;
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.focus();
                el.value = {text};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            selector = quoted(selector)?,
        );
        if self.eval::<bool>(js).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn input_value(&mut self, selector: &str) -> Result<Option<String>, BrowserError> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                return el && el.isConnected ? String(el.value ?? '') : null;
            }})()"#,
            quoted(selector)?
        );
        self.eval(js).await
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Command(e.to_string()));
        self.events.abort();
        result
    }
}
