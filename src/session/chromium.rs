//! Headless Chrome driver over chromiumoxide
//!
//! Each launch starts (or connects to) its own browser and opens one tab.
//! Element queries and clicks run as page scripts so that interception by an
//! overlay can be detected before the click is dispatched.

use crate::config::Config;
use crate::session::driver::{ClickOutcome, Driver, ElementFilter, Launcher};
use crate::session::SessionError;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const READY_POLL: Duration = Duration::from_millis(100);

/// Maps a CDP failure onto the session taxonomy
///
/// A dropped websocket or a destroyed target means the handle is gone.
fn classify(error: CdpError) -> SessionError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    let lost = ["channel", "closed", "no target", "target crashed", "websocket", "receiver"]
        .iter()
        .any(|needle| lower.contains(needle));
    if lost {
        SessionError::SessionLost(message)
    } else {
        SessionError::Driver(message)
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn count_script(selector: &str, clickable: bool) -> String {
    format!(
        r#"(() => {{
  const all = Array.from(document.querySelectorAll({sel}));
  if (!{clickable}) return all.length;
  return all.filter(e => e.offsetParent !== null && !e.disabled).length;
}})()"#,
        sel = js_string(selector),
        clickable = clickable,
    )
}

fn click_script(selector: &str, filter: Option<&ElementFilter>) -> String {
    let needle = match filter {
        Some(ElementFilter::TextContains(text)) => js_string(text),
        None => "null".to_string(),
    };
    format!(
        r#"(() => {{
  const all = Array.from(document.querySelectorAll({sel}));
  if (all.length === 0) return "missing";
  const needle = {needle};
  const el = all.find(e => needle === null || (e.innerText || e.textContent || "").includes(needle));
  if (!el) return "rejected";
  el.scrollIntoView({{block: "center"}});
  const r = el.getBoundingClientRect();
  if (r.width === 0 && r.height === 0) return "rejected";
  const top = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
  if (top && top !== el && !el.contains(top)) return "intercepted";
  el.click();
  return "clicked";
}})()"#,
        sel = js_string(selector),
        needle = needle,
    )
}

const BODY_TEXT_SCRIPT: &str =
    "document.body ? document.body.innerText : document.documentElement.textContent";

const READY_STATE_SCRIPT: &str = "document.readyState";

/// One browser with one tab
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumDriver {
    async fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        script: String,
    ) -> Result<T, SessionError> {
        let result = self.page.evaluate(script).await.map_err(classify)?;
        result
            .into_value()
            .map_err(|e| SessionError::Driver(format!("unexpected script result: {}", e)))
    }

    /// Polls `document.readyState` until the page finished loading
    async fn wait_until_ready(&self) {
        let deadline = tokio::time::Instant::now() + self.navigation_timeout;
        while tokio::time::Instant::now() < deadline {
            match self.evaluate::<String>(READY_STATE_SCRIPT.to_string()).await {
                Ok(state) if state == "complete" => return,
                Ok(_) => {}
                Err(e) => debug!("Ready state check failed: {}", e),
            }
            tokio::time::sleep(READY_POLL).await;
        }
        debug!("Page not ready after {}s", self.navigation_timeout.as_secs());
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        debug!("Navigating to {}", url);
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: format!("navigate to {}", url),
                seconds: self.navigation_timeout.as_secs(),
            })?
            .map_err(classify)?;
        self.wait_until_ready().await;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(classify)?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        self.page.content().await.map_err(classify)
    }

    async fn body_text(&mut self) -> Result<String, SessionError> {
        self.evaluate(BODY_TEXT_SCRIPT.to_string()).await
    }

    async fn count(&mut self, selector: &str, clickable: bool) -> Result<usize, SessionError> {
        self.evaluate(count_script(selector, clickable)).await
    }

    async fn click(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError> {
        let outcome: String = self.evaluate(click_script(selector, filter)).await?;
        match outcome.as_str() {
            "clicked" => {
                self.wait_until_ready().await;
                Ok(ClickOutcome::Clicked)
            }
            "missing" => Ok(ClickOutcome::Missing),
            "rejected" => Ok(ClickOutcome::Rejected),
            "intercepted" => Ok(ClickOutcome::Intercepted),
            other => Err(SessionError::Driver(format!(
                "unexpected click result '{}'",
                other
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let result = self.browser.close().await.map(|_| ()).map_err(classify);
        self.handler.abort();
        result
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Launches local or remote Chrome instances
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    chrome_args: Vec<String>,
    remote_url: Option<String>,
    navigation_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn from_config(config: &Config) -> Self {
        Self {
            headless: config.session.headless,
            chrome_args: config.session.chrome_args.clone(),
            remote_url: config.session.remote_url.clone(),
            navigation_timeout: config.session.navigation_timeout(),
        }
    }

    async fn start(&self) -> Result<(Browser, chromiumoxide::Handler), SessionError> {
        if let Some(remote) = &self.remote_url {
            info!("Connecting to remote browser at {}", remote);
            let handler_config = HandlerConfig {
                request_timeout: self.navigation_timeout,
                ..Default::default()
            };
            return Browser::connect_with_config(remote.as_str(), handler_config)
                .await
                .map_err(classify);
        }

        info!("Launching browser (headless={})", self.headless);
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.navigation_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        if !self.headless {
            builder = builder.with_head();
        }
        for arg in &self.chrome_args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(SessionError::Driver)?;
        Browser::launch(config).await.map_err(classify)
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn Driver>, SessionError> {
        let (browser, mut handler) = self.start().await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(classify)?;
        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            handler,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_quote_selectors() {
        let script = count_script(r#"a[title="x"]"#, true);
        assert!(script.contains(r#""a[title=\"x\"]""#));
        assert!(script.contains("offsetParent"));

        let filter = ElementFilter::text_contains("Show more");
        let script = click_script("div.more", Some(&filter));
        assert!(script.contains(r#"const needle = "Show more";"#));
        assert!(click_script("div.more", None).contains("const needle = null;"));
    }
}
