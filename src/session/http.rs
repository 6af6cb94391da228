//! Static-page driver over reqwest
//!
//! The HTTP driver treats the last fetched response as "the page". Clicking an
//! element follows its link (or its nearest descendant link); elements without
//! one cannot be clicked and report [`ClickOutcome::Rejected`]. Rate-limit
//! responses rotate the request identity and back off before retrying.

use crate::config::{Config, IdentityConfig};
use crate::session::document::Document;
use crate::session::driver::{
    count_static, locate_static_target, ClickOutcome, Driver, ElementFilter, Launcher,
    StaticTarget,
};
use crate::session::identity::{backoff_delay, IdentityPool};
use crate::session::SessionError;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const BLANK_PAGE: &str = "about:blank";

/// Builds the shared HTTP client
///
/// The user agent is set per request from the identity pool, not here.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Outcome classes for a single response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    /// Page content is usable (2xx, and 4xx/5xx pages a browser would render)
    Page,
    /// 403/429: rotate identity and retry
    RateLimited,
    /// 502/503/504: retry with the same identity
    Transient,
}

fn classify(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        403 | 429 => StatusClass::RateLimited,
        502..=504 => StatusClass::Transient,
        _ => StatusClass::Page,
    }
}

#[derive(Debug, Clone)]
struct Loaded {
    url: String,
    body: String,
}

/// Driver that fetches pages with plain HTTP requests
pub struct HttpDriver {
    client: Client,
    identity: Arc<IdentityPool>,
    max_retries: u32,
    backoff: Duration,
    page: Option<Loaded>,
}

impl HttpDriver {
    pub fn new(
        client: Client,
        identity: Arc<IdentityPool>,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            client,
            identity,
            max_retries,
            backoff,
            page: None,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Loaded, SessionError> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.get(url);
            let agent = self.identity.pick();
            if let Some(agent) = &agent {
                request = request.header(header::USER_AGENT, agent.as_str());
            }

            let response = request.send().await.map_err(|e| SessionError::Http {
                url: url.to_string(),
                source: e,
            })?;

            let status = response.status();
            match classify(status) {
                StatusClass::Page => {
                    if !status.is_success() {
                        tracing::debug!("{} returned {}", url, status);
                    }
                    let final_url = response.url().to_string();
                    let body = response.text().await.map_err(|e| SessionError::Http {
                        url: url.to_string(),
                        source: e,
                    })?;
                    return Ok(Loaded {
                        url: final_url,
                        body,
                    });
                }
                class => {
                    if attempt >= self.max_retries {
                        return Err(SessionError::Navigation {
                            url: url.to_string(),
                            message: format!("gave up after {} attempts ({})", attempt + 1, status),
                        });
                    }
                    if class == StatusClass::RateLimited {
                        if let Some(agent) = &agent {
                            self.identity.retire(agent);
                        }
                    }
                    let delay = backoff_delay(self.backoff, attempt);
                    tracing::warn!(
                        "{} returned {}, retrying in {}ms (attempt {}/{})",
                        url,
                        status,
                        delay.as_millis(),
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn source(&self) -> &str {
        self.page.as_ref().map(|p| p.body.as_str()).unwrap_or("")
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        let loaded = self.fetch(url).await?;
        self.page = Some(loaded);
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        Ok(self
            .page
            .as_ref()
            .map(|p| p.url.clone())
            .unwrap_or_else(|| BLANK_PAGE.to_string()))
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        Ok(self.source().to_string())
    }

    async fn body_text(&mut self) -> Result<String, SessionError> {
        let url = self.current_url().await?;
        Ok(Document::new(url, self.source()).body_text())
    }

    async fn count(&mut self, selector: &str, _clickable: bool) -> Result<usize, SessionError> {
        count_static(self.source(), selector)
    }

    async fn click(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError> {
        let target = locate_static_target(self.source(), selector, filter)?;
        let href = match target {
            StaticTarget::Missing => return Ok(ClickOutcome::Missing),
            StaticTarget::Rejected => return Ok(ClickOutcome::Rejected),
            StaticTarget::Found { href: None } => {
                tracing::debug!("'{}' has no link to follow on a static page", selector);
                return Ok(ClickOutcome::Rejected);
            }
            StaticTarget::Found { href: Some(href) } => {
                if href.starts_with('#') || href.starts_with("javascript:") {
                    tracing::debug!("'{}' only acts through script on a static page", selector);
                    return Ok(ClickOutcome::Rejected);
                }
                href
            }
        };

        let current = self.current_url().await?;
        let next = Url::parse(&current)
            .and_then(|base| base.join(&href))
            .map_err(|e| SessionError::Navigation {
                url: href.clone(),
                message: e.to_string(),
            })?;
        self.goto(next.as_str()).await?;
        Ok(ClickOutcome::Clicked)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.page = None;
        Ok(())
    }
}

/// Creates HTTP drivers sharing one client and one identity pool
pub struct HttpLauncher {
    client: Client,
    identity: Arc<IdentityPool>,
    max_retries: u32,
    backoff: Duration,
}

impl HttpLauncher {
    pub fn new(client: Client, identity: &IdentityConfig) -> Self {
        Self {
            client,
            identity: Arc::new(IdentityPool::new(identity.user_agents.clone())),
            max_retries: identity.max_rate_limit_retries,
            backoff: identity.rate_limit_backoff(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let client = build_http_client(config.session.navigation_timeout()).map_err(|e| {
            SessionError::Http {
                url: String::new(),
                source: e,
            }
        })?;
        Ok(Self::new(client, &config.identity))
    }

    pub fn identity(&self) -> &Arc<IdentityPool> {
        &self.identity
    }
}

#[async_trait]
impl Launcher for HttpLauncher {
    async fn launch(&self) -> Result<Box<dyn Driver>, SessionError> {
        Ok(Box::new(HttpDriver::new(
            self.client.clone(),
            Arc::clone(&self.identity),
            self.max_retries,
            self.backoff,
        )))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
