//! Session engine
//!
//! A [`Session`] owns one automation handle and layers the resilient
//! primitives every scraper relies on:
//!
//! - navigation that relaunches the backend once if it died
//! - a memoized parsed view of the current page
//! - bounded element waits that degrade to "absent" instead of erroring
//! - clicks that dismiss an intercepting overlay once and retry
//! - repeated clicks for "show more" expanders
//! - side requests that restore the previous location afterwards
//!
//! Sessions are not shareable; each worker builds its own.

pub mod document;
pub mod driver;
pub mod http;
pub mod identity;
pub mod scripted;

#[cfg(feature = "browser")]
pub mod chromium;

pub use document::{Document, Element};
pub use driver::{ClickOutcome, Driver, ElementFilter, Launcher};
pub use http::{HttpDriver, HttpLauncher};
pub use identity::IdentityPool;
pub use scripted::{ClickEffect, ScriptedDriver, ScriptedLauncher, ScriptedSite};

use crate::config::{Config, DriverKind};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised by the session engine and its drivers
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Click on '{selector}' blocked by an overlay")]
    InteractionBlocked { selector: String },

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("HTTP error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Browser error: {0}")]
    Driver(String),

    #[error("{0} driver is not available in this build")]
    Unsupported(&'static str),
}

impl SessionError {
    /// True when the automation handle itself is gone and must be relaunched
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }
}

/// Timing and markup knobs of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub reinit_delay: Duration,
    pub click_settle: Duration,
    pub max_click_rounds: usize,
    /// Selector of the overlay close control tried once on an intercepted click
    pub overlay_selector: String,
    pub home_url: String,
    /// Search endpoint template with one `{}`
    pub search_url: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wait_timeout: config.session.wait_timeout(),
            poll_interval: config.session.poll_interval(),
            reinit_delay: config.session.reinit_delay(),
            click_settle: config.session.click_settle(),
            max_click_rounds: config.session.max_click_rounds,
            overlay_selector: config.selectors.overlay_close.clone(),
            home_url: config.site.base_url.clone(),
            search_url: config.site.search_url.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where a new session starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTarget {
    /// Site root
    Home,
    Url(String),
    /// Run the site search for a term (a part id lands on its page)
    Search(String),
}

/// Builds the launcher configured for this process
pub fn launcher_from_config(config: &Config) -> Result<Arc<dyn Launcher>, SessionError> {
    match config.session.driver {
        DriverKind::Http => Ok(Arc::new(HttpLauncher::from_config(config)?)),
        #[cfg(feature = "browser")]
        DriverKind::Chromium => Ok(Arc::new(chromium::ChromiumLauncher::from_config(config))),
        #[cfg(not(feature = "browser"))]
        DriverKind::Chromium => Err(SessionError::Unsupported("chromium")),
    }
}

/// One automation handle plus the navigation state around it
pub struct Session {
    launcher: Arc<dyn Launcher>,
    driver: Box<dyn Driver>,
    settings: SessionSettings,
    /// Last URL passed to a navigation
    requested: Option<String>,
    /// URL the last navigation landed on
    landed: Option<String>,
    /// Parsed view of the current page; `None` once the page may have changed
    document: Option<Document>,
    /// Location saved by a side request
    previous: Option<String>,
}

impl Session {
    /// Launches a driver without navigating anywhere
    pub async fn launch(
        launcher: Arc<dyn Launcher>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let driver = launcher.launch().await?;
        tracing::debug!("Launched {} session", launcher.name());
        Ok(Self {
            launcher,
            driver,
            settings,
            requested: None,
            landed: None,
            document: None,
            previous: None,
        })
    }

    /// Launches a driver and navigates to `target`
    pub async fn open(
        launcher: Arc<dyn Launcher>,
        settings: SessionSettings,
        target: OpenTarget,
    ) -> Result<Self, SessionError> {
        let mut session = Self::launch(launcher, settings).await?;
        let url = session.target_url(&target);
        session.navigate(&url).await?;
        Ok(session)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// URL for an open target
    pub fn target_url(&self, target: &OpenTarget) -> String {
        match target {
            OpenTarget::Home => self.settings.home_url.clone(),
            OpenTarget::Url(url) => url.clone(),
            OpenTarget::Search(term) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(term.as_bytes()).collect();
                self.settings.search_url.replacen("{}", &encoded, 1)
            }
        }
    }

    // ===== Navigation =====

    /// Navigates to `url`, relaunching the driver once if the session died
    pub async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        match self.driver.goto(url).await {
            Ok(()) => {}
            Err(e) if e.is_session_lost() => {
                tracing::warn!("Session lost while loading {}: {}; reinitializing", url, e);
                self.reinitialize().await?;
                self.driver.goto(url).await?;
            }
            Err(e) => return Err(e),
        }

        self.requested = Some(url.to_string());
        self.landed = Some(self.driver.current_url().await?);
        self.document = None;
        Ok(())
    }

    /// Tears the driver down and launches a fresh one
    async fn reinitialize(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.driver.close().await {
            tracing::debug!("Ignoring close error on dead session: {}", e);
        }
        tokio::time::sleep(self.settings.reinit_delay).await;
        self.driver = self.launcher.launch().await?;
        self.requested = None;
        self.landed = None;
        self.document = None;
        Ok(())
    }

    fn is_at(&self, url: &str) -> bool {
        self.requested.as_deref() == Some(url) || self.landed.as_deref() == Some(url)
    }

    /// URL the session currently shows
    pub async fn current_url(&mut self) -> Result<String, SessionError> {
        self.driver.current_url().await
    }

    /// Last landed location, if any navigation happened
    pub fn location(&self) -> Option<&str> {
        self.landed.as_deref().or(self.requested.as_deref())
    }

    // ===== Parsing =====

    /// Parsed view of `url`, navigating only if the session is elsewhere
    pub async fn parse(&mut self, url: &str) -> Result<&Document, SessionError> {
        if !self.is_at(url) {
            self.navigate(url).await?;
        }
        self.document().await
    }

    /// Re-reads the current page without navigating
    pub async fn reparse(&mut self) -> Result<&Document, SessionError> {
        self.document = None;
        self.document().await
    }

    async fn document(&mut self) -> Result<&Document, SessionError> {
        if self.document.is_none() {
            let url = self.driver.current_url().await?;
            let source = self.driver.page_source().await?;
            self.document = Some(Document::new(url, source));
        }
        self.document
            .as_ref()
            .ok_or_else(|| SessionError::Driver("page snapshot unavailable".to_string()))
    }

    // ===== Waiting =====

    /// All elements matching `selector` once at least one appears
    ///
    /// Returns an empty list when the timeout passes first.
    pub async fn wait_for_all(
        &mut self,
        selector: &str,
        clickable: bool,
    ) -> Result<Vec<Element>, SessionError> {
        document::parse_selector(selector)?;
        let deadline = Instant::now() + self.settings.wait_timeout;

        loop {
            if self.driver.count(selector, clickable).await? > 0 {
                return self.reparse().await?.select(selector);
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    "'{}' not present after {}ms",
                    selector,
                    self.settings.wait_timeout.as_millis()
                );
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// First element matching `selector`, or `None` after the timeout
    pub async fn wait_for_one(
        &mut self,
        selector: &str,
        clickable: bool,
    ) -> Result<Option<Element>, SessionError> {
        Ok(self
            .wait_for_all(selector, clickable)
            .await?
            .into_iter()
            .next())
    }

    /// `wait_for_one` on `url`, navigating there first if needed
    pub async fn get_item(
        &mut self,
        url: &str,
        selector: &str,
    ) -> Result<Option<Element>, SessionError> {
        self.parse(url).await?;
        self.wait_for_one(selector, false).await
    }

    /// `wait_for_all` on `url`, navigating there first if needed
    pub async fn get_items(
        &mut self,
        url: &str,
        selector: &str,
    ) -> Result<Vec<Element>, SessionError> {
        self.parse(url).await?;
        self.wait_for_all(selector, false).await
    }

    // ===== Interaction =====

    /// Clicks the first element matching `selector` (and `filter`) on `url`
    ///
    /// An intercepted click triggers one overlay dismissal and one retry.
    /// Returns false when the element is absent, rejected by the filter, or
    /// still intercepted after the retry.
    pub async fn click(
        &mut self,
        url: &str,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<bool, SessionError> {
        let outcome = self.click_outcome(url, selector, filter).await?;
        Ok(outcome == ClickOutcome::Clicked)
    }

    /// Like [`Session::click`], but an overlay that survives the retry is an error
    pub async fn click_unblocked(
        &mut self,
        url: &str,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<bool, SessionError> {
        self.parse(url).await?;
        self.click_current_unblocked(selector, filter).await
    }

    /// [`Session::click_unblocked`] on whatever page the session shows now
    ///
    /// Used to step through pages a previous click navigated to.
    pub async fn click_current_unblocked(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<bool, SessionError> {
        match self.click_here(selector, filter).await? {
            ClickOutcome::Clicked => Ok(true),
            ClickOutcome::Missing | ClickOutcome::Rejected => Ok(false),
            ClickOutcome::Intercepted => Err(SessionError::InteractionBlocked {
                selector: selector.to_string(),
            }),
        }
    }

    async fn click_outcome(
        &mut self,
        url: &str,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError> {
        self.parse(url).await?;
        self.click_here(selector, filter).await
    }

    async fn click_here(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError> {
        let mut outcome = self.driver.click(selector, filter).await?;
        if outcome == ClickOutcome::Intercepted {
            tracing::debug!("Click on '{}' intercepted, dismissing overlay", selector);
            self.dismiss_overlay().await?;
            outcome = self.driver.click(selector, filter).await?;
            if outcome != ClickOutcome::Clicked {
                tracing::warn!(
                    "Click on '{}' still failing after overlay dismissal ({:?})",
                    selector,
                    outcome
                );
            }
        }
        if outcome == ClickOutcome::Clicked {
            self.after_click().await?;
        }
        Ok(outcome)
    }

    /// Clicks the configured overlay close control; true if it was there
    pub async fn dismiss_overlay(&mut self) -> Result<bool, SessionError> {
        let selector = self.settings.overlay_selector.clone();
        match self.driver.click(&selector, None).await? {
            ClickOutcome::Clicked => {
                self.document = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// A click may navigate or rewrite the page; refresh what we know
    ///
    /// After a navigating click the session is no longer at the URL it was
    /// asked for, so a later `parse` of that URL goes back to it.
    async fn after_click(&mut self) -> Result<(), SessionError> {
        self.document = None;
        let current = self.driver.current_url().await?;
        if self.landed.as_deref() != Some(current.as_str()) {
            self.requested = Some(current.clone());
        }
        self.landed = Some(current);
        Ok(())
    }

    /// Keeps clicking the first matching element until none is left
    ///
    /// Bounded by `max_click_rounds`; returns the number of successful clicks.
    pub async fn click_repeatedly(
        &mut self,
        url: &str,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<usize, SessionError> {
        self.parse(url).await?;

        let mut clicks = 0;
        while clicks < self.settings.max_click_rounds {
            if self.click_here(selector, filter).await? != ClickOutcome::Clicked {
                return Ok(clicks);
            }
            clicks += 1;
            tokio::time::sleep(self.settings.click_settle).await;
        }

        tracing::warn!(
            "'{}' still present after {} clicks, giving up",
            selector,
            clicks
        );
        Ok(clicks)
    }

    // ===== Side Requests =====

    /// Loads a one-off endpoint, reads its body, and returns to where we were
    ///
    /// The previous location is restored even if reading the body fails.
    pub async fn side_request(&mut self, url: &str) -> Result<String, SessionError> {
        let origin = match self.location() {
            Some(location) => location.to_string(),
            None => self.driver.current_url().await?,
        };
        self.previous = Some(origin);

        let body = match self.navigate(url).await {
            Ok(()) => self.driver.body_text().await,
            Err(e) => Err(e),
        };
        self.restore_previous_location().await?;
        body
    }

    /// Navigates back to the location saved by the last side request
    pub async fn restore_previous_location(&mut self) -> Result<(), SessionError> {
        if let Some(previous) = self.previous.take() {
            if previous != "about:blank" {
                self.navigate(&previous).await?;
            }
        }
        Ok(())
    }

    /// Shuts the driver down
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.driver.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            wait_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(10),
            reinit_delay: Duration::from_millis(1),
            click_settle: Duration::from_millis(1),
            max_click_rounds: 5,
            overlay_selector: "button.close".to_string(),
            home_url: "https://s.test/".to_string(),
            search_url: "https://s.test/search?q={}".to_string(),
        }
    }

    async fn session(site: &ScriptedSite) -> Session {
        Session::launch(Arc::new(site.launcher()), settings())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_search_follows_redirect() {
        let site = ScriptedSite::new();
        site.page("https://s.test/PS1.htm", "<html><body><h1>Part</h1></body></html>")
            .redirect("https://s.test/search?q=PS1", "https://s.test/PS1.htm");

        let mut session = Session::open(
            Arc::new(site.launcher()),
            settings(),
            OpenTarget::Search("PS1".into()),
        )
        .await
        .unwrap();
        assert_eq!(session.current_url().await.unwrap(), "https://s.test/PS1.htm");
        assert_eq!(session.location(), Some("https://s.test/PS1.htm"));
    }

    #[tokio::test]
    async fn test_parse_is_memoized() {
        let site = ScriptedSite::new();
        site.page("https://s.test/a", "<html><body><p>A</p></body></html>");

        let mut session = session(&site).await;
        session.parse("https://s.test/a").await.unwrap();
        session.parse("https://s.test/a").await.unwrap();
        let doc = session.parse("https://s.test/a").await.unwrap();
        assert_eq!(doc.select("p").unwrap().len(), 1);
        assert_eq!(site.navigation_count(), 1);
    }

    #[tokio::test]
    async fn test_reinitializes_once_after_crash() {
        let site = ScriptedSite::new();
        site.page("https://s.test/a", "<html><body><p>A</p></body></html>")
            .crash_next(1);

        let mut session = session(&site).await;
        session.navigate("https://s.test/a").await.unwrap();
        assert_eq!(site.launches(), 2);
        assert_eq!(session.current_url().await.unwrap(), "https://s.test/a");
    }

    #[tokio::test]
    async fn test_second_crash_propagates() {
        let site = ScriptedSite::new();
        site.crash_next(2);

        let mut session = session(&site).await;
        let err = session.navigate("https://s.test/a").await.unwrap_err();
        assert!(err.is_session_lost());
        assert_eq!(site.launches(), 2);
    }

    #[tokio::test]
    async fn test_wait_times_out_to_empty() {
        let site = ScriptedSite::new();
        site.page("https://s.test/a", "<html><body><p>A</p></body></html>");

        let mut session = session(&site).await;
        assert!(session
            .get_item("https://s.test/a", "span.price")
            .await
            .unwrap()
            .is_none());
        assert!(session
            .get_items("https://s.test/a", "span.price")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            session
                .get_item("https://s.test/a", "p")
                .await
                .unwrap()
                .unwrap()
                .text(),
            "A"
        );
    }

    #[tokio::test]
    async fn test_click_dismisses_overlay_once() {
        let site = ScriptedSite::new();
        site.page(
            "https://s.test/a",
            "<html><body><a class='next' href='/b'>Next</a></body></html>",
        )
        .page("https://s.test/b", "<html><body><p>B</p></body></html>")
        .show_overlay("button.close");

        let mut session = session(&site).await;
        assert!(session.click("https://s.test/a", "a.next", None).await.unwrap());
        assert_eq!(session.current_url().await.unwrap(), "https://s.test/b");
        assert!(!site.overlay_active());
    }

    #[tokio::test]
    async fn test_parse_returns_after_navigating_click() {
        let site = ScriptedSite::new();
        site.page(
            "https://s.test/a",
            "<html><body><a class='next' href='/b'>Next</a><p>A</p></body></html>",
        )
        .page("https://s.test/b", "<html><body><p>B</p></body></html>");

        let mut session = session(&site).await;
        assert!(session.click("https://s.test/a", "a.next", None).await.unwrap());
        assert_eq!(session.location(), Some("https://s.test/b"));

        let doc = session.parse("https://s.test/a").await.unwrap();
        assert_eq!(doc.select("a.next").unwrap().len(), 1);
        assert_eq!(
            site.navigations(),
            vec!["https://s.test/a", "https://s.test/b", "https://s.test/a"]
        );

        // Parsing where the click landed stays put
        session.click("https://s.test/a", "a.next", None).await.unwrap();
        session.parse("https://s.test/b").await.unwrap();
        assert_eq!(site.navigation_count(), 4);
    }

    #[tokio::test]
    async fn test_click_fails_when_overlay_cannot_be_dismissed() {
        let site = ScriptedSite::new();
        site.page(
            "https://s.test/a",
            "<html><body><a class='next' href='/b'>Next</a></body></html>",
        )
        .show_overlay("button.elsewhere");

        let mut session = session(&site).await;
        assert!(!session.click("https://s.test/a", "a.next", None).await.unwrap());
        assert_eq!(session.current_url().await.unwrap(), "https://s.test/a");

        let err = session
            .click_unblocked("https://s.test/a", "a.next", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InteractionBlocked { .. }));
    }

    #[tokio::test]
    async fn test_click_missing_or_rejected() {
        let site = ScriptedSite::new();
        site.page(
            "https://s.test/a",
            "<html><body><span class='more'>Show less</span></body></html>",
        );

        let mut session = session(&site).await;
        assert!(!session.click("https://s.test/a", "a.none", None).await.unwrap());
        let filter = ElementFilter::text_contains("Show more");
        assert!(!session
            .click("https://s.test/a", "span.more", Some(&filter))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_click_repeatedly_until_gone() {
        let site = ScriptedSite::new();
        let page = |n: usize, more: bool| {
            let items = "<li>x</li>".repeat(n);
            let button = if more { "<span class='more'>Show more</span>" } else { "" };
            format!("<html><body><ul>{}</ul>{}</body></html>", items, button)
        };
        site.page("https://s.test/a", page(1, true)).on_click(
            "https://s.test/a",
            "span.more",
            vec![
                ClickEffect::Replace(page(2, true)),
                ClickEffect::Replace(page(3, false)),
            ],
        );

        let mut session = session(&site).await;
        let filter = ElementFilter::text_contains("Show more");
        let clicks = session
            .click_repeatedly("https://s.test/a", "span.more", Some(&filter))
            .await
            .unwrap();
        assert_eq!(clicks, 2);
        let doc = session.parse("https://s.test/a").await.unwrap();
        assert_eq!(doc.select("li").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_click_repeatedly_is_bounded() {
        let site = ScriptedSite::new();
        site.page(
            "https://s.test/a",
            "<html><body><span class='more'>Show more</span></body></html>",
        );

        let mut session = session(&site).await;
        let clicks = session
            .click_repeatedly("https://s.test/a", "span.more", None)
            .await
            .unwrap();
        assert_eq!(clicks, 5);
    }

    #[tokio::test]
    async fn test_side_request_restores_location() {
        let site = ScriptedSite::new();
        site.page("https://s.test/a", "<html><body><p>A</p></body></html>")
            .page("https://s.test/api", r#"{"ok": true}"#);

        let mut session = session(&site).await;
        session.navigate("https://s.test/a").await.unwrap();
        let body = session.side_request("https://s.test/api").await.unwrap();
        assert_eq!(body, r#"{"ok": true}"#);
        assert_eq!(session.current_url().await.unwrap(), "https://s.test/a");
        assert_eq!(
            site.navigations(),
            vec!["https://s.test/a", "https://s.test/api", "https://s.test/a"]
        );
    }
}
