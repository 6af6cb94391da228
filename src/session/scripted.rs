//! In-memory replay site
//!
//! [`ScriptedSite`] serves canned pages and click effects to any number of
//! [`ScriptedDriver`]s. It records every navigation so callers can check how a
//! scraper walked the site without a browser or a network.

use crate::session::document::Document;
use crate::session::driver::{
    count_static, locate_static_target, ClickOutcome, Driver, ElementFilter, Launcher,
    StaticTarget,
};
use crate::session::SessionError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

/// What a scripted click does to the page
#[derive(Debug, Clone)]
pub enum ClickEffect {
    /// Replace the current page's HTML in place (expanders, in-page pagination)
    Replace(String),
    /// Navigate to another URL
    Navigate(String),
}

#[derive(Debug, Default)]
struct SiteState {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    effects: HashMap<(String, String), VecDeque<ClickEffect>>,
    overlay: Option<String>,
    crashes_pending: usize,
    navigations: Vec<String>,
    launches: usize,
}

/// Shared handle to a scripted site
#[derive(Debug, Clone, Default)]
pub struct ScriptedSite {
    state: Arc<Mutex<SiteState>>,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves `html` at `url`
    pub fn page(&self, url: impl Into<String>, html: impl Into<String>) -> &Self {
        self.lock().pages.insert(url.into(), html.into());
        self
    }

    /// Lands navigations to `from` on `to`
    pub fn redirect(&self, from: impl Into<String>, to: impl Into<String>) -> &Self {
        self.lock().redirects.insert(from.into(), to.into());
        self
    }

    /// Queues effects for successive clicks on `selector` while at `url`
    ///
    /// Once the queue is empty, clicks follow the element's link if it has one
    /// and otherwise leave the page unchanged.
    pub fn on_click(
        &self,
        url: impl Into<String>,
        selector: impl Into<String>,
        effects: Vec<ClickEffect>,
    ) -> &Self {
        self.lock()
            .effects
            .insert((url.into(), selector.into()), effects.into());
        self
    }

    /// Shows an overlay that intercepts every click until `dismiss_selector` is clicked
    pub fn show_overlay(&self, dismiss_selector: impl Into<String>) -> &Self {
        self.lock().overlay = Some(dismiss_selector.into());
        self
    }

    pub fn overlay_active(&self) -> bool {
        self.lock().overlay.is_some()
    }

    /// Makes the next `n` navigations fail as if the browser window died
    pub fn crash_next(&self, n: usize) -> &Self {
        self.lock().crashes_pending = n;
        self
    }

    /// Every URL requested so far, in order
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn navigation_count(&self) -> usize {
        self.lock().navigations.len()
    }

    /// Navigations whose URL contains `fragment`
    pub fn navigations_matching(&self, fragment: &str) -> usize {
        self.lock()
            .navigations
            .iter()
            .filter(|u| u.contains(fragment))
            .count()
    }

    pub fn launches(&self) -> usize {
        self.lock().launches
    }

    pub fn launcher(&self) -> ScriptedLauncher {
        ScriptedLauncher { site: self.clone() }
    }
}

/// One tab on a scripted site
#[derive(Debug)]
pub struct ScriptedDriver {
    site: ScriptedSite,
    url: String,
    html: String,
    closed: bool,
}

impl ScriptedDriver {
    pub fn new(site: ScriptedSite) -> Self {
        Self {
            site,
            url: "about:blank".to_string(),
            html: BLANK_PAGE.to_string(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::SessionLost("driver was closed".to_string()));
        }
        Ok(())
    }

    fn load(&mut self, url: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let mut state = self.site.lock();
        state.navigations.push(url.to_string());

        if state.crashes_pending > 0 {
            state.crashes_pending -= 1;
            drop(state);
            self.closed = true;
            return Err(SessionError::SessionLost(format!(
                "window closed while loading {}",
                url
            )));
        }

        let landed = state
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        self.html = state
            .pages
            .get(&landed)
            .cloned()
            .unwrap_or_else(|| BLANK_PAGE.to_string());
        self.url = landed;
        Ok(())
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        self.load(url)
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        self.ensure_open()?;
        Ok(self.url.clone())
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        self.ensure_open()?;
        Ok(self.html.clone())
    }

    async fn body_text(&mut self) -> Result<String, SessionError> {
        self.ensure_open()?;
        Ok(Document::new(self.url.as_str(), self.html.as_str()).body_text())
    }

    async fn count(&mut self, selector: &str, _clickable: bool) -> Result<usize, SessionError> {
        self.ensure_open()?;
        count_static(&self.html, selector)
    }

    async fn click(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError> {
        self.ensure_open()?;

        {
            let mut state = self.site.lock();
            if let Some(dismiss) = state.overlay.clone() {
                if dismiss == selector {
                    state.overlay = None;
                    return Ok(ClickOutcome::Clicked);
                }
                if count_static(&self.html, selector)? > 0 {
                    return Ok(ClickOutcome::Intercepted);
                }
            }
        }

        let href = match locate_static_target(&self.html, selector, filter)? {
            StaticTarget::Missing => return Ok(ClickOutcome::Missing),
            StaticTarget::Rejected => return Ok(ClickOutcome::Rejected),
            StaticTarget::Found { href } => href,
        };

        let queued = self
            .site
            .lock()
            .effects
            .get_mut(&(self.url.clone(), selector.to_string()))
            .and_then(VecDeque::pop_front);

        match (queued, href) {
            (Some(ClickEffect::Replace(html)), _) => self.html = html,
            (Some(ClickEffect::Navigate(url)), _) => self.load(&url)?,
            (None, Some(href)) => {
                let next = Url::parse(&self.url)
                    .and_then(|base| base.join(&href))
                    .map(|u| u.to_string())
                    .unwrap_or(href);
                self.load(&next)?;
            }
            (None, None) => {}
        }
        Ok(ClickOutcome::Clicked)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        Ok(())
    }
}

/// Launches drivers that share one scripted site
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    site: ScriptedSite,
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn Driver>, SessionError> {
        self.site.lock().launches += 1;
        Ok(Box::new(ScriptedDriver::new(self.site.clone())))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pages_and_redirects() {
        let site = ScriptedSite::new();
        site.page("https://s.test/a", "<html><body><p>A</p></body></html>")
            .redirect("https://s.test/search?q=a", "https://s.test/a");

        let mut driver = site.launcher().launch().await.unwrap();
        driver.goto("https://s.test/search?q=a").await.unwrap();
        assert_eq!(driver.current_url().await.unwrap(), "https://s.test/a");
        assert_eq!(driver.body_text().await.unwrap(), "A");
        assert_eq!(site.navigation_count(), 1);
        assert_eq!(site.launches(), 1);
    }

    #[tokio::test]
    async fn test_replace_effects_run_in_order() {
        let site = ScriptedSite::new();
        site.page("https://s.test/", "<html><body><b class='m'>more</b></body></html>")
            .on_click(
                "https://s.test/",
                "b.m",
                vec![
                    ClickEffect::Replace("<html><body><b class='m'>more</b><i>1</i></body></html>".into()),
                    ClickEffect::Replace("<html><body><i>1</i><i>2</i></body></html>".into()),
                ],
            );

        let mut driver = site.launcher().launch().await.unwrap();
        driver.goto("https://s.test/").await.unwrap();
        assert_eq!(driver.click("b.m", None).await.unwrap(), ClickOutcome::Clicked);
        assert_eq!(driver.click("b.m", None).await.unwrap(), ClickOutcome::Clicked);
        assert_eq!(driver.click("b.m", None).await.unwrap(), ClickOutcome::Missing);
        assert_eq!(driver.count("i", false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_overlay_intercepts_until_dismissed() {
        let site = ScriptedSite::new();
        site.page("https://s.test/", "<html><body><a class='go' href='/b'>go</a></body></html>")
            .show_overlay("button.close");

        let mut driver = site.launcher().launch().await.unwrap();
        driver.goto("https://s.test/").await.unwrap();
        assert_eq!(driver.click("a.go", None).await.unwrap(), ClickOutcome::Intercepted);
        assert_eq!(driver.click("button.close", None).await.unwrap(), ClickOutcome::Clicked);
        assert!(!site.overlay_active());
        assert_eq!(driver.click("a.go", None).await.unwrap(), ClickOutcome::Clicked);
        assert_eq!(driver.current_url().await.unwrap(), "https://s.test/b");
    }

    #[tokio::test]
    async fn test_crash_closes_driver() {
        let site = ScriptedSite::new();
        site.crash_next(1);

        let mut driver = site.launcher().launch().await.unwrap();
        let err = driver.goto("https://s.test/").await.unwrap_err();
        assert!(err.is_session_lost());
        assert!(driver.page_source().await.unwrap_err().is_session_lost());
    }
}
