//! Automation backend seam
//!
//! A [`Driver`] is one live automation handle (a browser tab, an HTTP client
//! with a notion of "current page", or an in-memory replay site). A
//! [`Launcher`] creates fresh drivers, which is what crash recovery and the
//! one-driver-per-worker pool need.

use crate::session::document::{normalize_whitespace, parse_selector};
use crate::session::SessionError;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

/// What happened when a driver tried to click an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Clicked,
    /// No element matched the selector
    Missing,
    /// Elements matched, but none passed the filter (or none can be clicked)
    Rejected,
    /// Another element (an overlay) received the click
    Intercepted,
}

/// Condition a click target must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementFilter {
    /// Element text contains the given substring
    TextContains(String),
}

impl ElementFilter {
    pub fn text_contains(needle: impl Into<String>) -> Self {
        Self::TextContains(needle.into())
    }

    pub fn accepts(&self, text: &str) -> bool {
        match self {
            Self::TextContains(needle) => text.contains(needle.as_str()),
        }
    }
}

#[async_trait]
pub trait Driver: Send {
    /// Navigates to `url` and waits for the load to finish
    async fn goto(&mut self, url: &str) -> Result<(), SessionError>;

    /// URL of the page currently shown (after redirects)
    async fn current_url(&mut self) -> Result<String, SessionError>;

    /// Serialized DOM of the current page
    async fn page_source(&mut self) -> Result<String, SessionError>;

    /// Rendered body text; raw payload for non-HTML responses
    async fn body_text(&mut self) -> Result<String, SessionError>;

    /// Number of elements currently matching `selector`
    ///
    /// With `clickable`, only visible and enabled elements count.
    async fn count(&mut self, selector: &str, clickable: bool) -> Result<usize, SessionError>;

    /// Scrolls the first element matching `selector` (and `filter`) into view and clicks it
    async fn click(
        &mut self,
        selector: &str,
        filter: Option<&ElementFilter>,
    ) -> Result<ClickOutcome, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts a fresh automation handle
    async fn launch(&self) -> Result<Box<dyn Driver>, SessionError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Click target located in static HTML
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StaticTarget {
    Missing,
    Rejected,
    /// First accepted element; `href` is its own or its nearest descendant anchor's
    Found { href: Option<String> },
}

/// Finds the element a click would land on in a static page
pub(crate) fn locate_static_target(
    source: &str,
    selector: &str,
    filter: Option<&ElementFilter>,
) -> Result<StaticTarget, SessionError> {
    let parsed = parse_selector(selector)?;
    let html = Html::parse_document(source);

    let mut matched_any = false;
    for el in html.select(&parsed) {
        matched_any = true;
        let text = normalize_whitespace(&el.text().collect::<String>());
        if filter.map_or(true, |f| f.accepts(&text)) {
            return Ok(StaticTarget::Found {
                href: link_of(el),
            });
        }
    }

    Ok(if matched_any {
        StaticTarget::Rejected
    } else {
        StaticTarget::Missing
    })
}

fn link_of(el: ElementRef<'_>) -> Option<String> {
    if let Some(href) = el.value().attr("href") {
        return Some(href.to_string());
    }
    let anchor = Selector::parse("a[href]").ok()?;
    el.select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Count of elements matching `selector` in a static page
pub(crate) fn count_static(source: &str, selector: &str) -> Result<usize, SessionError> {
    let parsed = parse_selector(selector)?;
    let html = Html::parse_document(source);
    let count = html.select(&parsed).count();
    Ok(count)
}
