//! Crawl target discovery
//!
//! Category pages come from the vendor sitemap; item URLs come from walking a
//! category's paginated listing.

use crate::scrapers::model::listing_page_url;
use crate::scrapers::ScrapeError;
use crate::session::Session;
use crate::CatalogError;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use url::Url;

/// Builds the case-insensitive matcher for category names
fn category_pattern(categories: &[String]) -> Result<Option<Regex>, CatalogError> {
    let alternatives: Vec<String> = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(&format!("({})", alternatives.join("|")))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| CatalogError::Discovery(format!("bad category pattern: {}", e)))
}

/// Sitemap `<loc>` entries that mention one of `categories`
///
/// An empty category list keeps every entry. Order is preserved and repeats
/// are dropped.
pub fn discover_category_urls(
    sitemap_xml: &str,
    categories: &[String],
) -> Result<Vec<String>, CatalogError> {
    let pattern = category_pattern(categories)?;
    let document = Html::parse_document(sitemap_xml);
    let loc = Selector::parse("loc")
        .map_err(|e| CatalogError::Discovery(format!("bad sitemap selector: {:?}", e)))?;

    let mut seen = HashSet::new();
    let urls = document
        .select(&loc)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|url| !url.is_empty())
        .filter(|url| pattern.as_ref().map_or(true, |p| p.is_match(url)))
        .filter(|url| seen.insert(url.clone()))
        .collect::<Vec<_>>();

    tracing::info!("Sitemap lists {} matching category pages", urls.len());
    Ok(urls)
}

/// Reads a sitemap from a local path or an http(s) URL
pub async fn load_sitemap(source: &str) -> Result<String, CatalogError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        tracing::info!("Fetching sitemap from {}", source);
        let body = reqwest::get(source).await?.error_for_status()?.text().await?;
        return Ok(body);
    }
    tracing::info!("Reading sitemap from {}", source);
    Ok(tokio::fs::read_to_string(Path::new(source)).await?)
}

/// Item links of one category, across its listing pages
///
/// Page N is requested as `?start=N`; the walk stops at the first page that
/// yields no link, or after `max_pages` pages.
pub async fn discover_item_urls(
    session: &mut Session,
    category_url: &str,
    item_selector: &str,
    max_pages: usize,
) -> Result<Vec<String>, ScrapeError> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for page in 1..=max_pages {
        let page_url = listing_page_url(category_url, page)?;
        let links = session.get_items(&page_url, item_selector).await?;
        let base = session
            .location()
            .and_then(|landed| Url::parse(landed).ok())
            .or_else(|| Url::parse(&page_url).ok());

        let before = items.len();
        for link in &links {
            let Some(href) = link.attr("href") else {
                continue;
            };
            let absolute = match &base {
                Some(base) => base.join(&href).map(|u| u.to_string()).unwrap_or(href),
                None => href,
            };
            if seen.insert(absolute.clone()) {
                items.push(absolute);
            }
        }

        tracing::info!(
            "Category page {}: {} links ({} new)",
            page,
            links.len(),
            items.len() - before
        );
        if links.is_empty() {
            break;
        }
    }

    Ok(items)
}
