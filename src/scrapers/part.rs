//! Part scraper
//!
//! Resolves a part from the cache or the site, then fills its fields on
//! demand. Every scraped field is written through to the store immediately.

use crate::config::Config;
use crate::scrapers::collections::{collect_pages, Collected};
use crate::scrapers::troubleshooting::parse_troubleshooting;
use crate::scrapers::{or_none, FieldResult, Handle, ScrapeError};
use crate::session::{Element, ElementFilter, Session};
use crate::state::{Lifecycle, ScraperState};
use crate::storage::{
    PartRecord, QnaRecord, ReplacementRecord, ReviewRecord, SqliteStore, StoryRecord,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const IN_STOCK: &str = "In Stock";

/// How a part is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartTarget {
    /// Manufacturer code or catalog id, resolved through the site search
    Id(String),
    /// A part page
    Url(String),
}

/// A part rendered for display, one `key: value` line per column
#[derive(Debug, Clone, PartialEq)]
pub struct PartSummary {
    pub part: PartRecord,
}

impl From<PartRecord> for PartSummary {
    fn from(part: PartRecord) -> Self {
        Self { part }
    }
}

impl fmt::Display for PartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.part;
        writeln!(f, "manufacturer_id: {}", p.manufacturer_id)?;
        writeln!(f, "catalog_id: {}", or_none(&p.catalog_id))?;
        writeln!(f, "name: {}", or_none(&p.name))?;
        writeln!(f, "url: {}", or_none(&p.url))?;
        writeln!(f, "availability: {}", or_none(&p.availability))?;
        writeln!(f, "price: {}", or_none(&p.price))?;
        writeln!(f, "difficulty: {}", or_none(&p.difficulty))?;
        writeln!(f, "time: {}", or_none(&p.time))?;
        writeln!(f, "rating: {}", or_none(&p.rating))?;
        writeln!(f, "description: {}", or_none(&p.description))?;
        writeln!(f, "fixes: {}", or_none(&p.fixes))?;
        writeln!(f, "part_replacements: {}", or_none(&p.part_replacements))?;
        writeln!(f, "products: {}", or_none(&p.products))?;
        write!(f, "related_parts: {}", or_none(&p.related_parts))
    }
}

/// What a full scrape left behind
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub manufacturer_id: String,
    /// Fields that stayed empty, with the reason
    pub missed: Vec<(&'static str, String)>,
    pub replacements: usize,
    pub reviews: usize,
    pub stories: usize,
    pub questions: usize,
}

impl ScrapeReport {
    fn note<T>(&mut self, field: &'static str, result: &FieldResult<T>) {
        if result.value.is_none() {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not present".to_string());
            self.missed.push((field, reason));
        }
    }
}

// ===== Field extraction =====

/// Parses a displayed price such as `$24.50` or `$1,024.00`
pub fn parse_price(text: &str) -> Result<f64, ScrapeError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != ',')
        .collect();
    cleaned.parse().map_err(|_| ScrapeError::Parse {
        field: "price",
        value: text.to_string(),
    })
}

/// Star rating out of 5 from a `width: NN%` style, rounded to two places
pub fn parse_rating(style: &str) -> Option<f64> {
    let (_, rest) = style.split_once("width")?;
    let rest = rest.trim_start().strip_prefix(':')?;
    let pct: f64 = rest.split('%').next()?.trim().parse().ok()?;
    Some((pct / 20.0 * 100.0).round() / 100.0)
}

fn first_text(elements: Vec<Element>) -> Option<String> {
    elements
        .into_iter()
        .map(|el| el.text())
        .find(|text| !text.is_empty())
}

fn nth_text(elements: Vec<Element>, n: usize) -> Option<String> {
    elements
        .get(n)
        .map(Element::text)
        .filter(|text| !text.is_empty())
}

/// Lazily populated view of one part
pub struct PartScraper<'a> {
    session: Handle<'a, Session>,
    store: Handle<'a, SqliteStore>,
    config: Arc<Config>,
    url: String,
    record: PartRecord,
    lifecycle: Lifecycle,
}

impl<'a> PartScraper<'a> {
    /// Resolves `target` to a part record
    ///
    /// A cached record is used as is. Otherwise the part page is loaded and
    /// its manufacturer code read; a page without one fails with `NotFound`.
    /// A record missing its catalog id gets that one field scraped right away.
    pub async fn open(
        session: Handle<'a, Session>,
        store: Handle<'a, SqliteStore>,
        target: PartTarget,
        config: Arc<Config>,
    ) -> Result<Self, ScrapeError> {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(ScraperState::SessionOpen)?;

        let mut scraper = Self {
            session,
            store,
            config,
            url: String::new(),
            record: PartRecord::default(),
            lifecycle,
        };
        scraper.resolve(target).await?;
        scraper.lifecycle.advance(ScraperState::RecordResolved)?;

        if scraper.record.catalog_id.is_none() {
            let result = scraper.catalog_id().await;
            if let Some(e) = result.error {
                debug!("No catalog id for {}: {}", scraper.record.manufacturer_id, e);
            }
        }
        Ok(scraper)
    }

    async fn resolve(&mut self, target: PartTarget) -> Result<(), ScrapeError> {
        let config = Arc::clone(&self.config);
        match target {
            PartTarget::Id(id) => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(ScrapeError::InvalidArgument("empty part id".to_string()));
                }
                if let Some(existing) = self.store.get::<PartRecord>(id)? {
                    info!("Part {} found in cache", id);
                    self.url = existing
                        .url
                        .clone()
                        .unwrap_or_else(|| config.site.search_url_for(id));
                    self.record = existing;
                    return Ok(());
                }
                info!("Part {} not cached, searching", id);
                self.resolve_from_page(&config.site.search_url_for(id), id)
                    .await
            }
            PartTarget::Url(url) => {
                if url.trim().is_empty() {
                    return Err(ScrapeError::InvalidArgument("empty part url".to_string()));
                }
                self.resolve_from_page(&url, &url).await
            }
        }
    }

    async fn resolve_from_page(&mut self, url: &str, wanted: &str) -> Result<(), ScrapeError> {
        let config = Arc::clone(&self.config);
        self.session.parse(url).await?;
        let landed = self.session.location().unwrap_or(url).to_string();

        let manufacturer_id = self
            .session
            .wait_for_one(&config.selectors.part_manufacturer_id, false)
            .await?
            .map(|el| el.text())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ScrapeError::NotFound(wanted.to_string()))?;

        let mut record = self
            .store
            .get::<PartRecord>(manufacturer_id.as_str())?
            .unwrap_or_else(|| PartRecord::new(manufacturer_id.as_str()));
        if record.url.is_none() {
            record.url = Some(landed.clone());
        }
        self.url = record.url.clone().unwrap_or(landed);
        self.record = record;
        self.store.save(&self.record)?;
        Ok(())
    }

    // ===== Accessors =====

    pub fn record(&self) -> &PartRecord {
        &self.record
    }

    pub fn manufacturer_id(&self) -> &str {
        &self.record.manufacturer_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ScraperState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn summary(&self) -> PartSummary {
        PartSummary::from(self.record.clone())
    }

    /// Cached value, or extraction from the page followed by a write-through
    async fn field<T, F>(
        &mut self,
        field: &'static str,
        read: fn(&PartRecord) -> Option<T>,
        write: fn(&mut PartRecord, T),
        selector: &str,
        extract: F,
    ) -> FieldResult<T>
    where
        T: Clone + Send,
        F: FnOnce(Vec<Element>) -> Result<Option<T>, ScrapeError> + Send,
    {
        if let Some(value) = read(&self.record) {
            return FieldResult::cached(value);
        }

        debug!("Scraping '{}' from {}", field, self.url);
        let elements = match self.session.get_items(&self.url, selector).await {
            Ok(elements) => elements,
            Err(e) => {
                warn!("Failed to read '{}' from {}: {}", field, self.url, e);
                return FieldResult::failed(e.into());
            }
        };
        if elements.is_empty() {
            return FieldResult::failed(self.not_on_page(field));
        }

        match extract(elements) {
            Ok(Some(value)) => {
                write(&mut self.record, value.clone());
                self.persist(&[field], FieldResult::scraped(value))
            }
            Ok(None) => FieldResult::failed(self.not_on_page(field)),
            Err(e) => {
                warn!("Failed to extract '{}' from {}: {}", field, self.url, e);
                FieldResult::failed(e)
            }
        }
    }

    fn not_on_page(&self, field: &'static str) -> ScrapeError {
        debug!("'{}' not present on {}", field, self.url);
        ScrapeError::NotFoundOnPage {
            field,
            url: self.url.clone(),
        }
    }

    /// Saves the record and marks `fields` populated
    fn persist<T>(&mut self, fields: &[&'static str], result: FieldResult<T>) -> FieldResult<T> {
        if let Err(e) = self.store.save(&self.record) {
            warn!("Failed to persist {:?} for {}: {}", fields, self.record.manufacturer_id, e);
            return result.with_error(e.into());
        }
        for &field in fields {
            if let Err(e) = self.lifecycle.mark_populated(field) {
                return result.with_error(e.into());
            }
        }
        result
    }

    pub async fn catalog_id(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        self.field(
            "catalog_id",
            |r| r.catalog_id.clone(),
            |r, v| r.catalog_id = Some(v),
            &config.selectors.part_catalog_id,
            |els| Ok(first_text(els)),
        )
        .await
    }

    pub async fn name(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        self.field(
            "name",
            |r| r.name.clone(),
            |r, v| r.name = Some(v),
            &config.selectors.part_name,
            |els| Ok(first_text(els)),
        )
        .await
    }

    pub async fn availability(&mut self) -> FieldResult<bool> {
        let config = Arc::clone(&self.config);
        self.field(
            "availability",
            |r| r.availability,
            |r, v| r.availability = Some(v),
            &config.selectors.part_availability,
            |els| Ok(first_text(els).map(|text| text == IN_STOCK)),
        )
        .await
    }

    pub async fn price(&mut self) -> FieldResult<f64> {
        let config = Arc::clone(&self.config);
        self.field(
            "price",
            |r| r.price,
            |r, v| r.price = Some(v),
            &config.selectors.part_price,
            |els| first_text(els).map(|text| parse_price(&text)).transpose(),
        )
        .await
    }

    pub async fn difficulty(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        self.field(
            "difficulty",
            |r| r.difficulty.clone(),
            |r, v| r.difficulty = Some(v),
            &config.selectors.repair_rating,
            |els| Ok(nth_text(els, 0)),
        )
        .await
    }

    /// Typical repair time
    pub async fn repair_time(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        self.field(
            "time",
            |r| r.time.clone(),
            |r, v| r.time = Some(v),
            &config.selectors.repair_rating,
            |els| Ok(nth_text(els, 1)),
        )
        .await
    }

    pub async fn rating(&mut self) -> FieldResult<f64> {
        let config = Arc::clone(&self.config);
        self.field(
            "rating",
            |r| r.rating,
            |r, v| r.rating = Some(v),
            &config.selectors.part_rating,
            |els| Ok(els.first().and_then(|el| el.attr("style")).and_then(|s| parse_rating(&s))),
        )
        .await
    }

    pub async fn description(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        self.field(
            "description",
            |r| r.description.clone(),
            |r, v| r.description = Some(v),
            &config.selectors.part_description,
            |els| Ok(first_text(els)),
        )
        .await
    }

    /// Numbered `name - (url)` lines for the related parts
    pub async fn related_parts(&mut self) -> FieldResult<String> {
        let config = Arc::clone(&self.config);
        let site = config.site.clone();
        self.field(
            "related_parts",
            |r| r.related_parts.clone(),
            |r, v| r.related_parts = Some(v),
            &config.selectors.related_parts,
            move |els| {
                let lines: Vec<String> = els
                    .iter()
                    .enumerate()
                    .map(|(i, el)| {
                        let href = el.attr("href").unwrap_or_default();
                        format!("{}. {} - ({})", i + 1, el.text(), site.absolute(&href))
                    })
                    .collect();
                Ok((!lines.is_empty()).then(|| lines.join("\n")))
            },
        )
        .await
    }

    /// `(fixes, part_replacements, products)` from the troubleshooting block
    ///
    /// The three fields are scraped together and written in a single save.
    pub async fn troubleshooting(&mut self) -> FieldResult<(String, String, String)> {
        if let (Some(fixes), Some(replacements), Some(products)) = (
            &self.record.fixes,
            &self.record.part_replacements,
            &self.record.products,
        ) {
            return FieldResult::cached((fixes.clone(), replacements.clone(), products.clone()));
        }

        let config = Arc::clone(&self.config);
        let selectors = &config.selectors;
        let expander = ElementFilter::text_contains(selectors.show_more_text.as_str());
        if let Err(e) = self
            .session
            .click_repeatedly(&self.url, &selectors.show_more, Some(&expander))
            .await
        {
            warn!("Could not expand troubleshooting on {}: {}", self.url, e);
            return FieldResult::failed(e.into());
        }

        let block = match self
            .session
            .get_item(&self.url, &selectors.troubleshooting)
            .await
        {
            Ok(Some(block)) => block,
            Ok(None) => return FieldResult::failed(self.not_on_page("fixes")),
            Err(e) => {
                warn!("Failed to read troubleshooting from {}: {}", self.url, e);
                return FieldResult::failed(e.into());
            }
        };

        let (fixes, replacements, products) = parse_troubleshooting(&block.text_lines()).joined();
        self.record.fixes = Some(fixes.clone());
        self.record.part_replacements = Some(replacements.clone());
        self.record.products = Some(products.clone());
        self.persist(
            &["fixes", "part_replacements", "products"],
            FieldResult::scraped((fixes, replacements, products)),
        )
    }

    pub async fn fixes(&mut self) -> FieldResult<String> {
        self.troubleshooting().await.map(|(fixes, _, _)| fixes)
    }

    pub async fn part_replacements(&mut self) -> FieldResult<String> {
        self.troubleshooting()
            .await
            .map(|(_, replacements, _)| replacements)
    }

    pub async fn products(&mut self) -> FieldResult<String> {
        self.troubleshooting().await.map(|(_, _, products)| products)
    }

    // ===== Sub-collections =====

    pub async fn reviews(&mut self) -> FieldResult<Vec<ReviewRecord>> {
        self.collection().await
    }

    pub async fn stories(&mut self) -> FieldResult<Vec<StoryRecord>> {
        self.collection().await
    }

    pub async fn questions(&mut self) -> FieldResult<Vec<QnaRecord>> {
        self.collection().await
    }

    /// Stored records of one collection, scraping the pages if there are none
    async fn collection<R: Collected>(&mut self) -> FieldResult<Vec<R>> {
        match self.store.find_by_owner::<R>(&self.record.manufacturer_id) {
            Ok(existing) if !existing.is_empty() => return FieldResult::cached(existing),
            Ok(_) => {}
            Err(e) => return FieldResult::failed(e.into()),
        }

        let config = Arc::clone(&self.config);
        let walked = collect_pages::<R>(
            &mut self.session,
            &mut self.store,
            &self.url,
            &config.selectors,
            &self.record.manufacturer_id,
            config.session.max_pages,
        )
        .await;

        let stored = match self.store.find_by_owner::<R>(&self.record.manufacturer_id) {
            Ok(stored) => stored,
            Err(e) => return FieldResult::failed(e.into()),
        };
        match walked {
            Ok(_) => FieldResult::scraped(stored),
            Err(e) => {
                warn!("Stopped collecting {} on {}: {}", R::LABEL, self.url, e);
                FieldResult::scraped(stored).with_error(e)
            }
        }
    }

    // ===== Full scrape =====

    /// Populates every field, stores the replacement rows, and optionally
    /// walks the review, story and Q&A pages
    ///
    /// Missing fields are reported, not fatal. A session that stays lost is.
    pub async fn scrape_all(&mut self, include_collections: bool) -> Result<ScrapeReport, ScrapeError> {
        info!("Full scrape of {}", self.record.manufacturer_id);
        let mut report = ScrapeReport {
            manufacturer_id: self.record.manufacturer_id.clone(),
            ..Default::default()
        };

        macro_rules! scrape {
            ($field:literal, $call:expr) => {{
                let mut result = $call;
                if result.error.as_ref().map_or(false, ScrapeError::is_session_lost) {
                    if let Some(e) = result.error.take() {
                        return Err(e);
                    }
                }
                report.note($field, &result);
            }};
        }

        scrape!("catalog_id", self.catalog_id().await);
        scrape!("name", self.name().await);
        scrape!("availability", self.availability().await);
        scrape!("price", self.price().await);
        scrape!("difficulty", self.difficulty().await);
        scrape!("time", self.repair_time().await);
        scrape!("rating", self.rating().await);
        scrape!("description", self.description().await);
        scrape!("related_parts", self.related_parts().await);
        scrape!("fixes", self.troubleshooting().await);

        self.store.save(&self.record)?;

        let replacements: Vec<ReplacementRecord> = self
            .record
            .part_replacements
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| ReplacementRecord::new(self.record.manufacturer_id.as_str(), text))
            .collect();
        if !replacements.is_empty() {
            report.replacements = self.store.save_batch(&replacements)?;
        }

        if include_collections {
            let reviews = self.reviews().await;
            report.reviews = reviews.value.as_ref().map_or(0, Vec::len);
            scrape!("reviews", reviews);
            let stories = self.stories().await;
            report.stories = stories.value.as_ref().map_or(0, Vec::len);
            scrape!("stories", stories);
            let questions = self.questions().await;
            report.questions = questions.value.as_ref().map_or(0, Vec::len);
            scrape!("questions", questions);
        }

        info!(
            "Scraped {} ({} fields missing)",
            report.manufacturer_id,
            report.missed.len()
        );
        Ok(report)
    }

    /// Ends the scrape; an owned session is shut down, an owned store dropped
    pub async fn close(mut self) -> Result<(), ScrapeError> {
        self.lifecycle.advance(ScraperState::Closed)?;
        if let Some(session) = self.session.into_owned() {
            session.close().await?;
        }
        Ok(())
    }
}
