//! Model scraper
//!
//! A model page carries a name, a description and links to its symptom pages.
//! Its parts live on a separate paginated listing, walked page by page until a
//! page brings no new catalog ids.

use crate::config::{Config, SelectorConfig, SiteConfig};
use crate::scrapers::part::PartSummary;
use crate::scrapers::{or_none, FieldResult, Handle, ScrapeError};
use crate::session::{Element, Session};
use crate::state::{Lifecycle, ScraperState};
use crate::storage::{ModelRecord, PartRecord, SqliteStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// A model rendered for display
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub model: ModelRecord,
    pub url: String,
    pub parts_url: String,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model_id: {}", self.model.id)?;
        writeln!(f, "model url: {}", self.url)?;
        writeln!(f, "name: {}", or_none(&self.model.name))?;
        writeln!(f, "description: {}", or_none(&self.model.description))?;
        writeln!(f, "symptoms: {}", or_none(&self.model.symptoms))?;
        write!(f, "link for all parts: {}", self.parts_url)
    }
}

/// URL of one page of a paginated listing; page 1 is the bare listing
pub fn listing_page_url(base: &str, page: usize) -> Result<String, ScrapeError> {
    if page <= 1 {
        return Ok(base.to_string());
    }
    with_query(base, &[("start", &page.to_string())])
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> Result<String, ScrapeError> {
    let mut url = Url::parse(base)
        .map_err(|e| ScrapeError::InvalidArgument(format!("bad listing url {}: {}", base, e)))?;
    url.query_pairs_mut().extend_pairs(pairs.iter().copied());
    Ok(url.to_string())
}

/// Reads one part block of a model's parts listing
///
/// Blocks without a catalog id are skipped. The manufacturer code may be
/// missing, in which case the record cannot be stored.
pub fn parse_listing_block(
    block: &Element,
    selectors: &SelectorConfig,
    site: &SiteConfig,
) -> Result<Option<(String, PartRecord)>, ScrapeError> {
    let Some(catalog_id) = block.labelled_value(&selectors.listing_catalog_label) else {
        return Ok(None);
    };

    let mut record = PartRecord::new(
        block
            .labelled_value(&selectors.listing_manufacturer_label)
            .unwrap_or_default(),
    );
    record.catalog_id = Some(catalog_id.clone());
    record.name = block.select_text(&selectors.listing_part_name)?;
    record.url = block
        .select_one("a")?
        .and_then(|a| a.attr("href"))
        .map(|href| site.absolute(&href));
    record.availability = Some(!block.text().contains(&selectors.listing_unavailable_text));
    Ok(Some((catalog_id, record)))
}

/// Lazily populated view of one appliance model
pub struct ModelScraper<'a> {
    session: Handle<'a, Session>,
    store: Handle<'a, SqliteStore>,
    config: Arc<Config>,
    model_url: String,
    parts_url: String,
    record: ModelRecord,
    lifecycle: Lifecycle,
}

impl<'a> ModelScraper<'a> {
    /// Loads the cached model record or starts an empty one
    ///
    /// Nothing is navigated or stored until a field is read.
    pub async fn open(
        session: Handle<'a, Session>,
        store: Handle<'a, SqliteStore>,
        model_id: &str,
        config: Arc<Config>,
    ) -> Result<ModelScraper<'a>, ScrapeError> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(ScrapeError::InvalidArgument("empty model id".to_string()));
        }

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(ScraperState::SessionOpen)?;

        let record = match store.get::<ModelRecord>(model_id)? {
            Some(record) => {
                info!("Model {} found in cache", model_id);
                record
            }
            None => ModelRecord::new(model_id),
        };
        lifecycle.advance(ScraperState::RecordResolved)?;

        Ok(Self {
            model_url: config.site.model_url_for(model_id),
            parts_url: config.site.parts_url_for(model_id),
            session,
            store,
            config,
            record,
            lifecycle,
        })
    }

    pub fn record(&self) -> &ModelRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn url(&self) -> &str {
        &self.model_url
    }

    pub fn parts_url(&self) -> &str {
        &self.parts_url
    }

    pub fn state(&self) -> ScraperState {
        self.lifecycle.state()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            model: self.record.clone(),
            url: self.model_url.clone(),
            parts_url: self.parts_url.clone(),
        }
    }

    fn persist<T>(&mut self, field: &'static str, value: T) -> FieldResult<T> {
        let result = FieldResult::scraped(value);
        if let Err(e) = self.store.save(&self.record) {
            warn!("Failed to persist '{}' for model {}: {}", field, self.record.id, e);
            return result.with_error(e.into());
        }
        match self.lifecycle.mark_populated(field) {
            Ok(()) => result,
            Err(e) => result.with_error(e.into()),
        }
    }

    async fn first_text(&mut self, field: &'static str, selector: &str) -> Result<String, ScrapeError> {
        self.session
            .get_item(&self.model_url, selector)
            .await?
            .map(|el| el.text())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ScrapeError::NotFoundOnPage {
                field,
                url: self.model_url.clone(),
            })
    }

    pub async fn name(&mut self) -> FieldResult<String> {
        if let Some(name) = &self.record.name {
            return FieldResult::cached(name.clone());
        }
        let config = Arc::clone(&self.config);
        match self.first_text("name", &config.selectors.model_name).await {
            Ok(name) => {
                self.record.name = Some(name.clone());
                self.persist("name", name)
            }
            Err(e) => {
                warn!("No name for model {}: {}", self.record.id, e);
                FieldResult::failed(e)
            }
        }
    }

    pub async fn description(&mut self) -> FieldResult<String> {
        if let Some(description) = &self.record.description {
            return FieldResult::cached(description.clone());
        }
        let config = Arc::clone(&self.config);
        match self
            .first_text("description", &config.selectors.model_description)
            .await
        {
            Ok(description) => {
                self.record.description = Some(description.clone());
                self.persist("description", description)
            }
            Err(e) => {
                warn!("No description for model {}: {}", self.record.id, e);
                FieldResult::failed(e)
            }
        }
    }

    /// Numbered symptom links, each followed by its description line
    pub async fn symptoms(&mut self) -> FieldResult<String> {
        if let Some(symptoms) = &self.record.symptoms {
            return FieldResult::cached(symptoms.clone());
        }
        let config = Arc::clone(&self.config);
        let links = match self
            .session
            .get_items(&self.model_url, &config.selectors.model_symptom_link)
            .await
        {
            Ok(links) => links,
            Err(e) => return FieldResult::failed(e.into()),
        };
        if links.is_empty() {
            warn!("No symptoms for model {} at {}", self.record.id, self.model_url);
            return FieldResult::failed(ScrapeError::NotFoundOnPage {
                field: "symptoms",
                url: self.model_url.clone(),
            });
        }

        let mut lines = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            let href = link.attr("href").unwrap_or_default();
            let description = match link.select_text(&config.selectors.model_symptom_description) {
                Ok(text) => text.unwrap_or_default(),
                Err(e) => return FieldResult::failed(e.into()),
            };
            lines.push(format!(
                "{}. {}\n{}",
                i + 1,
                config.site.absolute(&href),
                description
            ));
        }
        let symptoms = lines.join("\n");
        self.record.symptoms = Some(symptoms.clone());
        self.persist("symptoms", symptoms)
    }

    /// Comma-joined catalog ids of every part in the listing
    pub async fn parts(&mut self) -> FieldResult<String> {
        if let Some(parts) = &self.record.parts {
            return FieldResult::cached(parts.clone());
        }
        match self.scrape_part_listing().await {
            Ok(parts) if parts.is_empty() => FieldResult::failed(ScrapeError::NotFoundOnPage {
                field: "parts",
                url: self.parts_url.clone(),
            }),
            Ok(parts) => {
                let ids = parts
                    .iter()
                    .filter_map(|p| p.catalog_id.as_deref())
                    .collect::<Vec<_>>()
                    .join(",");
                self.record.parts = Some(ids.clone());
                self.persist("parts", ids)
            }
            Err(e) => {
                warn!("Parts listing failed for model {}: {}", self.record.id, e);
                FieldResult::failed(e)
            }
        }
    }

    // ===== Parts listing =====

    /// Parses the listing blocks on the current page
    async fn read_listing(&mut self) -> Result<Vec<(String, PartRecord)>, ScrapeError> {
        let config = Arc::clone(&self.config);
        let blocks = self
            .session
            .wait_for_all(&config.selectors.listing_part, false)
            .await?;
        let mut parsed = Vec::with_capacity(blocks.len());
        for block in &blocks {
            if let Some(entry) = parse_listing_block(block, &config.selectors, &config.site)? {
                parsed.push(entry);
            }
        }
        Ok(parsed)
    }

    /// Stores the listed parts that carry a manufacturer code
    fn upsert_listed(&mut self, parts: &[PartRecord]) -> Result<usize, ScrapeError> {
        let storable: Vec<PartRecord> = parts
            .iter()
            .filter(|p| !p.manufacturer_id.is_empty())
            .cloned()
            .collect();
        let skipped = parts.len() - storable.len();
        if skipped > 0 {
            debug!(
                "Model {}: {} listed parts have no manufacturer code, not stored",
                self.record.id, skipped
            );
        }
        Ok(self.store.save_batch(&storable)?)
    }

    /// Walks the whole parts listing
    ///
    /// Pages are requested as `?start=N` until one yields no new catalog ids.
    /// The first such page gets one overlay dismissal and a re-read before the
    /// walk ends. Every listed part is upserted on the way.
    pub async fn scrape_part_listing(&mut self) -> Result<Vec<PartRecord>, ScrapeError> {
        let max_pages = self.config.session.max_pages;
        let mut seen: HashSet<String> = HashSet::new();
        let mut parts: Vec<PartRecord> = Vec::new();
        let mut overlay_tried = false;
        let mut page = 1;

        info!("Walking parts listing of model {}", self.record.id);
        while page <= max_pages {
            let page_url = listing_page_url(&self.parts_url, page)?;
            self.session.parse(&page_url).await?;

            let mut fresh = self.fresh_entries(&mut seen).await?;
            if fresh.is_empty() && !overlay_tried {
                overlay_tried = true;
                if self.session.dismiss_overlay().await? {
                    debug!("Dismissed overlay on page {}, re-reading", page);
                }
                fresh = self.fresh_entries(&mut seen).await?;
            }
            if fresh.is_empty() {
                debug!("Page {} of model {} brought no new parts", page, self.record.id);
                break;
            }

            let saved = self.upsert_listed(&fresh)?;
            debug!("Page {}: {} new parts, {} stored", page, fresh.len(), saved);
            parts.extend(fresh);
            page += 1;
        }

        if page > max_pages {
            warn!("Stopped parts listing of {} after {} pages", self.record.id, max_pages);
        }
        info!("Model {} lists {} parts", self.record.id, parts.len());
        Ok(parts)
    }

    async fn fresh_entries(
        &mut self,
        seen: &mut HashSet<String>,
    ) -> Result<Vec<PartRecord>, ScrapeError> {
        Ok(self
            .read_listing()
            .await?
            .into_iter()
            .filter(|(catalog_id, _)| seen.insert(catalog_id.clone()))
            .map(|(_, record)| record)
            .collect())
    }

    /// Parts of this model whose titles match `query`, from one search page
    pub async fn search_parts(&mut self, query: &str) -> Result<Vec<PartSummary>, ScrapeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ScrapeError::InvalidArgument("empty search query".to_string()));
        }

        let url = with_query(&self.parts_url, &[("SearchTerm", query)])?;
        info!("Searching parts of {} for '{}'", self.record.id, query);
        self.session.parse(&url).await?;

        let mut listed = self.read_listing().await?;
        if listed.is_empty() && self.session.dismiss_overlay().await? {
            listed = self.read_listing().await?;
        }

        let mut seen = HashSet::new();
        let parts: Vec<PartRecord> = listed
            .into_iter()
            .filter(|(catalog_id, _)| seen.insert(catalog_id.clone()))
            .map(|(_, record)| record)
            .collect();
        self.upsert_listed(&parts)?;
        Ok(parts.into_iter().map(PartSummary::from).collect())
    }

    // ===== Full scrape =====

    /// Populates name, description and symptoms, plus the parts list when asked
    ///
    /// Missing fields stay empty; only a lost session is an error.
    pub async fn scrape_all(&mut self, include_parts: bool) -> Result<ModelSummary, ScrapeError> {
        info!("Full scrape of model {}", self.record.id);

        let mut errors = vec![
            self.name().await.error,
            self.description().await.error,
            self.symptoms().await.error,
        ];
        if include_parts {
            errors.push(self.parts().await.error);
        }
        if let Some(lost) = errors
            .into_iter()
            .flatten()
            .find(ScrapeError::is_session_lost)
        {
            return Err(lost);
        }
        Ok(self.summary())
    }

    pub async fn close(mut self) -> Result<(), ScrapeError> {
        self.lifecycle.advance(ScraperState::Closed)?;
        if let Some(session) = self.session.into_owned() {
            session.close().await?;
        }
        Ok(())
    }
}
