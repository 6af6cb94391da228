//! Tool-call boundary
//!
//! [`Catalog`] is what a calling agent talks to. Its typed methods return
//! `Result`s; [`Catalog::invoke`] renders every outcome, failures included, as
//! plain text so the caller can react to inline markers instead of errors.

use crate::config::Config;
use crate::scrapers::{
    compat, Handle, ModelScraper, ModelSummary, PartScraper, PartSummary, PartTarget,
    ScrapeError, SymptomScraper,
};
use crate::session::{launcher_from_config, Session, SessionSettings};
use crate::storage::{PartRecord, SqliteStore};
use crate::CatalogError;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const INVALID_PART_ID: &str = "INVALID PART ID";
pub const INVALID_APPLIANCE_ID: &str = "INVALID APPLIANCE ID";
pub const NO_MATCHING_PARTS: &str = "NO MATCHING PARTS";

/// One request from the agent layer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    /// All details on one part; a model id is accepted as a fallback
    GetPart { manufacturer_id: String },
    GetAppliance { model_id: String },
    /// Word match on the part titles of one model
    SearchParts { model_id: String, query: String },
    CheckCompatibility { part_id: String, model_id: String },
    FetchSymptoms { url: String },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetPart { .. } => "get_part",
            Self::GetAppliance { .. } => "get_appliance",
            Self::SearchParts { .. } => "search_parts",
            Self::CheckCompatibility { .. } => "check_compatibility",
            Self::FetchSymptoms { .. } => "fetch_symptoms",
        }
    }
}

/// A session and a store serving one caller
pub struct Catalog {
    session: Session,
    store: SqliteStore,
    config: Arc<Config>,
}

impl Catalog {
    pub fn new(session: Session, store: SqliteStore, config: Arc<Config>) -> Self {
        Self {
            session,
            store,
            config,
        }
    }

    /// Launches the configured driver and opens the configured database
    pub async fn open(config: Arc<Config>) -> Result<Self, CatalogError> {
        let store = SqliteStore::open(Path::new(&config.store.database_path))?;
        let launcher = launcher_from_config(&config)?;
        let session = Session::launch(launcher, SessionSettings::from_config(&config)).await?;
        Ok(Self::new(session, store, config))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub async fn close(self) -> Result<(), CatalogError> {
        self.session.close().await?;
        Ok(())
    }

    // ===== Typed operations =====

    /// A part by manufacturer id
    ///
    /// A complete cached record is returned as is; anything less is scraped.
    pub async fn lookup_part(&mut self, manufacturer_id: &str) -> Result<PartSummary, ScrapeError> {
        let id = manufacturer_id.trim();
        if let Some(cached) = self.store.get::<PartRecord>(id)? {
            if cached.is_complete() {
                info!("Part {} served from cache", id);
                return Ok(PartSummary::from(cached));
            }
        }

        let mut scraper = PartScraper::open(
            Handle::from(&mut self.session),
            Handle::from(&mut self.store),
            PartTarget::Id(id.to_string()),
            Arc::clone(&self.config),
        )
        .await?;
        scraper.scrape_all(false).await?;
        let summary = scraper.summary();
        scraper.close().await?;
        Ok(summary)
    }

    /// A model by manufacturer id; a page without a model name is `NotFound`
    pub async fn lookup_model(&mut self, model_id: &str) -> Result<ModelSummary, ScrapeError> {
        let mut scraper = ModelScraper::open(
            Handle::from(&mut self.session),
            Handle::from(&mut self.store),
            model_id,
            Arc::clone(&self.config),
        )
        .await?;
        let summary = scraper.scrape_all(false).await?;
        scraper.close().await?;
        if summary.model.name.is_none() {
            return Err(ScrapeError::NotFound(model_id.trim().to_string()));
        }
        Ok(summary)
    }

    pub async fn search_parts_by_name_fragment(
        &mut self,
        model_id: &str,
        query: &str,
    ) -> Result<Vec<PartSummary>, ScrapeError> {
        if query.trim().is_empty() {
            return Err(ScrapeError::InvalidArgument("empty query".to_string()));
        }
        let mut scraper = ModelScraper::open(
            Handle::from(&mut self.session),
            Handle::from(&mut self.store),
            model_id,
            Arc::clone(&self.config),
        )
        .await?;
        let parts = scraper.search_parts(query.trim()).await?;
        scraper.close().await?;
        Ok(parts)
    }

    pub async fn check_compatibility(
        &mut self,
        part_id: &str,
        model_id: &str,
    ) -> Result<bool, ScrapeError> {
        compat::check_compatibility(&mut self.session, &self.config.site, part_id, model_id).await
    }

    /// Ranked parts of a symptom page, one line per part
    ///
    /// A relative link is resolved against the site root.
    pub async fn fetch_symptoms(&mut self, url: &str) -> Result<String, ScrapeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ScrapeError::InvalidArgument("empty symptom url".to_string()));
        }
        let url = self.config.site.absolute(url);
        let scraper = SymptomScraper::open(
            Handle::from(&mut self.session),
            &url,
            Arc::clone(&self.config),
        )
        .await?;
        let summary = scraper.summary();
        scraper.close().await?;
        Ok(summary)
    }

    // ===== Agent boundary =====

    /// Runs one tool call and renders the outcome; never fails
    pub async fn invoke(&mut self, call: ToolCall) -> String {
        let started = Instant::now();
        let name = call.name();
        info!("Tool {} called: {:?}", name, call);

        let rendered = match call {
            ToolCall::GetPart { manufacturer_id } => self.render_part(&manufacturer_id).await,
            ToolCall::GetAppliance { model_id } => {
                if model_id.trim().is_empty() {
                    return "FAILURE: You did not provide a model id.".to_string();
                }
                match self.lookup_model(&model_id).await {
                    Ok(model) => model.to_string(),
                    Err(e) => {
                        warn!("Model lookup for {} failed: {}", model_id, e);
                        INVALID_APPLIANCE_ID.to_string()
                    }
                }
            }
            ToolCall::SearchParts { model_id, query } => {
                if query.trim().is_empty() {
                    return "FAILURE: You did not provide a query.".to_string();
                }
                match self.search_parts_by_name_fragment(&model_id, &query).await {
                    Ok(parts) if parts.is_empty() => NO_MATCHING_PARTS.to_string(),
                    Ok(parts) => parts
                        .iter()
                        .map(PartSummary::to_string)
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                    Err(e) => failure(e),
                }
            }
            ToolCall::CheckCompatibility { part_id, model_id } => {
                match self.check_compatibility(&part_id, &model_id).await {
                    Ok(fits) => fits.to_string(),
                    Err(e) => failure(e),
                }
            }
            ToolCall::FetchSymptoms { url } => match self.fetch_symptoms(&url).await {
                Ok(text) => text,
                Err(e) => failure(e),
            },
        };

        info!(
            "Tool {} completed in {:.3}s",
            name,
            started.elapsed().as_secs_f64()
        );
        rendered
    }

    async fn render_part(&mut self, manufacturer_id: &str) -> String {
        if manufacturer_id.trim().is_empty() {
            return "FAILURE: You did not provide a manufacturer id.".to_string();
        }
        match self.lookup_part(manufacturer_id).await {
            Ok(part) => part.to_string(),
            Err(part_error) => {
                // Callers mix up part and model ids often enough
                match self.lookup_model(manufacturer_id).await {
                    Ok(model) => model.to_string(),
                    Err(_) => {
                        warn!("Part lookup for {} failed: {}", manufacturer_id, part_error);
                        INVALID_PART_ID.to_string()
                    }
                }
            }
        }
    }
}

fn failure(error: ScrapeError) -> String {
    format!("FAILURE: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::model::tests::{model_page, MODEL};
    use crate::scrapers::part::tests::{part_page, PART_URL};
    use crate::session::ScriptedSite;

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.session.wait_timeout_ms = 20;
        config.session.poll_interval_ms = 5;
        config.session.click_settle_ms = 1;
        Arc::new(config)
    }

    async fn catalog(site: &ScriptedSite) -> Catalog {
        let config = config();
        let session = Session::launch(
            Arc::new(site.launcher()),
            SessionSettings::from_config(&config),
        )
        .await
        .unwrap();
        Catalog::new(session, SqliteStore::open_in_memory().unwrap(), config)
    }

    fn part_site() -> ScriptedSite {
        let site = ScriptedSite::new();
        site.page(PART_URL, part_page("$24.50")).redirect(
            Config::default().site.search_url_for("WPW10321304"),
            PART_URL,
        );
        site
    }

    #[test]
    fn test_tool_call_from_json() {
        let call: ToolCall = serde_json::from_str(
            r#"{"tool":"check_compatibility","part_id":"PS1","model_id":"M1"}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            ToolCall::CheckCompatibility {
                part_id: "PS1".into(),
                model_id: "M1".into()
            }
        );
        assert_eq!(call.name(), "check_compatibility");
    }

    #[tokio::test]
    async fn test_complete_part_is_served_from_cache() {
        let site = part_site();
        let mut catalog = catalog(&site).await;

        let first = catalog.lookup_part("WPW10321304").await.unwrap();
        assert!(first.part.is_complete());
        let navigations = site.navigation_count();

        let second = catalog.lookup_part("WPW10321304").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(site.navigation_count(), navigations);
    }

    #[tokio::test]
    async fn test_get_part_falls_back_to_model() {
        let site = ScriptedSite::new();
        site.page(Config::default().site.model_url_for(MODEL), model_page());
        let mut catalog = catalog(&site).await;

        let text = catalog
            .invoke(ToolCall::GetPart {
                manufacturer_id: MODEL.to_string(),
            })
            .await;
        assert!(text.starts_with(&format!("model_id: {}", MODEL)), "{}", text);
        assert!(text.contains("name: Whirlpool Dishwasher"));
    }

    #[tokio::test]
    async fn test_unknown_ids_render_markers() {
        let site = ScriptedSite::new();
        let mut catalog = catalog(&site).await;

        let part = catalog
            .invoke(ToolCall::GetPart {
                manufacturer_id: "NOPE".to_string(),
            })
            .await;
        assert_eq!(part, INVALID_PART_ID);

        let model = catalog
            .invoke(ToolCall::GetAppliance {
                model_id: "NOPE".to_string(),
            })
            .await;
        assert_eq!(model, INVALID_APPLIANCE_ID);
    }

    #[tokio::test]
    async fn test_invalid_arguments_render_failures() {
        let site = ScriptedSite::new();
        let mut catalog = catalog(&site).await;

        let compat = catalog
            .invoke(ToolCall::CheckCompatibility {
                part_id: "123".to_string(),
                model_id: "MODEL1".to_string(),
            })
            .await;
        assert!(compat.starts_with("FAILURE:"), "{}", compat);

        let search = catalog
            .invoke(ToolCall::SearchParts {
                model_id: MODEL.to_string(),
                query: "  ".to_string(),
            })
            .await;
        assert_eq!(search, "FAILURE: You did not provide a query.");

        let part = catalog
            .invoke(ToolCall::GetPart {
                manufacturer_id: String::new(),
            })
            .await;
        assert!(part.starts_with("FAILURE:"));
        assert_eq!(site.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_compatibility_renders_bool() {
        let config = config();
        let endpoint = compat::compatibility_url(&config.site, "PS1", "M1").unwrap();
        let site = ScriptedSite::new();
        site.page(endpoint, r#"{"compatibilityCheckResult":"NO_MATCH"}"#);
        let mut catalog = catalog(&site).await;

        let text = catalog
            .invoke(ToolCall::CheckCompatibility {
                part_id: "PS1".to_string(),
                model_id: "M1".to_string(),
            })
            .await;
        assert_eq!(text, "false");
    }
}
