//! Crawl orchestration
//!
//! A full crawl reads the sitemap, keeps the category pages of interest, walks
//! each category listing for part links and hands the links to the worker pool.

use crate::crawl::discovery::{discover_category_urls, discover_item_urls, load_sitemap};
use crate::crawl::pool::{scrape_batch, BatchContext, BatchReport, ItemJob, PartImport};
use crate::session::Session;
use crate::storage::SqliteStore;
use crate::CatalogError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs a complete crawl
///
/// # Arguments
///
/// * `ctx` - Configuration, browser launcher and database path
///
/// # Returns
///
/// * `Ok(BatchReport)` - Outcome of every discovered part page
/// * `Err(CatalogError)` - The sitemap or the ledger was unusable
pub async fn run_crawl(ctx: &BatchContext) -> Result<BatchReport, CatalogError> {
    let config = Arc::clone(&ctx.config);
    let sitemap = load_sitemap(&config.crawl.sitemap).await?;
    let categories = discover_category_urls(&sitemap, &config.crawl.categories)?;
    if categories.is_empty() {
        warn!("No category in the sitemap matches {:?}", config.crawl.categories);
    }

    let mut session = Session::launch(Arc::clone(&ctx.launcher), ctx.settings()).await?;
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for category in &categories {
        match discover_item_urls(
            &mut session,
            category,
            &config.selectors.category_item_link,
            config.session.max_pages,
        )
        .await
        {
            Ok(found) => {
                info!("{}: {} part pages", category, found.len());
                items.extend(found.into_iter().filter(|url| seen.insert(url.clone())));
            }
            Err(e) if e.is_session_lost() => return Err(e.into()),
            Err(e) => warn!("Skipping category {}: {}", category, e),
        }
    }
    session.close().await?;

    info!(
        "Discovered {} part pages across {} categories",
        items.len(),
        categories.len()
    );
    let job = Arc::new(PartImport::from_config(&config));
    scrape_batch(items, config.crawl.workers, job, ctx).await
}

/// Re-runs every URL the ledger holds for `job`
///
/// The job both names the ledger namespace and scrapes each URL, so model
/// imports are retried as models. Items that succeed leave the ledger; the
/// rest stay for the next pass.
pub async fn retry_missed(
    job: Arc<dyn ItemJob>,
    ctx: &BatchContext,
) -> Result<BatchReport, CatalogError> {
    let job_name = job.name().to_string();
    let urls = SqliteStore::open(&ctx.database_path)?.failed_urls(&job_name)?;
    if urls.is_empty() {
        info!("Ledger for '{}' is empty, nothing to retry", job_name);
        return Ok(BatchReport {
            job: job_name,
            ..BatchReport::default()
        });
    }

    info!("Retrying {} missed items of '{}'", urls.len(), job_name);
    scrape_batch(urls, ctx.config.crawl.workers, job, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crawl::pool::{job_for_name, MODEL_IMPORT_JOB};
    use crate::scrapers::model::tests::{model_page, MODEL};
    use crate::scrapers::part::tests::{part_page, PART_URL};
    use crate::session::ScriptedSite;
    use crate::storage::{ModelRecord, PartRecord};

    const CATEGORY: &str = "https://www.partselect.com/Dishwasher-Parts.htm";

    fn context(site: &ScriptedSite, dir: &tempfile::TempDir) -> BatchContext {
        let sitemap = dir.path().join("sitemap.xml");
        std::fs::write(
            &sitemap,
            format!(
                "<urlset><url><loc>{}</loc></url>\
                 <url><loc>https://www.partselect.com/Washer-Parts.htm</loc></url></urlset>",
                CATEGORY
            ),
        )
        .unwrap();

        let mut config = Config::default();
        config.store.database_path = dir.path().join("crawl.sqlite").display().to_string();
        config.crawl.sitemap = sitemap.display().to_string();
        config.crawl.categories = vec!["dishwasher".to_string()];
        config.crawl.workers = 2;
        config.crawl.max_retries = 0;
        config.crawl.request_delay_ms = 0;
        config.crawl.include_collections = false;
        config.session.wait_timeout_ms = 20;
        config.session.poll_interval_ms = 5;
        config.session.click_settle_ms = 1;
        BatchContext::new(Arc::new(config), Arc::new(site.launcher()))
    }

    #[tokio::test]
    async fn test_crawl_scrapes_discovered_parts_and_records_misses() {
        let missing = "https://www.partselect.com/PS404.htm";
        let site = ScriptedSite::new();
        site.page(
            CATEGORY,
            format!(
                "<html><body><a class='nf__part__detail__title' href='{}'>a</a>\
                 <a class='nf__part__detail__title' href='{}'>b</a></body></html>",
                PART_URL, missing
            ),
        )
        .page(PART_URL, part_page("$24.50"));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&site, &dir);
        let report = run_crawl(&ctx).await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed_urls(), vec![missing]);
        assert_eq!(site.navigations_matching("Washer-Parts"), 0);

        let store = SqliteStore::open(&ctx.database_path).unwrap();
        assert_eq!(store.count::<PartRecord>().unwrap(), 1);
        assert_eq!(store.failed_urls("parts").unwrap(), vec![missing]);
    }

    #[tokio::test]
    async fn test_retry_missed_drains_recovered_items() {
        let site = ScriptedSite::new();
        site.page(PART_URL, part_page("$24.50"));
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&site, &dir);
        {
            let mut store = SqliteStore::open(&ctx.database_path).unwrap();
            store.record_failure("parts", PART_URL).unwrap();
        }

        let job = job_for_name("parts", &ctx.config);
        let report = retry_missed(Arc::clone(&job), &ctx).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        let store = SqliteStore::open(&ctx.database_path).unwrap();
        assert_eq!(store.count_failures("parts").unwrap(), 0);

        let empty = retry_missed(job, &ctx).await.unwrap();
        assert_eq!(empty.total(), 0);
    }

    #[tokio::test]
    async fn test_retry_missed_reruns_model_imports_as_models() {
        let site = ScriptedSite::new();
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&site, &dir);
        let model_url = ctx.config.site.model_url_for(MODEL);
        let job = job_for_name(MODEL_IMPORT_JOB, &ctx.config);

        // The model page is down on the first pass
        let first = scrape_batch(vec![model_url.clone()], 1, Arc::clone(&job), &ctx)
            .await
            .unwrap();
        assert_eq!(first.failed(), 1);
        {
            let store = SqliteStore::open(&ctx.database_path).unwrap();
            assert_eq!(store.failed_urls(MODEL_IMPORT_JOB).unwrap(), vec![model_url.clone()]);
        }

        site.page(model_url.clone(), model_page());
        let report = retry_missed(job, &ctx).await.unwrap();
        assert_eq!(report.succeeded(), 1, "{:?}", report.outcomes);

        let store = SqliteStore::open(&ctx.database_path).unwrap();
        assert_eq!(store.count_failures(MODEL_IMPORT_JOB).unwrap(), 0);
        let model = store.get::<ModelRecord>(MODEL).unwrap().unwrap();
        assert_eq!(model.name.as_deref(), Some("Whirlpool Dishwasher"));
    }
}
