//! Batch crawler
//!
//! This module contains the bulk side of the catalog:
//! - Sitemap and category listing discovery
//! - A worker pool that scrapes items with retries and per-item time limits
//! - A failure ledger pass that re-runs missed items

mod coordinator;
pub mod discovery;
pub mod pool;

pub use coordinator::{retry_missed, run_crawl};
pub use discovery::{discover_category_urls, discover_item_urls, load_sitemap};
pub use pool::{
    job_for_name, model_id_from_url, scrape_batch, BatchContext, BatchReport, ItemJob,
    ItemOutcome, ModelImport, PartImport, MODEL_IMPORT_JOB,
};
