//! Output module for reporting on the catalog cache
//!
//! This module handles:
//! - Counting cached rows per table
//! - Reporting the failure ledger of a crawl job
//! - Printing batch reports

pub mod stats;

pub use stats::{load_statistics, print_batch_report, print_statistics, CatalogStatistics};
