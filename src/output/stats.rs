//! Statistics from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! cache statistics from the storage layer.

use crate::crawl::BatchReport;
use crate::storage::{SqliteStore, StorageResult, ALL_TABLES};

/// Catalog cache statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogStatistics {
    /// Row count per table, in schema order
    pub tables: Vec<(&'static str, u64)>,

    /// Ledger namespace the failure count belongs to
    pub job: String,

    /// URLs waiting in the failure ledger for `job`
    pub failed_urls: u64,
}

impl CatalogStatistics {
    pub fn rows(&self, table: &str) -> Option<u64> {
        self.tables
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, count)| *count)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
/// * `job` - Crawl job whose ledger entries are counted
///
/// # Returns
///
/// * `Ok(CatalogStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(store: &SqliteStore, job: &str) -> StorageResult<CatalogStatistics> {
    let mut tables = Vec::with_capacity(ALL_TABLES.len());
    for desc in ALL_TABLES {
        tables.push((desc.name, store.count_table(desc)?));
    }

    Ok(CatalogStatistics {
        tables,
        job: job.to_string(),
        failed_urls: store.count_failures(job)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Rows by Table:");
    for (table, count) in &stats.tables {
        println!("  {}: {}", table, count);
    }
    println!("  total: {}", stats.total_rows());
    println!();

    println!("Failure Ledger ({}): {} URLs", stats.job, stats.failed_urls);
}

/// Prints the outcome of one batch, failed URLs included
pub fn print_batch_report(report: &BatchReport) {
    println!("=== Batch '{}' ===\n", report.job);
    println!("  Items: {}", report.total());
    println!("  Succeeded: {}", report.succeeded());
    println!("  Failed: {}", report.failed());
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());

    let failed = report.failed_urls();
    if !failed.is_empty() {
        println!();
        println!("Recorded to ledger ({}):", failed.len());
        for url in failed {
            println!("  - {}", url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PartRecord, ReplacementRecord};

    #[test]
    fn test_statistics_count_rows_and_ledger() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.save(&PartRecord::new("W1")).unwrap();
        store.save(&PartRecord::new("W2")).unwrap();
        store
            .save_batch(&[
                ReplacementRecord::new("W1", "AP1"),
                ReplacementRecord::new("W1", "AP2"),
            ])
            .unwrap();
        store.record_failure("parts", "https://s.test/1").unwrap();
        store.record_failure("models", "https://s.test/2").unwrap();

        let stats = load_statistics(&store, "parts").unwrap();
        assert_eq!(stats.tables.len(), ALL_TABLES.len());
        assert_eq!(stats.rows("parts"), Some(2));
        assert_eq!(stats.rows("part_replacements"), Some(2));
        assert_eq!(stats.rows("models"), Some(0));
        assert_eq!(stats.rows("nope"), None);
        assert_eq!(stats.total_rows(), 4);
        assert_eq!(stats.failed_urls, 1);
    }
}
