//! SQLite store implementation
//!
//! One [`SqliteStore`] wraps one connection. Batch workers each open their own;
//! a store is moved into the task that uses it and never shared.

use crate::storage::schema::{initialize_schema, upsert_many_sql, upsert_sql, TableDescriptor};
use crate::storage::traits::{PartOwned, Record, StorageResult};
use crate::storage::ALL_TABLES;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::path::Path;

/// SQLite-backed catalog cache
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a store at `path` and ensures every table exists
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database, or a descriptor is malformed
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // WAL lets worker connections read while another writes
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn, ALL_TABLES)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory store
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn, ALL_TABLES)?;
        Ok(Self { conn })
    }

    /// Creates the table for an extra descriptor; a no-op if it exists
    pub fn create_table(&self, desc: &TableDescriptor) -> StorageResult<()> {
        crate::storage::schema::create_table(&self.conn, desc)
    }

    // ===== Entity Access =====

    /// Looks up one record by primary key
    pub fn get<R: Record>(&self, key: impl ToSql) -> StorageResult<Option<R>> {
        let desc = R::TABLE;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            desc.column_list(),
            desc.name,
            desc.primary_key
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let record = stmt.query_row([key], |row| R::from_row(row)).optional()?;
        Ok(record)
    }

    /// Upserts one record; stored non-null values survive incoming nulls
    pub fn save<R: Record>(&mut self, record: &R) -> StorageResult<()> {
        let mut stmt = self.conn.prepare_cached(&upsert_sql(R::TABLE))?;
        stmt.execute(params_from_iter(record.to_values()))?;
        Ok(())
    }

    /// Upserts many records with multi-row statements inside one transaction
    ///
    /// Returns the number of records submitted.
    pub fn save_batch<R: Record>(&mut self, records: &[R]) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let desc = R::TABLE;
        let tx = self.conn.transaction()?;
        for chunk in records.chunks(desc.rows_per_statement()) {
            let sql = upsert_many_sql(desc, chunk.len());
            let values = chunk.iter().flat_map(|r| r.to_values());
            let mut stmt = tx.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(values))?;
        }
        tx.commit()?;

        Ok(records.len())
    }

    /// Every record owned by one part, in insertion order
    pub fn find_by_owner<R: PartOwned>(&self, manufacturer_id: &str) -> StorageResult<Vec<R>> {
        let desc = R::TABLE;
        let sql = format!(
            "SELECT {} FROM {} WHERE manufacturer_id = ?1 ORDER BY rowid",
            desc.column_list(),
            desc.name
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let records = stmt
            .query_map([manufacturer_id], |row| R::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Row count of a record's table
    pub fn count<R: Record>(&self) -> StorageResult<u64> {
        self.count_table(R::TABLE)
    }

    pub fn count_table(&self, desc: &TableDescriptor) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", desc.name);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Failure Ledger =====

    /// Records a URL whose retries were exhausted; repeated calls are ignored
    pub fn record_failure(&mut self, job: &str, url: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO failed_urls (job, url) VALUES (?1, ?2)",
            params![job, url],
        )?;
        Ok(())
    }

    /// Removes a URL from the ledger; returns whether an entry existed
    pub fn clear_failure(&mut self, job: &str, url: &str) -> StorageResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM failed_urls WHERE job = ?1 AND url = ?2",
            params![job, url],
        )?;
        Ok(removed > 0)
    }

    /// URLs recorded for a job, oldest first
    pub fn failed_urls(&self, job: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM failed_urls WHERE job = ?1 ORDER BY rowid")?;
        let urls = stmt
            .query_map([job], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    pub fn count_failures(&self, job: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM failed_urls WHERE job = ?1",
            [job],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        ModelRecord, PartRecord, QnaRecord, ReplacementRecord, ReviewRecord, StoryRecord,
    };

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn sample_part() -> PartRecord {
        PartRecord {
            manufacturer_id: "WPW10321304".into(),
            catalog_id: Some("PS11752778".into()),
            name: Some("Refrigerator Door Shelf Bin".into()),
            url: Some("https://www.partselect.com/PS11752778.htm".into()),
            availability: Some(true),
            price: Some(44.95),
            rating: Some(4.85),
            ..Default::default()
        }
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = create_test_store();
        let part: Option<PartRecord> = store.get("NOPE").unwrap();
        assert!(part.is_none());
    }

    #[test]
    fn test_save_twice_is_idempotent() {
        let mut store = create_test_store();
        let part = sample_part();

        store.save(&part).unwrap();
        store.save(&part).unwrap();

        assert_eq!(store.count::<PartRecord>().unwrap(), 1);
        let loaded: PartRecord = store.get("WPW10321304").unwrap().unwrap();
        assert_eq!(loaded, part);
    }

    #[test]
    fn test_merge_does_not_clobber_with_null() {
        let mut store = create_test_store();

        let mut stored = PartRecord::new("X1");
        stored.price = Some(19.99);
        store.save(&stored).unwrap();

        let mut incoming = PartRecord::new("X1");
        incoming.name = Some("Widget".into());
        store.save(&incoming).unwrap();

        let merged: PartRecord = store.get("X1").unwrap().unwrap();
        assert_eq!(merged.price, Some(19.99));
        assert_eq!(merged.name.as_deref(), Some("Widget"));
    }

    #[test]
    fn test_non_null_incoming_replaces_value() {
        let mut store = create_test_store();
        let mut part = PartRecord::new("X1");
        part.price = Some(19.99);
        store.save(&part).unwrap();

        part.price = Some(17.49);
        store.save(&part).unwrap();

        let loaded: PartRecord = store.get("X1").unwrap().unwrap();
        assert_eq!(loaded.price, Some(17.49));
    }

    #[test]
    fn test_duplicate_reviews_collapse_to_one_row() {
        let mut store = create_test_store();
        let a = ReviewRecord::new("X1", Some("Works".into()), Some("Easy install".into()));
        let b = ReviewRecord::new("X1", Some("Works".into()), Some("Easy install".into()));
        assert_eq!(a.review_id, b.review_id);

        store.save(&a).unwrap();
        store.save(&b).unwrap();
        assert_eq!(store.count::<ReviewRecord>().unwrap(), 1);

        // Same content again through the batch path
        store.save_batch(&[a.clone(), b]).unwrap();
        assert_eq!(store.count::<ReviewRecord>().unwrap(), 1);
    }

    #[test]
    fn test_save_batch_and_find_by_owner() {
        let mut store = create_test_store();
        let stories: Vec<StoryRecord> = (0..5)
            .map(|i| StoryRecord::new("X1", Some(format!("Story {}", i)), Some("text".into())))
            .collect();
        let other = StoryRecord::new("X2", Some("Other".into()), None);

        assert_eq!(store.save_batch(&stories).unwrap(), 5);
        store.save(&other).unwrap();

        let loaded: Vec<StoryRecord> = store.find_by_owner("X1").unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[0].title.as_deref(), Some("Story 0"));
    }

    #[test]
    fn test_save_batch_chunks_large_inputs() {
        let mut store = create_test_store();
        let qnas: Vec<QnaRecord> = (0..500)
            .map(|i| QnaRecord::new("X1", Some(format!("Q{}", i)), None, Some("A".into())))
            .collect();
        store.save_batch(&qnas).unwrap();
        assert_eq!(store.count::<QnaRecord>().unwrap(), 500);
    }

    #[test]
    fn test_replacements_deduplicate_on_natural_key() {
        let mut store = create_test_store();
        let rows = vec![
            ReplacementRecord::new("X1", "AP6019471"),
            ReplacementRecord::new("X1", "2171046"),
        ];
        store.save_batch(&rows).unwrap();
        store.save_batch(&rows).unwrap();
        store.save(&ReplacementRecord::new("X1", "2171046")).unwrap();

        let loaded: Vec<ReplacementRecord> = store.find_by_owner("X1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|r| r.replacement_id.is_some()));
    }

    #[test]
    fn test_model_roundtrip() {
        let mut store = create_test_store();
        let mut model = ModelRecord::new("WDT780SAEM1");
        model.name = Some("Whirlpool Dishwasher".into());
        store.save(&model).unwrap();

        let loaded: ModelRecord = store.get("WDT780SAEM1").unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Whirlpool Dishwasher"));
        assert!(loaded.parts.is_none());
    }

    #[test]
    fn test_failure_ledger() {
        let mut store = create_test_store();
        store.record_failure("parts", "https://a.test/1").unwrap();
        store.record_failure("parts", "https://a.test/1").unwrap();
        store.record_failure("parts", "https://a.test/2").unwrap();
        store.record_failure("models", "https://a.test/1").unwrap();

        assert_eq!(store.count_failures("parts").unwrap(), 2);
        assert_eq!(
            store.failed_urls("parts").unwrap(),
            vec!["https://a.test/1", "https://a.test/2"]
        );

        assert!(store.clear_failure("parts", "https://a.test/1").unwrap());
        assert!(!store.clear_failure("parts", "https://a.test/1").unwrap());
        assert_eq!(store.failed_urls("parts").unwrap(), vec!["https://a.test/2"]);
        assert_eq!(store.count_failures("models").unwrap(), 1);
    }

    #[test]
    fn test_file_store_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save(&sample_part()).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded: Option<PartRecord> = store.get("WPW10321304").unwrap();
        assert!(loaded.is_some());
    }
}
