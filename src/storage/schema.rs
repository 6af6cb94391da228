//! Table descriptors and SQL generation
//!
//! Each record type declares one static [`TableDescriptor`]. Table creation
//! and the merge-on-write upsert are derived from it, so every entity gets the
//! same semantics without per-table SQL.

use crate::storage::traits::{StorageError, StorageResult};
use rusqlite::Connection;
use std::collections::HashSet;

/// Bound-parameter ceiling used to chunk multi-row statements
///
/// 999 is the compile-time default of older SQLite builds.
pub const MAX_BOUND_PARAMS: usize = 999;

/// Ledger of URLs whose retries were exhausted, keyed by crawl job
pub const LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS failed_urls (
    job TEXT NOT NULL,
    url TEXT NOT NULL,
    UNIQUE (job, url)
);
"#;

/// SQL storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// Static description of one entity table
#[derive(Debug)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub primary_key: &'static str,

    /// Primary key is assigned by SQLite (`INTEGER PRIMARY KEY AUTOINCREMENT`)
    pub auto_increment: bool,

    pub columns: &'static [Column],

    /// Optional natural key; becomes the conflict target instead of the primary key
    pub unique: &'static [&'static str],
}

impl TableDescriptor {
    /// Checks the descriptor's shape
    ///
    /// Called once when a store opens; a malformed descriptor is a startup error.
    pub fn validate(&self) -> StorageResult<()> {
        let fail = |message: String| StorageError::Schema {
            table: self.name,
            message,
        };

        if self.name.is_empty() {
            return Err(fail("table name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(fail("no columns".to_string()));
        }

        let mut seen = HashSet::new();
        for column in self.columns {
            if column.name.is_empty() || !is_identifier(column.name) {
                return Err(fail(format!("invalid column name '{}'", column.name)));
            }
            if !seen.insert(column.name) {
                return Err(fail(format!("duplicate column '{}'", column.name)));
            }
        }

        let pk = self
            .column(self.primary_key)
            .ok_or_else(|| fail(format!("primary key '{}' is not a column", self.primary_key)))?;

        if self.auto_increment && pk.ty != ColumnType::Integer {
            return Err(fail(format!(
                "auto-increment key '{}' must be INTEGER, got {}",
                pk.name,
                pk.ty.sql_type()
            )));
        }

        for name in self.unique {
            if self.column(name).is_none() {
                return Err(fail(format!("unique column '{}' is not a column", name)));
            }
        }

        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Comma-separated column list in descriptor order
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Columns an upsert conflicts on
    fn conflict_target(&self) -> Vec<&'static str> {
        if self.unique.is_empty() {
            vec![self.primary_key]
        } else {
            self.unique.to_vec()
        }
    }

    /// Rows that fit in one statement without exceeding the parameter ceiling
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BOUND_PARAMS / self.columns.len().max(1)).max(1)
    }
}

fn is_identifier(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Builds the `CREATE TABLE IF NOT EXISTS` statement for a descriptor
pub fn create_table_sql(desc: &TableDescriptor) -> String {
    let mut lines: Vec<String> = desc
        .columns
        .iter()
        .map(|column| {
            if column.name == desc.primary_key {
                if desc.auto_increment {
                    format!("    {} INTEGER PRIMARY KEY AUTOINCREMENT", column.name)
                } else {
                    format!("    {} {} PRIMARY KEY", column.name, column.ty.sql_type())
                }
            } else {
                format!("    {} {}", column.name, column.ty.sql_type())
            }
        })
        .collect();

    if !desc.unique.is_empty() {
        lines.push(format!("    UNIQUE ({})", desc.unique.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        desc.name,
        lines.join(",\n")
    )
}

/// Builds the single-row merge-on-write upsert for a descriptor
pub fn upsert_sql(desc: &TableDescriptor) -> String {
    upsert_many_sql(desc, 1)
}

/// Builds a `rows`-row merge-on-write upsert
///
/// On conflict every other column becomes `COALESCE(excluded.col, table.col)`,
/// so an incoming NULL never overwrites a stored value.
pub fn upsert_many_sql(desc: &TableDescriptor, rows: usize) -> String {
    let placeholders = vec!["?"; desc.columns.len()].join(", ");
    let values = vec![format!("({})", placeholders); rows.max(1)].join(", ");

    let target = desc.conflict_target();
    let updates: Vec<String> = desc
        .columns
        .iter()
        .filter(|c| c.name != desc.primary_key && !target.contains(&c.name))
        .map(|c| {
            format!(
                "{col} = COALESCE(excluded.{col}, {table}.{col})",
                col = c.name,
                table = desc.name
            )
        })
        .collect();

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) {}",
        desc.name,
        desc.column_list(),
        values,
        target.join(", "),
        action
    )
}

/// Creates the table for one descriptor after validating it
pub fn create_table(conn: &Connection, desc: &TableDescriptor) -> StorageResult<()> {
    desc.validate()?;
    conn.execute_batch(&create_table_sql(desc))?;
    Ok(())
}

/// Initializes every entity table plus the failure ledger
///
/// Safe to call on an existing database; all statements are `IF NOT EXISTS`.
pub fn initialize_schema(conn: &Connection, tables: &[&TableDescriptor]) -> StorageResult<()> {
    for desc in tables {
        create_table(conn, desc)?;
    }
    conn.execute_batch(LEDGER_SQL)?;
    Ok(())
}
