//! Storage traits and error types
//!
//! This module defines the [`Record`] trait every cached entity implements and
//! the error type shared by all storage operations.

use crate::storage::schema::TableDescriptor;
use rusqlite::types::Value;
use rusqlite::Row;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Malformed table descriptor for {table}: {message}")]
    Schema { table: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// An entity that maps onto one table through a static descriptor
///
/// `to_values` and `from_row` both follow the column order of `TABLE`.
pub trait Record: Sized {
    const TABLE: &'static TableDescriptor;

    /// Primary key value of this record
    fn key(&self) -> Value;

    /// Column values in descriptor order
    fn to_values(&self) -> Vec<Value>;

    /// Builds a record from a row selected in descriptor order
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// A record that belongs to one part through its `manufacturer_id` column
pub trait PartOwned: Record {
    fn manufacturer_id(&self) -> &str;
}

// ===== Value conversions =====

pub(crate) fn text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

pub(crate) fn real(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

pub(crate) fn boolean(value: Option<bool>) -> Value {
    value
        .map(|b| Value::Integer(i64::from(b)))
        .unwrap_or(Value::Null)
}

pub(crate) fn integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}
