//! Entity scrapers
//!
//! Each scraper presents one catalog entity as a set of cache-backed fields.
//! Accessors return [`FieldResult`]: a cached value comes back without touching
//! the session, a missing one is extracted from the page, written into the
//! record and persisted before it is returned. A failure on one field never
//! invalidates fields that were already stored.

pub mod collections;
pub mod compat;
pub mod model;
pub mod part;
pub mod symptom;
pub mod troubleshooting;

pub use compat::check_compatibility;
pub use model::{ModelScraper, ModelSummary};
pub use part::{PartScraper, PartSummary, PartTarget, ScrapeReport};
pub use symptom::{SymptomRow, SymptomScraper};
pub use troubleshooting::{parse_troubleshooting, Troubleshooting};

use crate::session::SessionError;
use crate::state::TransitionError;
use crate::storage::StorageError;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Errors raised while scraping one entity
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("'{field}' not present on {url}")]
    NotFoundOnPage { field: &'static str, url: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Could not parse {field} from '{value}'")]
    Parse { field: &'static str, value: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl ScrapeError {
    /// True when the underlying session is gone even after its reinit
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_session_lost())
    }
}

/// Outcome of one field access
#[derive(Debug)]
pub struct FieldResult<T> {
    pub value: Option<T>,
    /// True if the value came from the record without a page access
    pub was_cached: bool,
    /// Why the value is missing, or why it could not be persisted
    pub error: Option<ScrapeError>,
}

impl<T> FieldResult<T> {
    pub fn cached(value: T) -> Self {
        Self {
            value: Some(value),
            was_cached: true,
            error: None,
        }
    }

    pub fn scraped(value: T) -> Self {
        Self {
            value: Some(value),
            was_cached: false,
            error: None,
        }
    }

    pub fn failed(error: ScrapeError) -> Self {
        Self {
            value: None,
            was_cached: false,
            error: Some(error),
        }
    }

    pub fn with_error(mut self, error: ScrapeError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldResult<U> {
        FieldResult {
            value: self.value.map(f),
            was_cached: self.was_cached,
            error: self.error,
        }
    }
}

/// A resource a scraper either owns or borrows from its caller
///
/// Closing a scraper releases what it owns and leaves borrowed resources alone.
#[derive(Debug)]
pub enum Handle<'a, T> {
    Owned(T),
    Borrowed(&'a mut T),
}

impl<T> Handle<'_, T> {
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// The owned value, if there is one
    pub fn into_owned(self) -> Option<T> {
        match self {
            Self::Owned(value) => Some(value),
            Self::Borrowed(_) => None,
        }
    }
}

impl<T> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

impl<T> DerefMut for Handle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

impl<'a, T> From<&'a mut T> for Handle<'a, T> {
    fn from(value: &'a mut T) -> Self {
        Self::Borrowed(value)
    }
}

/// Text for display, with a placeholder for absent values
pub(crate) fn or_none<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_deref() {
        let mut borrowed_value = vec![1];
        {
            let mut handle: Handle<'_, Vec<i32>> = Handle::from(&mut borrowed_value);
            handle.push(2);
            assert!(!handle.is_owned());
            assert!(handle.into_owned().is_none());
        }
        assert_eq!(borrowed_value, vec![1, 2]);

        let mut owned = Handle::Owned(vec![3]);
        owned.push(4);
        assert!(owned.is_owned());
        assert_eq!(owned.into_owned(), Some(vec![3, 4]));
    }

    #[test]
    fn test_field_result() {
        let cached = FieldResult::cached(5);
        assert!(cached.was_cached && cached.is_present());
        assert_eq!(cached.map(|v| v * 2).into_value(), Some(10));

        let failed: FieldResult<i32> = FieldResult::failed(ScrapeError::NotFound("x".into()));
        assert!(!failed.is_present());
        assert!(failed.error.is_some());
    }

    #[test]
    fn test_session_lost_detection() {
        let lost = ScrapeError::from(SessionError::SessionLost("gone".into()));
        assert!(lost.is_session_lost());
        assert!(!ScrapeError::InvalidArgument("x".into()).is_session_lost());
    }
}
