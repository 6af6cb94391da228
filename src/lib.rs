//! Appliance Catalog: a cache-backed scraper for an appliance parts vendor
//!
//! This crate drives a browser (or a plain HTTP client for static pages) against
//! the vendor site, extracts parts, models, symptoms and the review/story/Q&A
//! collections attached to parts, and keeps them in a SQLite cache that can be
//! filled lazily, field by field, or in bulk by the batch crawler.

pub mod config;
pub mod crawl;
pub mod output;
pub mod scrapers;
pub mod session;
pub mod state;
pub mod storage;
pub mod tools;

use thiserror::Error;

/// Main error type for catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] scrapers::ScrapeError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector for {name}: {selector}")]
    InvalidSelector { name: String, selector: String },
}

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use scrapers::{FieldResult, ModelScraper, PartScraper, ScrapeError, SymptomScraper};
pub use session::{Session, SessionError};
pub use state::ScraperState;
pub use storage::SqliteStore;
