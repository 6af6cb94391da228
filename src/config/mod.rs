//! Configuration module for the catalog scraper
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; missing keys fall back to values that match the
//! live vendor site.
//!
//! # Example
//!
//! ```no_run
//! use appliance_catalog::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("catalog.toml")).unwrap();
//! println!("Crawl workers: {}", config.crawl.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, DriverKind, IdentityConfig, SelectorConfig, SessionConfig, SiteConfig,
    StoreConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
