use crate::config::types::{
    Config, CrawlConfig, IdentityConfig, SelectorConfig, SessionConfig, SiteConfig, StoreConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_session_config(&config.session)?;
    validate_store_config(&config.store)?;
    validate_crawl_config(&config.crawl)?;
    validate_identity_config(&config.identity)?;
    validate_selectors(&config.selectors)?;
    Ok(())
}

/// Validates site endpoints and templates
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;
    Url::parse(&config.compatibility_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid compatibility-url: {}", e)))?;

    for (name, template, placeholders) in [
        ("search-url", &config.search_url, 1),
        ("model-url", &config.model_url, 1),
        ("parts-url", &config.parts_url, 1),
        ("symptom-url", &config.symptom_url, 2),
    ] {
        let found = template.matches("{}").count();
        if found != placeholders {
            return Err(ConfigError::Validation(format!(
                "{} must contain {} '{{}}' placeholder(s), got {}",
                name, placeholders, found
            )));
        }
        let sample = template.replace("{}", "x");
        Url::parse(&sample)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;
    }

    if config.part_id_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "part-id-prefix cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates session timing bounds
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.wait_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "wait-timeout-ms must be > 0".to_string(),
        ));
    }

    if config.poll_interval_ms == 0 || config.poll_interval_ms > config.wait_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "poll-interval-ms must be between 1 and wait-timeout-ms ({}), got {}",
            config.wait_timeout_ms, config.poll_interval_ms
        )));
    }

    if config.max_click_rounds == 0 {
        return Err(ConfigError::Validation(
            "max-click-rounds must be >= 1".to_string(),
        ));
    }

    if config.max_pages == 0 {
        return Err(ConfigError::Validation("max-pages must be >= 1".to_string()));
    }

    if config.navigation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-secs must be > 0".to_string(),
        ));
    }

    if let Some(remote) = &config.remote_url {
        Url::parse(remote)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid remote-url: {}", e)))?;
    }

    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates batch crawl settings
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.job_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "job-name cannot be empty".to_string(),
        ));
    }

    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.item_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "item-timeout-secs must be > 0".to_string(),
        ));
    }

    if config.progress_every == 0 {
        return Err(ConfigError::Validation(
            "progress-every must be >= 1".to_string(),
        ));
    }

    if config.categories.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "categories cannot contain empty names".to_string(),
        ));
    }

    Ok(())
}

/// Validates the user-agent pool
fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user-agents must contain at least one entry".to_string(),
        ));
    }

    if let Some(blank) = config.user_agents.iter().position(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "user-agents[{}] is empty",
            blank
        )));
    }

    Ok(())
}

/// Every configured selector must parse
fn validate_selectors(config: &SelectorConfig) -> Result<(), ConfigError> {
    for (name, selector) in config.css_selectors() {
        if scraper::Selector::parse(selector).is_err() {
            return Err(ConfigError::InvalidSelector {
                name: name.to_string(),
                selector: selector.to_string(),
            });
        }
    }

    // The "next" control is used scoped to each container
    for container in [
        &config.review_container,
        &config.story_container,
        &config.qna_container,
    ] {
        let scoped = config.next_in(container);
        if scraper::Selector::parse(&scoped).is_err() {
            return Err(ConfigError::InvalidSelector {
                name: "next-page".to_string(),
                selector: scoped,
            });
        }
    }

    if config.show_more_text.is_empty() {
        return Err(ConfigError::Validation(
            "show-more-text cannot be empty".to_string(),
        ));
    }

    Ok(())
}
