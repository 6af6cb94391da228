use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub crawl: CrawlConfig,
    pub identity: IdentityConfig,
    pub selectors: SelectorConfig,
}

/// Vendor site endpoints
///
/// Templates carry a `{}` placeholder that is replaced with the (encoded) id.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Site root, used to absolutize relative links
    pub base_url: String,

    /// Search endpoint that redirects a part id to its page
    pub search_url: String,

    /// Model landing page
    pub model_url: String,

    /// Paginated parts listing of a model
    pub parts_url: String,

    /// Symptom page of a model; first `{}` is the model, second the symptom
    pub symptom_url: String,

    /// Part/model compatibility endpoint (query parameters are appended)
    pub compatibility_url: String,

    /// Prefix every catalog part id carries (e.g. `PS11752778`)
    pub part_id_prefix: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.partselect.com/".to_string(),
            search_url: "https://www.partselect.com/api/search/?searchterm={}".to_string(),
            model_url: "https://www.partselect.com/Models/{}/".to_string(),
            parts_url: "https://www.partselect.com/Models/{}/Parts/".to_string(),
            symptom_url: "https://www.partselect.com/Models/{}/Symptoms/{}/".to_string(),
            compatibility_url: "https://www.partselect.com/api/Part/PartCompatibilityCheck"
                .to_string(),
            part_id_prefix: "PS".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn search_url_for(&self, term: &str) -> String {
        fill(&self.search_url, &[term])
    }

    pub fn model_url_for(&self, model_id: &str) -> String {
        fill(&self.model_url, &[model_id])
    }

    pub fn parts_url_for(&self, model_id: &str) -> String {
        fill(&self.parts_url, &[model_id])
    }

    pub fn symptom_url_for(&self, model_id: &str, symptom: &str) -> String {
        fill(&self.symptom_url, &[model_id, symptom])
    }

    /// Resolves a possibly relative href against the site root
    pub fn absolute(&self, href: &str) -> String {
        match url::Url::parse(&self.base_url).and_then(|base| base.join(href)) {
            Ok(url) => url.to_string(),
            Err(_) => href.to_string(),
        }
    }
}

/// Replaces successive `{}` placeholders with URL-encoded values
fn fill(template: &str, values: &[&str]) -> String {
    let mut out = template.to_string();
    for value in values {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        out = out.replacen("{}", &encoded, 1);
    }
    out
}

/// Which automation backend a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Plain HTTP fetches; clicks follow anchor hrefs
    Http,
    /// Headless Chrome through the DevTools protocol
    Chromium,
}

/// Session engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    pub driver: DriverKind,
    pub headless: bool,

    /// Upper bound for element waits (milliseconds)
    pub wait_timeout_ms: u64,

    /// Interval between element polls (milliseconds)
    pub poll_interval_ms: u64,

    /// Pause before relaunching a crashed browser (milliseconds)
    pub reinit_delay_ms: u64,

    /// Pause after each expander click (milliseconds)
    pub click_settle_ms: u64,

    /// Bound on repeated "show more" clicks
    pub max_click_rounds: usize,

    /// Bound on any paginated listing
    pub max_pages: usize,

    pub navigation_timeout_secs: u64,

    /// Extra Chrome command-line flags
    pub chrome_args: Vec<String>,

    /// Connect to an already running Chrome instead of launching one
    pub remote_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Http,
            headless: true,
            wait_timeout_ms: 10_000,
            poll_interval_ms: 250,
            reinit_delay_ms: 10_000,
            click_settle_ms: 500,
            max_click_rounds: 50,
            max_pages: 200,
            navigation_timeout_secs: 30,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl SessionConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reinit_delay(&self) -> Duration {
        Duration::from_millis(self.reinit_delay_ms)
    }

    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Cache database location
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "scraper_data.sqlite".to_string(),
        }
    }
}

/// Batch crawl settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Ledger namespace; failures of different jobs never mix
    pub job_name: String,

    pub workers: usize,

    /// Extra attempts per item after the first failure
    pub max_retries: u32,

    pub retry_backoff_ms: u64,

    /// Hard limit for one item, all attempts included
    pub item_timeout_secs: u64,

    /// Pause between two items on the same worker (milliseconds)
    pub request_delay_ms: u64,

    /// Sitemap file path or http(s) URL
    pub sitemap: String,

    /// Category names matched against sitemap entries (case-insensitive)
    pub categories: Vec<String>,

    /// Also collect reviews, stories and Q&A for each part
    pub include_collections: bool,

    /// Log a progress line every N finished items
    pub progress_every: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            job_name: "parts".to_string(),
            workers: 4,
            max_retries: 2,
            retry_backoff_ms: 2_000,
            item_timeout_secs: 300,
            request_delay_ms: 1_000,
            sitemap: "sitemap.xml".to_string(),
            categories: vec!["refrigerator".to_string(), "dishwasher".to_string()],
            include_collections: true,
            progress_every: 10,
        }
    }
}

impl CrawlConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Request identity rotation and rate-limit handling
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub user_agents: Vec<String>,

    /// Attempts on 403/429 before a navigation fails
    pub max_rate_limit_retries: u32,

    pub rate_limit_backoff_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
            ],
            max_rate_limit_retries: 7,
            rate_limit_backoff_ms: 1_000,
        }
    }
}

impl IdentityConfig {
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
}

/// CSS selectors and marker texts for the vendor markup
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SelectorConfig {
    // ===== Shared =====
    /// Close button of the marketing overlay that intercepts clicks
    pub overlay_close: String,
    /// "Next" control inside a paginated collection container
    pub next_page: String,

    // ===== Part page =====
    pub part_name: String,
    pub part_availability: String,
    pub part_catalog_id: String,
    pub part_manufacturer_id: String,
    pub part_price: String,
    pub repair_rating: String,
    pub part_rating: String,
    pub part_description: String,
    pub related_parts: String,
    pub troubleshooting: String,
    pub show_more: String,
    pub show_more_text: String,

    // ===== Part collections =====
    pub review_container: String,
    pub review_block: String,
    pub review_header: String,
    pub review_text: String,
    pub story_container: String,
    pub story_block: String,
    pub story_title: String,
    pub story_text: String,
    pub qna_container: String,
    pub qna_block: String,
    pub qna_question: String,
    pub qna_answer: String,

    // ===== Model page =====
    pub model_name: String,
    pub model_description: String,
    pub model_symptom_link: String,
    pub model_symptom_description: String,
    pub listing_part: String,
    pub listing_part_name: String,
    pub listing_catalog_label: String,
    pub listing_manufacturer_label: String,
    pub listing_unavailable_text: String,

    // ===== Symptom page =====
    pub symptom_show_more: String,
    pub symptom_row: String,
    pub symptom_percent: String,
    pub symptom_item: String,
    pub symptom_price: String,

    // ===== Category listing =====
    pub category_item_link: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            overlay_close: ".bx-button[data-click='close']".to_string(),
            next_page: "ul.pagination.js-pagination li.next:not(.disabled)".to_string(),
            part_name: ".title-lg.mt-1.mb-3".to_string(),
            part_availability: "span[itemprop=\"availability\"]".to_string(),
            part_catalog_id: "span[itemprop=\"productID\"]".to_string(),
            part_manufacturer_id: "span[itemprop=\"mpn\"]".to_string(),
            part_price: "span.js-partPrice".to_string(),
            repair_rating: "div.pd__repair-rating__container__item p.bold".to_string(),
            part_rating: "div.rating__stars__upper".to_string(),
            part_description: "div[itemprop=\"description\"]".to_string(),
            related_parts: "div.pd__related-part a.bold".to_string(),
            troubleshooting: "div#Troubleshooting + div".to_string(),
            show_more: ".bold.text-link.underline".to_string(),
            show_more_text: "Show more".to_string(),
            review_container: ".js-resultsRenderer[data-event-target='Customer Review']"
                .to_string(),
            review_block: "div.pd__cust-review__submitted-review".to_string(),
            review_header: "div.bold".to_string(),
            review_text: "div.js-searchKeys".to_string(),
            story_container: ".js-resultsRenderer[data-event-target='Repair Story']".to_string(),
            story_block: "div.repair-story".to_string(),
            story_title: "div.repair-story__title".to_string(),
            story_text: "div.repair-story__instruction .js-searchKeys".to_string(),
            qna_container: "div.js-resultsRenderer[id=QuestionsAndAnswersContent]".to_string(),
            qna_block: "div.js-dataContainer div.qna__question.js-qnaResponse".to_string(),
            qna_question: "div.js-searchKeys".to_string(),
            qna_answer: "div.qna__ps-answer__msg div.js-searchKeys".to_string(),
            model_name: "h1.title-main".to_string(),
            model_description: ".description".to_string(),
            model_symptom_link: "a.symptoms".to_string(),
            model_symptom_description: ".symptoms__descr".to_string(),
            listing_part: "div.mega-m__part".to_string(),
            listing_part_name: "a.mega-m__part__name".to_string(),
            listing_catalog_label: "PartSelect #:".to_string(),
            listing_manufacturer_label: "Manufacturer #:".to_string(),
            listing_unavailable_text: "No Longer Available".to_string(),
            symptom_show_more: "div.bold.text-link[data-collapse-trigger=show-more]".to_string(),
            symptom_row: "div.symptoms".to_string(),
            symptom_percent: "div.symptoms__percent".to_string(),
            symptom_item: "div.flex-grow-1 div.flex-grow-1".to_string(),
            symptom_price: "div.symptoms__buy-part div.mega-m__part__price".to_string(),
            category_item_link: "a.nf__part__detail__title".to_string(),
        }
    }
}

impl SelectorConfig {
    /// Every CSS selector together with its config key, for validation
    pub fn css_selectors(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("overlay-close", &self.overlay_close),
            ("next-page", &self.next_page),
            ("part-name", &self.part_name),
            ("part-availability", &self.part_availability),
            ("part-catalog-id", &self.part_catalog_id),
            ("part-manufacturer-id", &self.part_manufacturer_id),
            ("part-price", &self.part_price),
            ("repair-rating", &self.repair_rating),
            ("part-rating", &self.part_rating),
            ("part-description", &self.part_description),
            ("related-parts", &self.related_parts),
            ("troubleshooting", &self.troubleshooting),
            ("show-more", &self.show_more),
            ("review-container", &self.review_container),
            ("review-block", &self.review_block),
            ("review-header", &self.review_header),
            ("review-text", &self.review_text),
            ("story-container", &self.story_container),
            ("story-block", &self.story_block),
            ("story-title", &self.story_title),
            ("story-text", &self.story_text),
            ("qna-container", &self.qna_container),
            ("qna-block", &self.qna_block),
            ("qna-question", &self.qna_question),
            ("qna-answer", &self.qna_answer),
            ("model-name", &self.model_name),
            ("model-description", &self.model_description),
            ("model-symptom-link", &self.model_symptom_link),
            ("model-symptom-description", &self.model_symptom_description),
            ("listing-part", &self.listing_part),
            ("listing-part-name", &self.listing_part_name),
            ("symptom-show-more", &self.symptom_show_more),
            ("symptom-row", &self.symptom_row),
            ("symptom-percent", &self.symptom_percent),
            ("symptom-item", &self.symptom_item),
            ("symptom-price", &self.symptom_price),
            ("category-item-link", &self.category_item_link),
        ]
    }

    /// "Next" control scoped to one collection container
    pub fn next_in(&self, container: &str) -> String {
        format!("{} {}", container, self.next_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_encode_ids() {
        let site = SiteConfig::default();
        assert_eq!(
            site.model_url_for("WDT780SAEM1"),
            "https://www.partselect.com/Models/WDT780SAEM1/"
        );
        assert_eq!(
            site.search_url_for("PS 11"),
            "https://www.partselect.com/api/search/?searchterm=PS+11"
        );
        assert_eq!(
            site.symptom_url_for("M1", "Leaking"),
            "https://www.partselect.com/Models/M1/Symptoms/Leaking/"
        );
    }

    #[test]
    fn test_absolute_joins_relative_href() {
        let site = SiteConfig::default();
        assert_eq!(
            site.absolute("/PS11752778-Whirlpool.htm"),
            "https://www.partselect.com/PS11752778-Whirlpool.htm"
        );
        assert_eq!(site.absolute("https://other.test/x"), "https://other.test/x");
    }

    #[test]
    fn test_next_in_scopes_selector() {
        let selectors = SelectorConfig::default();
        assert_eq!(
            selectors.next_in("#reviews"),
            "#reviews ul.pagination.js-pagination li.next:not(.disabled)"
        );
    }
}
