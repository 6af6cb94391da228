//! Symptom page scraper
//!
//! A symptom page ranks the parts that most often fix one symptom of a model.

use crate::config::{Config, SelectorConfig};
use crate::scrapers::{Handle, ScrapeError};
use crate::session::{Element, Session};
use crate::state::{Lifecycle, ScraperState};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// One ranked row of a symptom page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymptomRow {
    pub rank: usize,
    /// Share of repairs fixed by this part, as displayed (e.g. `42%`)
    pub percent: String,
    pub part_title: String,
    pub part_url: String,
    pub part_number: String,
    pub price: String,
}

impl fmt::Display for SymptomRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {} ({}) - {} - {}",
            self.rank, self.part_title, self.part_number, self.percent, self.price
        )
    }
}

/// Reads one row; rows without a part link are skipped
pub fn parse_symptom_row(
    row: &Element,
    rank: usize,
    selectors: &SelectorConfig,
) -> Result<Option<SymptomRow>, ScrapeError> {
    let Some(item) = row.select_one(&selectors.symptom_item)? else {
        return Ok(None);
    };
    let links = item.select("a")?;
    let Some(title_link) = links.first() else {
        return Ok(None);
    };
    let number_link = links.get(1).unwrap_or(title_link);

    Ok(Some(SymptomRow {
        rank,
        percent: row.select_text(&selectors.symptom_percent)?.unwrap_or_default(),
        part_title: title_link.text(),
        part_url: title_link.attr("href").unwrap_or_default(),
        part_number: number_link.text(),
        price: row.select_text(&selectors.symptom_price)?.unwrap_or_default(),
    }))
}

/// Parts ranked for one symptom of one model
pub struct SymptomScraper<'a> {
    session: Handle<'a, Session>,
    url: String,
    rows: Vec<SymptomRow>,
    lifecycle: Lifecycle,
}

impl<'a> SymptomScraper<'a> {
    /// Loads `url`, expands the collapsed rows and parses the ranking
    pub async fn open(
        mut session: Handle<'a, Session>,
        url: &str,
        config: Arc<Config>,
    ) -> Result<SymptomScraper<'a>, ScrapeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ScrapeError::InvalidArgument("empty symptom url".to_string()));
        }

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(ScraperState::SessionOpen)?;

        let selectors = &config.selectors;
        let expanded = session
            .click_repeatedly(url, &selectors.symptom_show_more, None)
            .await?;
        let elements = session.get_items(url, &selectors.symptom_row).await?;
        lifecycle.advance(ScraperState::RecordResolved)?;

        let mut rows = Vec::with_capacity(elements.len());
        for element in &elements {
            if let Some(row) = parse_symptom_row(element, rows.len() + 1, selectors)? {
                rows.push(row);
            }
        }
        if rows.is_empty() {
            warn!("No symptom rows on {}", url);
        } else {
            lifecycle.mark_populated("rows")?;
        }
        info!("Read {} symptom rows from {} ({} expansions)", rows.len(), url, expanded);

        Ok(Self {
            session,
            url: url.to_string(),
            rows,
            lifecycle,
        })
    }

    /// Symptom page of `model_id` for the symptom slug `symptom`
    pub async fn for_model(
        session: Handle<'a, Session>,
        model_id: &str,
        symptom: &str,
        config: Arc<Config>,
    ) -> Result<SymptomScraper<'a>, ScrapeError> {
        if model_id.trim().is_empty() || symptom.trim().is_empty() {
            return Err(ScrapeError::InvalidArgument(
                "model id and symptom are both required".to_string(),
            ));
        }
        let url = config.site.symptom_url_for(model_id.trim(), symptom.trim());
        Self::open(session, &url, config).await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn rows(&self) -> &[SymptomRow] {
        &self.rows
    }

    pub fn state(&self) -> ScraperState {
        self.lifecycle.state()
    }

    /// Rows keyed by part number; a repeated number keeps its best rank
    pub fn as_map(&self) -> BTreeMap<String, SymptomRow> {
        let mut map = BTreeMap::new();
        for row in &self.rows {
            map.entry(row.part_number.clone())
                .or_insert_with(|| row.clone());
        }
        map
    }

    /// One `rank. title (number) - percent - price` line per row
    pub fn summary(&self) -> String {
        self.rows.iter().map(|row| format!("{}\n", row)).collect()
    }

    pub async fn close(mut self) -> Result<(), ScrapeError> {
        self.lifecycle.advance(ScraperState::Closed)?;
        if let Some(session) = self.session.into_owned() {
            session.close().await?;
        }
        Ok(())
    }
}

impl fmt::Display for SymptomScraper<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClickEffect, ScriptedSite, SessionSettings};

    const URL: &str = "https://www.partselect.com/Models/M1/Symptoms/Leaking/";

    fn row(percent: &str, title: &str, number: &str, price: &str) -> String {
        format!(
            r#"<div class="symptoms">
  <div class="symptoms__percent">{percent}</div>
  <div class="flex-grow-1"><div class="flex-grow-1">
    <a href="/{number}.htm">{title}</a>
    <div>Part # <a href="/{number}.htm">{number}</a></div>
  </div></div>
  <div class="symptoms__buy-part"><div class="mega-m__part__price">{price}</div></div>
</div>"#
        )
    }

    fn page(rows: &[String], more: bool) -> String {
        let expander = if more {
            r#"<div class="bold text-link" data-collapse-trigger="show-more">Show more</div>"#
        } else {
            ""
        };
        format!("<html><body>{}{}</body></html>", rows.concat(), expander)
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.session.wait_timeout_ms = 20;
        config.session.poll_interval_ms = 5;
        config.session.click_settle_ms = 1;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_expands_and_ranks_rows() {
        let config = config();
        let first = vec![
            row("42%", "Door Gasket", "PS11752778", "$24.50"),
            row("20%", "Drain Pump", "PS3406971", "$61.00"),
        ];
        let mut all = first.clone();
        all.push(row("5%", "Door Gasket Kit", "PS11752778", "$30.00"));

        let site = ScriptedSite::new();
        site.page(URL, page(&first, true)).on_click(
            URL,
            config.selectors.symptom_show_more.as_str(),
            vec![ClickEffect::Replace(page(&all, false))],
        );
        let mut session =
            Session::launch(Arc::new(site.launcher()), SessionSettings::from_config(&config))
                .await
                .unwrap();

        let scraper = SymptomScraper::open(Handle::from(&mut session), URL, config)
            .await
            .unwrap();
        assert_eq!(scraper.rows().len(), 3);
        assert_eq!(
            scraper.rows()[0],
            SymptomRow {
                rank: 1,
                percent: "42%".into(),
                part_title: "Door Gasket".into(),
                part_url: "/PS11752778.htm".into(),
                part_number: "PS11752778".into(),
                price: "$24.50".into(),
            }
        );
        assert_eq!(
            scraper.summary(),
            "1. Door Gasket (PS11752778) - 42% - $24.50\n\
             2. Drain Pump (PS3406971) - 20% - $61.00\n\
             3. Door Gasket Kit (PS11752778) - 5% - $30.00\n"
        );

        let map = scraper.as_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["PS11752778"].rank, 1);
        assert_eq!(scraper.state(), ScraperState::FieldsPopulated);
        assert_eq!(site.navigation_count(), 1);
    }

    #[tokio::test]
    async fn test_for_model_requires_both_parts() {
        let site = ScriptedSite::new();
        let config = config();
        let mut session =
            Session::launch(Arc::new(site.launcher()), SessionSettings::from_config(&config))
                .await
                .unwrap();
        let result = SymptomScraper::for_model(Handle::from(&mut session), "M1", "", config).await;
        assert!(matches!(result, Err(ScrapeError::InvalidArgument(_))));
        assert_eq!(site.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_page_without_rows_is_empty() {
        let config = config();
        let site = ScriptedSite::new();
        site.page(URL, page(&[], false));
        let mut session =
            Session::launch(Arc::new(site.launcher()), SessionSettings::from_config(&config))
                .await
                .unwrap();
        let scraper = SymptomScraper::open(Handle::from(&mut session), URL, config)
            .await
            .unwrap();
        assert!(scraper.rows().is_empty());
        assert_eq!(scraper.summary(), "");
        assert_eq!(scraper.state(), ScraperState::RecordResolved);
    }
}
