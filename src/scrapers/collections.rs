//! Paginated part sub-collections: reviews, repair stories, Q&A
//!
//! Each collection lives in its own container on the part page with its own
//! "next" control. The loop parses the visible blocks, drops records already
//! seen in this run, saves the rest as one batch, and moves on until the
//! control is gone, a page brings nothing new, or the page bound is reached.

use crate::config::SelectorConfig;
use crate::scrapers::ScrapeError;
use crate::session::{Element, Session};
use crate::storage::{PartOwned, QnaRecord, ReviewRecord, SqliteStore, StoryRecord};
use std::collections::HashSet;

const MODEL_NUMBER_PREFIX: &str = "For model number ";

/// A record collected from a paginated container
pub trait Collected: PartOwned + Clone + Send {
    /// Short name for logs
    const LABEL: &'static str;

    /// Content-derived id used to skip repeats
    fn dedup_key(&self) -> &str;

    /// Selector of the container holding this collection
    fn container(selectors: &SelectorConfig) -> &str;

    /// Parses the record blocks inside one container snapshot
    fn parse_page(
        container: &Element,
        selectors: &SelectorConfig,
        manufacturer_id: &str,
    ) -> Result<Vec<Self>, ScrapeError>;
}

impl Collected for ReviewRecord {
    const LABEL: &'static str = "reviews";

    fn dedup_key(&self) -> &str {
        &self.review_id
    }

    fn container(selectors: &SelectorConfig) -> &str {
        &selectors.review_container
    }

    fn parse_page(
        container: &Element,
        selectors: &SelectorConfig,
        manufacturer_id: &str,
    ) -> Result<Vec<Self>, ScrapeError> {
        container
            .select(&selectors.review_block)?
            .iter()
            .map(|block| {
                Ok(ReviewRecord::new(
                    manufacturer_id,
                    block.select_text(&selectors.review_header)?,
                    block.select_text(&selectors.review_text)?,
                ))
            })
            .collect()
    }
}

impl Collected for StoryRecord {
    const LABEL: &'static str = "stories";

    fn dedup_key(&self) -> &str {
        &self.story_id
    }

    fn container(selectors: &SelectorConfig) -> &str {
        &selectors.story_container
    }

    fn parse_page(
        container: &Element,
        selectors: &SelectorConfig,
        manufacturer_id: &str,
    ) -> Result<Vec<Self>, ScrapeError> {
        container
            .select(&selectors.story_block)?
            .iter()
            .map(|block| {
                Ok(StoryRecord::new(
                    manufacturer_id,
                    block.select_text(&selectors.story_title)?,
                    block.select_text(&selectors.story_text)?,
                ))
            })
            .collect()
    }
}

impl Collected for QnaRecord {
    const LABEL: &'static str = "questions";

    fn dedup_key(&self) -> &str {
        &self.qna_id
    }

    fn container(selectors: &SelectorConfig) -> &str {
        &selectors.qna_container
    }

    fn parse_page(
        container: &Element,
        selectors: &SelectorConfig,
        manufacturer_id: &str,
    ) -> Result<Vec<Self>, ScrapeError> {
        container
            .select(&selectors.qna_block)?
            .iter()
            .map(|block| {
                let question = block.select_text(&selectors.qna_question)?;
                let model_number = block
                    .following_sibling_text(&selectors.qna_question)?
                    .and_then(|line| {
                        line.split_once(MODEL_NUMBER_PREFIX)
                            .map(|(_, model)| model.trim().to_string())
                    })
                    .filter(|model| !model.is_empty());
                let answer = block.select_text(&selectors.qna_answer)?;
                Ok(QnaRecord::new(manufacturer_id, question, model_number, answer))
            })
            .collect()
    }
}

/// Walks every page of one collection on `url`
///
/// Returns the new records in page order. Records are saved page by page, so
/// an interrupted walk keeps what it already collected.
pub async fn collect_pages<R: Collected>(
    session: &mut Session,
    store: &mut SqliteStore,
    url: &str,
    selectors: &SelectorConfig,
    manufacturer_id: &str,
    max_pages: usize,
) -> Result<Vec<R>, ScrapeError> {
    let container = R::container(selectors);
    let next = selectors.next_in(container);

    let mut seen: HashSet<String> = HashSet::new();
    let mut collected: Vec<R> = Vec::new();
    let mut page = 1;

    session.parse(url).await?;
    loop {
        let Some(snapshot) = session.wait_for_one(container, false).await? else {
            tracing::debug!("No {} container on {}", R::LABEL, url);
            break;
        };

        let fresh: Vec<R> = R::parse_page(&snapshot, selectors, manufacturer_id)?
            .into_iter()
            .filter(|record| seen.insert(record.dedup_key().to_string()))
            .collect();

        if fresh.is_empty() {
            tracing::debug!("Page {} of {} brought nothing new", page, R::LABEL);
            break;
        }

        let saved = store.save_batch(&fresh)?;
        tracing::info!(
            "Saved {} {} from page {} for {}",
            saved,
            R::LABEL,
            page,
            manufacturer_id
        );
        collected.extend(fresh);

        if page >= max_pages {
            tracing::warn!("Stopped {} after {} pages", R::LABEL, page);
            break;
        }
        if !session.click_current_unblocked(&next, None).await? {
            tracing::debug!("No more {} pages", R::LABEL);
            break;
        }
        page += 1;
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ScriptedSite, SessionSettings};
    use std::sync::Arc;
    use std::time::Duration;

    const URL: &str = "https://s.test/PS1.htm";

    fn review_page(reviews: &[(&str, &str)], next: Option<&str>) -> String {
        let blocks: String = reviews
            .iter()
            .map(|(h, t)| {
                format!(
                    "<div class='pd__cust-review__submitted-review'><div class='bold'>{}</div><div class='js-searchKeys'>{}</div></div>",
                    h, t
                )
            })
            .collect();
        let pager = match next {
            Some(href) => format!(
                "<ul class='pagination js-pagination'><li class='next'><a href='{}'>Next</a></li></ul>",
                href
            ),
            None => "<ul class='pagination js-pagination'><li class='next disabled'>Next</li></ul>"
                .to_string(),
        };
        format!(
            "<html><body><div class='js-resultsRenderer' data-event-target='Customer Review'>{}{}</div></body></html>",
            blocks, pager
        )
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            wait_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            ..SessionSettings::default()
        }
    }

    #[tokio::test]
    async fn test_collects_until_next_disabled() {
        let site = ScriptedSite::new();
        site.page(URL, review_page(&[("Great", "Fits"), ("Ok", "Fine")], Some("/PS1.htm?p=2")))
            .page(
                "https://s.test/PS1.htm?p=2",
                review_page(&[("Great", "Fits"), ("Bad", "Broke")], None),
            );

        let mut session = Session::launch(Arc::new(site.launcher()), settings())
            .await
            .unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let reviews: Vec<ReviewRecord> = collect_pages(
            &mut session,
            &mut store,
            URL,
            &SelectorConfig::default(),
            "W1",
            10,
        )
        .await
        .unwrap();

        let headers: Vec<_> = reviews.iter().filter_map(|r| r.header.as_deref()).collect();
        assert_eq!(headers, vec!["Great", "Ok", "Bad"]);
        assert_eq!(store.find_by_owner::<ReviewRecord>("W1").unwrap().len(), 3);
        assert_eq!(site.navigation_count(), 2);
    }

    #[tokio::test]
    async fn test_stops_when_page_repeats() {
        let site = ScriptedSite::new();
        site.page(URL, review_page(&[("Same", "Page")], Some("/PS1.htm")));

        let mut session = Session::launch(Arc::new(site.launcher()), settings())
            .await
            .unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let reviews: Vec<ReviewRecord> = collect_pages(
            &mut session,
            &mut store,
            URL,
            &SelectorConfig::default(),
            "W1",
            10,
        )
        .await
        .unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(site.navigation_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_container_is_empty() {
        let site = ScriptedSite::new();
        site.page(URL, "<html><body></body></html>");

        let mut session = Session::launch(Arc::new(site.launcher()), settings())
            .await
            .unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let stories: Vec<StoryRecord> = collect_pages(
            &mut session,
            &mut store,
            URL,
            &SelectorConfig::default(),
            "W1",
            10,
        )
        .await
        .unwrap();
        assert!(stories.is_empty());
    }

    #[test]
    fn test_parse_qna_block() {
        let container = Element::from_html(
            r#"<div class="js-resultsRenderer" id="QuestionsAndAnswersContent">
                 <div class="js-dataContainer">
                   <div class="qna__question js-qnaResponse">
                     <div class="js-searchKeys">Does it fit?</div>
                     <div>For model number WDT780SAEM1</div>
                     <div class="qna__ps-answer__msg"><div class="js-searchKeys">Yes.</div></div>
                   </div>
                 </div>
               </div>"#,
        );
        let records =
            QnaRecord::parse_page(&container, &SelectorConfig::default(), "W1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question.as_deref(), Some("Does it fit?"));
        assert_eq!(records[0].model_number.as_deref(), Some("WDT780SAEM1"));
        assert_eq!(records[0].answer.as_deref(), Some("Yes."));
    }
}
