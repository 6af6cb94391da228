//! Integration tests for the catalog
//!
//! These tests use wiremock to stand in for the vendor site and drive the
//! plain HTTP session end-to-end, with a real SQLite file underneath.

use appliance_catalog::config::Config;
use appliance_catalog::crawl::{
    job_for_name, retry_missed, scrape_batch, BatchContext, PartImport,
};
use appliance_catalog::scrapers::{
    check_compatibility, Handle, ModelScraper, PartScraper, PartTarget, ScrapeError,
};
use appliance_catalog::session::{HttpLauncher, ScriptedSite, Session, SessionSettings};
use appliance_catalog::storage::{PartRecord, ReviewRecord, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointed at the mock server
fn create_test_config(base_url: &str, db_path: &Path) -> Config {
    let mut config = Config::default();
    config.site.base_url = format!("{}/", base_url);
    config.site.search_url = format!("{}/api/search/?searchterm={{}}", base_url);
    config.site.model_url = format!("{}/Models/{{}}/", base_url);
    config.site.parts_url = format!("{}/Models/{{}}/Parts/", base_url);
    config.site.compatibility_url = format!("{}/api/Part/PartCompatibilityCheck", base_url);
    config.store.database_path = db_path.display().to_string();
    config.session.wait_timeout_ms = 20;
    config.session.poll_interval_ms = 5;
    config.session.click_settle_ms = 1;
    config.crawl.max_retries = 0;
    config.crawl.request_delay_ms = 0;
    config.crawl.include_collections = false;
    config
}

async fn http_session(config: &Config) -> Session {
    let launcher = Arc::new(HttpLauncher::from_config(config).expect("Failed to build launcher"));
    Session::launch(launcher, SessionSettings::from_config(config))
        .await
        .expect("Failed to launch session")
}

fn part_page(mpn: &str, price: &str) -> String {
    format!(
        r#"<html><body>
<h1 class="title-lg mt-1 mb-3">Door Gasket {mpn}</h1>
<span itemprop="productID">PS{mpn}</span>
<span itemprop="mpn">{mpn}</span>
<span class="js-partPrice">{price}</span>
</body></html>"#
    )
}

fn listing_page(ids: &[u32]) -> String {
    let blocks: String = ids
        .iter()
        .map(|n| {
            format!(
                r#"<div class="mega-m__part">
  <a href="/PS{n}.htm" class="mega-m__part__name">Part {n}</a>
  <div><span>PartSelect #:</span> PS{n}</div>
  <div><span>Manufacturer #:</span> W{n}</div>
</div>"#
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", blocks)
}

#[test]
fn test_upsert_is_idempotent_and_never_clobbers() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("catalog.sqlite");

    {
        let mut store = SqliteStore::open(&db).unwrap();
        let mut stored = PartRecord::new("W10321304");
        stored.price = Some(19.99);
        store.save(&stored).unwrap();
        store.save(&stored).unwrap();
        assert_eq!(store.count::<PartRecord>().unwrap(), 1);

        let mut incoming = PartRecord::new("W10321304");
        incoming.name = Some("Widget".to_string());
        store.save(&incoming).unwrap();
    }

    // Reopen to read what actually reached the file
    let store = SqliteStore::open(&db).unwrap();
    let merged = store.get::<PartRecord>("W10321304").unwrap().unwrap();
    assert_eq!(merged.price, Some(19.99));
    assert_eq!(merged.name.as_deref(), Some("Widget"));
    assert_eq!(store.count::<PartRecord>().unwrap(), 1);
}

#[test]
fn test_review_dedup_is_deterministic() {
    let make = || {
        ReviewRecord::new(
            "W10321304",
            Some("Great fit".to_string()),
            Some("Installed in ten minutes".to_string()),
        )
    };
    let (a, b) = (make(), make());
    assert_eq!(a.review_id, b.review_id);

    let mut store = SqliteStore::open_in_memory().unwrap();
    store.save_batch(&[a, b]).unwrap();
    assert_eq!(store.count::<ReviewRecord>().unwrap(), 1);
}

#[tokio::test]
async fn test_model_listing_stops_after_empty_page() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(create_test_config(
        &mock_server.uri(),
        &dir.path().join("catalog.sqlite"),
    ));

    // Specific pages first; the bare listing matches anything left
    for (start, ids) in [("2", vec![3, 4]), ("3", vec![4, 5]), ("4", vec![])] {
        Mock::given(method("GET"))
            .and(path("/Models/M1/Parts/"))
            .and(query_param("start", start))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&ids)))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/Models/M1/Parts/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[1, 2])))
        .mount(&mock_server)
        .await;

    let mut session = http_session(&config).await;
    let mut store = SqliteStore::open(Path::new(&config.store.database_path)).unwrap();
    let mut scraper = ModelScraper::open(
        Handle::from(&mut session),
        Handle::from(&mut store),
        "M1",
        Arc::clone(&config),
    )
    .await
    .unwrap();

    let parts = scraper.scrape_part_listing().await.unwrap();
    let ids: Vec<_> = parts
        .iter()
        .map(|p| p.catalog_id.clone().unwrap_or_default())
        .collect();
    assert_eq!(ids, vec!["PS1", "PS2", "PS3", "PS4", "PS5"]);

    let listing_fetches = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/Models/M1/Parts/")
        .count();
    assert_eq!(listing_fetches, 4);
    drop(scraper);
    assert_eq!(store.count::<PartRecord>().unwrap(), 5);
}

#[tokio::test]
async fn test_compatibility_keeps_location() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), &dir.path().join("catalog.sqlite"));

    Mock::given(method("GET"))
        .and(path("/api/Part/PartCompatibilityCheck"))
        .and(query_param("modelnumber", "MODEL1"))
        .and(query_param("inventoryid", "123"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"compatibilityCheckResult":"MODEL_PARTSKU_MATCH"}"#),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/PS123.htm"))
        .respond_with(ResponseTemplate::new(200).set_body_string(part_page("W123", "$5.00")))
        .mount(&mock_server)
        .await;

    let mut session = http_session(&config).await;
    let start = format!("{}/PS123.htm", mock_server.uri());
    session.navigate(&start).await.unwrap();
    let before = session.current_url().await.unwrap();

    let fits = check_compatibility(&mut session, &config.site, "PS123", "MODEL1")
        .await
        .unwrap();
    assert!(fits);
    assert_eq!(session.current_url().await.unwrap(), before);
}

#[tokio::test]
async fn test_compatibility_rejects_unprefixed_part() {
    let site = ScriptedSite::new();
    let mut session = Session::launch(Arc::new(site.launcher()), SessionSettings::default())
        .await
        .unwrap();

    let result = check_compatibility(&mut session, &Config::default().site, "123", "MODEL1").await;
    assert!(matches!(result, Err(ScrapeError::InvalidArgument(_))));
    assert_eq!(site.navigation_count(), 0);
}

#[tokio::test]
async fn test_failed_price_keeps_persisted_name() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(create_test_config(
        &mock_server.uri(),
        &dir.path().join("catalog.sqlite"),
    ));
    Mock::given(method("GET"))
        .and(path("/PS77.htm"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(part_page("W77", "Call for price")),
        )
        .mount(&mock_server)
        .await;

    {
        let mut session = http_session(&config).await;
        let mut store = SqliteStore::open(Path::new(&config.store.database_path)).unwrap();
        let mut scraper = PartScraper::open(
            Handle::from(&mut session),
            Handle::from(&mut store),
            PartTarget::Url(format!("{}/PS77.htm", mock_server.uri())),
            Arc::clone(&config),
        )
        .await
        .unwrap();

        assert_eq!(scraper.name().await.value.as_deref(), Some("Door Gasket W77"));
        let price = scraper.price().await;
        assert!(price.value.is_none());
        assert!(price.error.is_some());
    }

    let store = SqliteStore::open(Path::new(&config.store.database_path)).unwrap();
    let record = store.get::<PartRecord>("W77").unwrap().unwrap();
    assert_eq!(record.name.as_deref(), Some("Door Gasket W77"));
    assert_eq!(record.price, None);
}

#[tokio::test]
async fn test_batch_ledger_and_retry_missed() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(create_test_config(
        &mock_server.uri(),
        &dir.path().join("catalog.sqlite"),
    ));
    Mock::given(method("GET"))
        .and(path("/PS1.htm"))
        .respond_with(ResponseTemplate::new(200).set_body_string(part_page("W1", "$1.00")))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/PS3.htm"))
        .respond_with(ResponseTemplate::new(200).set_body_string(part_page("W3", "$3.00")))
        .mount(&mock_server)
        .await;

    let launcher = Arc::new(HttpLauncher::from_config(&config).unwrap());
    let ctx = BatchContext::new(Arc::clone(&config), launcher);
    let urls: Vec<String> = ["PS1", "PS2", "PS3"]
        .iter()
        .map(|p| format!("{}/{}.htm", mock_server.uri(), p))
        .collect();
    let job = Arc::new(PartImport::from_config(&config));

    let report = scrape_batch(urls.clone(), 2, job, &ctx).await.unwrap();
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed_urls(), vec![urls[1].as_str()]);
    {
        let store = SqliteStore::open(&ctx.database_path).unwrap();
        assert_eq!(store.failed_urls("parts").unwrap(), vec![urls[1].clone()]);
        assert_eq!(store.count::<PartRecord>().unwrap(), 2);
    }

    // The page comes back; the narrower pass picks it up
    Mock::given(method("GET"))
        .and(path("/PS2.htm"))
        .respond_with(ResponseTemplate::new(200).set_body_string(part_page("W2", "$2.00")))
        .mount(&mock_server)
        .await;
    let retried = retry_missed(job_for_name("parts", &config), &ctx)
        .await
        .unwrap();
    assert_eq!(retried.succeeded(), 1);

    let store = SqliteStore::open(&ctx.database_path).unwrap();
    assert_eq!(store.count_failures("parts").unwrap(), 0);
    assert_eq!(store.count::<PartRecord>().unwrap(), 3);
}
