//! Worker pool for batch scrapes
//!
//! `scrape_batch` fans a list of URLs out over N workers. Each worker owns one
//! session and one store connection, pulls URLs from a shared queue, and
//! retries each item a bounded number of times inside a hard time limit.
//! Items never affect each other: a failure lands in the ledger, a success
//! clears any earlier ledger row, and an item that panics is recorded as failed
//! while its worker carries on with fresh resources.

use crate::config::Config;
use crate::scrapers::{Handle, ModelScraper, PartScraper, PartTarget, ScrapeError};
use crate::session::{Launcher, Session, SessionSettings};
use crate::storage::SqliteStore;
use crate::CatalogError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One kind of unit of work run against a single URL
#[async_trait]
pub trait ItemJob: Send + Sync {
    /// Ledger namespace of this job
    fn name(&self) -> &str;

    async fn run(
        &self,
        session: &mut Session,
        store: &mut SqliteStore,
        url: &str,
        config: &Arc<Config>,
    ) -> Result<(), ScrapeError>;
}

/// Full scrape of one part page
#[derive(Debug, Clone)]
pub struct PartImport {
    pub job_name: String,
    pub include_collections: bool,
}

impl PartImport {
    pub fn from_config(config: &Config) -> Self {
        Self {
            job_name: config.crawl.job_name.clone(),
            include_collections: config.crawl.include_collections,
        }
    }
}

#[async_trait]
impl ItemJob for PartImport {
    fn name(&self) -> &str {
        &self.job_name
    }

    async fn run(
        &self,
        session: &mut Session,
        store: &mut SqliteStore,
        url: &str,
        config: &Arc<Config>,
    ) -> Result<(), ScrapeError> {
        let mut scraper = PartScraper::open(
            Handle::from(session),
            Handle::from(store),
            PartTarget::Url(url.to_string()),
            Arc::clone(config),
        )
        .await?;
        let report = scraper.scrape_all(self.include_collections).await?;
        if !report.missed.is_empty() {
            debug!(
                "{} missing {:?}",
                report.manufacturer_id,
                report.missed.iter().map(|(field, _)| *field).collect::<Vec<_>>()
            );
        }
        scraper.close().await
    }
}

/// Full scrape of one model page, parts listing included
#[derive(Debug, Clone)]
pub struct ModelImport {
    pub job_name: String,
}

impl Default for ModelImport {
    fn default() -> Self {
        Self {
            job_name: MODEL_IMPORT_JOB.to_string(),
        }
    }
}

/// Ledger namespace of bulk model imports
pub const MODEL_IMPORT_JOB: &str = "models";

/// The job that records failures under `name`
///
/// Model imports own [`MODEL_IMPORT_JOB`]; every other namespace holds part
/// pages.
pub fn job_for_name(name: &str, config: &Config) -> Arc<dyn ItemJob> {
    if name == MODEL_IMPORT_JOB {
        return Arc::new(ModelImport::default());
    }
    Arc::new(PartImport {
        job_name: name.to_string(),
        include_collections: config.crawl.include_collections,
    })
}

/// Model number from a `/Models/{id}/...` URL
pub fn model_id_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.find(|s| s.eq_ignore_ascii_case("Models"))?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ItemJob for ModelImport {
    fn name(&self) -> &str {
        &self.job_name
    }

    async fn run(
        &self,
        session: &mut Session,
        store: &mut SqliteStore,
        url: &str,
        config: &Arc<Config>,
    ) -> Result<(), ScrapeError> {
        let model_id = model_id_from_url(url)
            .ok_or_else(|| ScrapeError::InvalidArgument(format!("no model id in {}", url)))?;
        let mut scraper = ModelScraper::open(
            Handle::from(session),
            Handle::from(store),
            &model_id,
            Arc::clone(config),
        )
        .await?;
        let summary = scraper.scrape_all(true).await?;
        if summary.model.name.is_none() {
            return Err(ScrapeError::NotFound(model_id));
        }
        scraper.close().await
    }
}

/// Final outcome of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded { url: String, attempts: u32 },
    Failed { url: String, attempts: u32, error: String },
}

impl ItemOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Succeeded { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// What a batch did, item by item
#[derive(Debug, Default)]
pub struct BatchReport {
    pub job: String,
    pub outcomes: Vec<ItemOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn failed_urls(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(ItemOutcome::url)
            .collect()
    }
}

/// Everything a batch needs besides its URLs
#[derive(Clone)]
pub struct BatchContext {
    pub config: Arc<Config>,
    pub launcher: Arc<dyn Launcher>,
    pub database_path: PathBuf,
}

impl BatchContext {
    pub fn new(config: Arc<Config>, launcher: Arc<dyn Launcher>) -> Self {
        let database_path = PathBuf::from(&config.store.database_path);
        Self {
            config,
            launcher,
            database_path,
        }
    }

    pub(crate) fn settings(&self) -> SessionSettings {
        SessionSettings::from_config(&self.config)
    }
}

type Queue = Arc<Mutex<VecDeque<String>>>;

fn next_url(queue: &Queue) -> Option<String> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// Delay before retry number `attempt` (1-based)
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Pause between two items, with up to 50% jitter on top
fn throttle_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let jitter = fastrand::u64(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter)
}

/// Runs `job` over every URL with `workers` concurrent workers
///
/// # Arguments
///
/// * `urls` - Items to process; duplicates are processed once
/// * `workers` - Number of concurrent workers (at least one)
/// * `job` - What to do with each URL
/// * `ctx` - Configuration, browser launcher and database path
///
/// # Returns
///
/// * `Ok(BatchReport)` - One outcome per distinct URL
/// * `Err(CatalogError)` - The ledger could not be opened
pub async fn scrape_batch(
    urls: Vec<String>,
    workers: usize,
    job: Arc<dyn ItemJob>,
    ctx: &BatchContext,
) -> Result<BatchReport, CatalogError> {
    let start = Instant::now();
    let mut unique = VecDeque::with_capacity(urls.len());
    for url in urls {
        if !unique.contains(&url) {
            unique.push_back(url);
        }
    }
    let total = unique.len();
    let workers = workers.max(1).min(total.max(1));

    // Schema and WAL mode exist before any worker connects
    let mut ledger = SqliteStore::open(&ctx.database_path)?;
    info!(
        "Starting batch '{}': {} items on {} workers",
        job.name(),
        total,
        workers
    );

    let queue: Queue = Arc::new(Mutex::new(unique));
    let finished = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<ItemOutcome>();

    let mut join_set = JoinSet::new();
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let job = Arc::clone(&job);
        let ctx = ctx.clone();
        let tx = tx.clone();
        let finished = Arc::clone(&finished);
        join_set.spawn(async move {
            run_worker(worker, queue, job, ctx, tx, finished, total).await
        });
    }
    drop(tx);

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker stopped early: {}", e),
            Err(e) => error!("Worker task failed: {}", e),
        }
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Ok(outcome) = rx.try_recv() {
        outcomes.push(outcome);
    }

    // Items left behind by workers that could not start
    let stranded: Vec<String> = queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();
    if !stranded.is_empty() {
        warn!("{} items never reached a worker", stranded.len());
        for url in stranded {
            ledger.record_failure(job.name(), &url)?;
            outcomes.push(ItemOutcome::Failed {
                url,
                attempts: 0,
                error: "no worker available".to_string(),
            });
        }
    }

    let report = BatchReport {
        job: job.name().to_string(),
        outcomes,
        elapsed: start.elapsed(),
    };
    info!(
        "Batch '{}' finished: {} succeeded, {} failed in {:.1}s",
        report.job,
        report.succeeded(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

/// Session and store connection owned by one worker
struct WorkerResources {
    session: Session,
    store: SqliteStore,
}

impl WorkerResources {
    async fn open(ctx: &BatchContext) -> Result<Self, CatalogError> {
        let store = SqliteStore::open(&ctx.database_path)?;
        let session = Session::launch(Arc::clone(&ctx.launcher), ctx.settings()).await?;
        Ok(Self { session, store })
    }
}

async fn run_worker(
    worker: usize,
    queue: Queue,
    job: Arc<dyn ItemJob>,
    ctx: BatchContext,
    tx: mpsc::UnboundedSender<ItemOutcome>,
    finished: Arc<AtomicUsize>,
    total: usize,
) -> Result<(), CatalogError> {
    let mut resources = WorkerResources::open(&ctx).await?;
    debug!("Worker {} ready", worker);

    let crawl = &ctx.config.crawl;
    let progress_every = crawl.progress_every.max(1);

    while let Some(url) = next_url(&queue) {
        let (outcome, returned) = run_isolated(&job, resources, &url, &ctx).await;
        resources = match returned {
            Some(resources) => resources,
            None => match WorkerResources::open(&ctx).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    // Leave the item for the stranded pass
                    queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_front(url);
                    return Err(e);
                }
            },
        };

        match &outcome {
            ItemOutcome::Succeeded { .. } => {
                if resources.store.clear_failure(job.name(), &url)? {
                    info!("{} recovered, removed from ledger", url);
                }
            }
            ItemOutcome::Failed { error, attempts, .. } => {
                warn!("Giving up on {} after {} attempts: {}", url, attempts, error);
                resources.store.record_failure(job.name(), &url)?;
            }
        }
        if !deliver(&tx, outcome) {
            break;
        }

        let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
        if done % progress_every == 0 || done == total {
            info!("Progress: {}/{} items", done, total);
        }

        tokio::time::sleep(throttle_delay(crawl.request_delay())).await;
    }

    if let Err(e) = resources.session.close().await {
        debug!("Worker {} session close failed: {}", worker, e);
    }
    debug!("Worker {} done", worker);
    Ok(())
}

/// Runs one item on its own task so a panic costs only that item
///
/// The worker's resources come back with the outcome; after a panic they are
/// gone and the worker must open new ones.
async fn run_isolated(
    job: &Arc<dyn ItemJob>,
    resources: WorkerResources,
    url: &str,
    ctx: &BatchContext,
) -> (ItemOutcome, Option<WorkerResources>) {
    let task = tokio::spawn({
        let job = Arc::clone(job);
        let ctx = ctx.clone();
        let url = url.to_string();
        async move {
            let WorkerResources {
                mut session,
                mut store,
            } = resources;
            let outcome = run_item(job.as_ref(), &mut session, &mut store, &url, &ctx).await;
            (outcome, WorkerResources { session, store })
        }
    });

    match task.await {
        Ok((outcome, resources)) => (outcome, Some(resources)),
        Err(e) => {
            error!("Item {} aborted: {}", url, e);
            let outcome = ItemOutcome::Failed {
                url: url.to_string(),
                attempts: 1,
                error: format!("item task failed: {}", e),
            };
            (outcome, None)
        }
    }
}

/// Sends an outcome to the collector; false once nobody is listening
fn deliver(tx: &mpsc::UnboundedSender<ItemOutcome>, outcome: ItemOutcome) -> bool {
    match tx.send(outcome) {
        Ok(()) => true,
        Err(mpsc::error::SendError(lost)) => {
            warn!("Outcome of {} dropped, collector is gone", lost.url());
            false
        }
    }
}

/// All attempts for one URL, bounded by the item timeout
async fn run_item(
    job: &dyn ItemJob,
    session: &mut Session,
    store: &mut SqliteStore,
    url: &str,
    ctx: &BatchContext,
) -> ItemOutcome {
    let crawl = &ctx.config.crawl;
    let max_attempts = crawl.max_retries + 1;
    let mut attempts = 0;

    let attempt_all = async {
        let mut last_error = String::new();
        while attempts < max_attempts {
            if attempts > 0 {
                tokio::time::sleep(retry_delay(crawl.retry_backoff(), attempts)).await;
            }
            attempts += 1;

            match job.run(session, store, url, &ctx.config).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Attempt {}/{} on {} failed: {}", attempts, max_attempts, url, e);
                    if e.is_session_lost() {
                        match Session::launch(Arc::clone(&ctx.launcher), ctx.settings()).await {
                            Ok(fresh) => {
                                let dead = std::mem::replace(session, fresh);
                                let _ = dead.close().await;
                            }
                            Err(launch) => return Err(launch.to_string()),
                        }
                    }
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    };

    let result = tokio::time::timeout(crawl.item_timeout(), attempt_all).await;
    match result {
        Ok(Ok(())) => ItemOutcome::Succeeded {
            url: url.to_string(),
            attempts,
        },
        Ok(Err(error)) => ItemOutcome::Failed {
            url: url.to_string(),
            attempts,
            error,
        },
        Err(_) => ItemOutcome::Failed {
            url: url.to_string(),
            attempts,
            error: format!("timed out after {}s", crawl.item_timeout_secs),
        },
    }
}
