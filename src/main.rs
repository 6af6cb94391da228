//! Appliance Catalog main entry point
//!
//! This is the command-line interface for the appliance parts catalog scraper.

use appliance_catalog::config::{load_config_with_hash, validate, Config};
use appliance_catalog::crawl::{
    job_for_name, retry_missed, run_crawl, scrape_batch, BatchContext, ModelImport,
};
use appliance_catalog::output::{load_statistics, print_batch_report, print_statistics};
use appliance_catalog::scrapers::{Handle, PartScraper, PartTarget};
use appliance_catalog::session::{launcher_from_config, Session, SessionSettings};
use appliance_catalog::storage::SqliteStore;
use appliance_catalog::tools::Catalog;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Appliance Catalog: a cache-backed parts catalog scraper
///
/// Looks up parts, models and symptom pages on the vendor site, keeps what it
/// reads in a SQLite cache, and crawls whole categories in bulk.
#[derive(Parser, Debug)]
#[command(name = "appliance-catalog")]
#[command(version = "0.1.0")]
#[command(about = "A cache-backed appliance parts catalog scraper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one part, scraping whatever the cache lacks
    Part {
        /// Manufacturer part number
        id: String,

        /// Also collect reviews, stories and Q&A
        #[arg(long)]
        full: bool,
    },

    /// Show one appliance model
    Model { id: String },

    /// Search the parts of a model by title
    Search { model: String, query: String },

    /// Check whether a part fits a model
    Compat { part: String, model: String },

    /// Show the ranked parts of a symptom page
    Symptoms { url: String },

    /// Crawl the configured categories from the sitemap
    Crawl,

    /// Scrape a list of model pages in bulk
    ImportModels {
        /// Model page URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Re-run every URL in the failure ledger
    RetryMissed {
        /// Ledger namespace (defaults to the configured crawl job; "models"
        /// re-runs model imports)
        #[arg(long)]
        job: Option<String>,
    },

    /// Show row counts and ledger size
    Stats {
        /// Ledger namespace (defaults to the configured crawl job)
        #[arg(long)]
        job: Option<String>,
    },

    /// Validate the configuration and show what it would do
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    cfg
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            let cfg = Config::default();
            validate(&cfg)?;
            cfg
        }
    };
    let config = Arc::new(config);

    match cli.command {
        Command::Part { id, full } => handle_part(config, &id, full).await?,
        Command::Model { id } => handle_model(config, &id).await?,
        Command::Search { model, query } => handle_search(config, &model, &query).await?,
        Command::Compat { part, model } => handle_compat(config, &part, &model).await?,
        Command::Symptoms { url } => handle_symptoms(config, &url).await?,
        Command::Crawl => handle_crawl(config).await?,
        Command::ImportModels { urls } => handle_import_models(config, urls).await?,
        Command::RetryMissed { job } => handle_retry_missed(config, job).await?,
        Command::Stats { job } => handle_stats(&config, job)?,
        Command::CheckConfig => handle_check_config(&config),
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("appliance_catalog=info,warn"),
            1 => EnvFilter::new("appliance_catalog=debug,info"),
            2 => EnvFilter::new("appliance_catalog=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Shows one part; `--full` goes through the scraper to include collections
async fn handle_part(
    config: Arc<Config>,
    id: &str,
    full: bool,
) -> anyhow::Result<()> {
    if !full {
        let mut catalog = Catalog::open(config).await?;
        let summary = catalog.lookup_part(id).await?;
        println!("{}", summary);
        catalog.close().await?;
        return Ok(());
    }

    let launcher = launcher_from_config(&config)?;
    let session = Session::launch(launcher, SessionSettings::from_config(&config)).await?;
    let store = SqliteStore::open(Path::new(&config.store.database_path))?;
    let mut scraper = PartScraper::open(
        Handle::Owned(session),
        Handle::Owned(store),
        PartTarget::Id(id.to_string()),
        Arc::clone(&config),
    )
    .await?;
    let report = scraper.scrape_all(true).await?;
    println!("{}", scraper.summary());
    println!();
    println!("reviews: {}", report.reviews);
    println!("stories: {}", report.stories);
    println!("questions: {}", report.questions);
    for (field, reason) in &report.missed {
        println!("missing {}: {}", field, reason);
    }
    scraper.close().await?;
    Ok(())
}

async fn handle_model(config: Arc<Config>, id: &str) -> anyhow::Result<()> {
    let mut catalog = Catalog::open(config).await?;
    let summary = catalog.lookup_model(id).await?;
    println!("{}", summary);
    catalog.close().await?;
    Ok(())
}

async fn handle_search(
    config: Arc<Config>,
    model: &str,
    query: &str,
) -> anyhow::Result<()> {
    let mut catalog = Catalog::open(config).await?;
    let parts = catalog.search_parts_by_name_fragment(model, query).await?;
    if parts.is_empty() {
        println!("No part of {} matches '{}'", model, query);
    }
    for part in &parts {
        println!("{}\n", part);
    }
    catalog.close().await?;
    Ok(())
}

async fn handle_compat(
    config: Arc<Config>,
    part: &str,
    model: &str,
) -> anyhow::Result<()> {
    let mut catalog = Catalog::open(config).await?;
    let fits = catalog.check_compatibility(part, model).await?;
    println!("{}", fits);
    catalog.close().await?;
    Ok(())
}

async fn handle_symptoms(config: Arc<Config>, url: &str) -> anyhow::Result<()> {
    let mut catalog = Catalog::open(config).await?;
    let text = catalog.fetch_symptoms(url).await?;
    print!("{}", text);
    catalog.close().await?;
    Ok(())
}

fn batch_context(config: Arc<Config>) -> anyhow::Result<BatchContext> {
    let launcher = launcher_from_config(&config).context("starting the session driver")?;
    Ok(BatchContext::new(config, launcher))
}

/// Handles the main crawl operation
async fn handle_crawl(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(
        "Crawling categories {:?} from {} with {} workers",
        config.crawl.categories,
        config.crawl.sitemap,
        config.crawl.workers
    );

    let ctx = batch_context(config)?;
    match run_crawl(&ctx).await {
        Ok(report) => {
            tracing::info!("Crawl completed");
            print_batch_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

async fn handle_import_models(
    config: Arc<Config>,
    urls: Vec<String>,
) -> anyhow::Result<()> {
    let workers = config.crawl.workers;
    let ctx = batch_context(config)?;
    let job = Arc::new(ModelImport::default());
    let report = scrape_batch(urls, workers, job, &ctx).await?;
    print_batch_report(&report);
    Ok(())
}

async fn handle_retry_missed(
    config: Arc<Config>,
    job: Option<String>,
) -> anyhow::Result<()> {
    let job = job.unwrap_or_else(|| config.crawl.job_name.clone());
    let job = job_for_name(&job, &config);
    let ctx = batch_context(config)?;
    let report = retry_missed(job, &ctx).await?;
    print_batch_report(&report);
    Ok(())
}

/// Handles the stats command: shows statistics from the database
fn handle_stats(config: &Config, job: Option<String>) -> anyhow::Result<()> {
    println!("Database: {}\n", config.store.database_path);

    let store = SqliteStore::open(Path::new(&config.store.database_path))
        .with_context(|| format!("opening {}", config.store.database_path))?;
    let job = job.unwrap_or_else(|| config.crawl.job_name.clone());
    let stats = load_statistics(&store, &job)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the check-config command: shows the effective settings
fn handle_check_config(config: &Config) {
    println!("=== Appliance Catalog Configuration ===\n");

    println!("Site:");
    println!("  Base URL: {}", config.site.base_url);
    println!("  Part id prefix: {}", config.site.part_id_prefix);

    println!("\nSession:");
    println!("  Driver: {:?}", config.session.driver);
    println!("  Headless: {}", config.session.headless);
    println!("  Wait timeout: {}ms", config.session.wait_timeout_ms);
    println!("  Max pages per listing: {}", config.session.max_pages);
    println!("  User agents: {}", config.identity.user_agents.len());

    println!("\nStore:");
    println!("  Database: {}", config.store.database_path);

    println!("\nCrawl:");
    println!("  Job: {}", config.crawl.job_name);
    println!("  Sitemap: {}", config.crawl.sitemap);
    println!("  Categories: {}", config.crawl.categories.join(", "));
    println!("  Workers: {}", config.crawl.workers);
    println!(
        "  Retries: {} (item timeout {}s)",
        config.crawl.max_retries, config.crawl.item_timeout_secs
    );

    println!("\n✓ Configuration is valid");
}
