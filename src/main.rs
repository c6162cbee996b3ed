//! Apkharvest main entry point
//!
//! This is the command-line interface for the apkharvest marketplace
//! crawler. One process crawls one marketplace.

use apkharvest::adapter::{build_adapter, PackageFileAdapter, SiteAdapter};
use apkharvest::config::{load_config_with_hash, Config, DatabaseType};
use apkharvest::crawler::{Coordinator, Fetcher, ProxyPool, RateController};
use apkharvest::pipeline::{Context, PipelineRunner};
use apkharvest::store::{Catalogue, ContentStore, PostgresCatalogue, SqliteCatalogue};
use apkharvest::Telemetry;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Apkharvest: a polite, resumable Android application crawler
#[derive(Parser, Debug)]
#[command(name = "apkharvest")]
#[command(version)]
#[command(about = "A polite, resumable APK marketplace crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Marketplace to crawl (defaults to the only configured one)
    #[arg(short, long)]
    market: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default when resumption is configured)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, discarding any previous snapshot
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without fetching
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, config_hash) = load_config_with_hash(&cli.config)?;

    let market = select_market(&config, cli.market.as_deref())?;
    setup_logging(cli.verbose, cli.quiet, &market)?;
    tracing::info!(
        config = %cli.config.display(),
        market,
        config_hash,
        "configuration loaded"
    );

    if cli.dry_run {
        handle_dry_run(&config, &market)?;
        return Ok(());
    }

    handle_crawl(config, market, cli.fresh, cli.resume).await
}

/// Picks the marketplace for this run
fn select_market(
    config: &Config,
    requested: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    match requested {
        Some(name) => {
            if !config.markets.contains_key(name) {
                return Err(format!("market '{}' is not configured", name).into());
            }
            Ok(name.to_string())
        }
        None => {
            let mut names = config.markets.keys();
            match (names.next(), names.next()) {
                (Some(only), None) => Ok(only.clone()),
                _ => Err("multiple markets configured; pick one with --market".into()),
            }
        }
    }
}

/// Sets up logging to stderr and to `logs/<market>.log`
fn setup_logging(
    verbose: u8,
    quiet: bool,
    market: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("apkharvest=info,warn"),
            1 => EnvFilter::new("apkharvest=debug,info"),
            2 => EnvFilter::new("apkharvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    std::fs::create_dir_all("logs")?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("logs/{}.log", market))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

/// Handles the --dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &Config, market: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Apkharvest Dry Run ===\n");

    println!("Market: {}", market);

    println!("\nCrawler Configuration:");
    println!("  Concurrent requests: {}", config.crawler.concurrent_requests);
    println!("  Depth limit: {}", config.crawler.depth_limit);
    println!("  Item budget: {}", config.crawler.item_count);
    println!("  Download timeout: {}s", config.crawler.download_timeout_secs);
    println!("  Retries: {}", config.crawler.retry_times);

    println!("\nRate Limiting:");
    println!("  Default backoff: {}s", config.ratelimit.default_backoff_secs);
    println!("  Codes: {:?}", config.ratelimit.codes);

    println!("\nOutput:");
    println!("  Root directory: {}", config.output.rootdir);
    match config.database.db_type {
        DatabaseType::Sqlite => println!("  Catalogue: sqlite at {}", config.database.path),
        DatabaseType::Postgres => println!("  Catalogue: postgres"),
    }

    println!("\nDownloads:");
    println!("  Binaries: {}", config.downloads.apk);
    println!("  Icons: {}", config.downloads.icon);

    println!("\nProxies ({}):", config.proxies.addresses.len());
    for address in &config.proxies.addresses {
        println!("  - {}", address);
    }
    if config.proxies.allow_direct {
        println!("  - direct");
    }

    if config.resumation.enabled {
        println!("\nResumption: enabled, job directory {}", config.resumation.jobdir);
    } else {
        println!("\nResumption: disabled");
    }

    println!("\nSeed package files ({}):", config.input.package_files.len());
    for file in &config.input.package_files {
        println!("  - {}", file);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    market: String,
    fresh: bool,
    resume: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalogue: Arc<Mutex<dyn Catalogue>> = match config.database.db_type {
        DatabaseType::Sqlite => Arc::new(Mutex::new(SqliteCatalogue::open(&config.database.path)?)),
        DatabaseType::Postgres => Arc::new(Mutex::new(PostgresCatalogue::connect(
            &config.database.connection_string,
        )?)),
    };
    let content = Arc::new(ContentStore::new(&config.output.rootdir)?);
    let telemetry = Arc::new(Telemetry::with_log_reporter());

    let proxies = Arc::new(ProxyPool::new(
        &config.proxies.addresses,
        config.proxies.allow_direct,
    ));
    let rate = Arc::new(RateController::new(config.ratelimit.clone()));
    let fetcher = Arc::new(Fetcher::new(
        &config.crawler,
        &config.proxies,
        proxies,
        rate,
        telemetry.clone(),
        PathBuf::from(&config.output.rootdir).join("tmp"),
    )?);

    let market_table = config
        .markets
        .get(&market)
        .cloned()
        .unwrap_or(toml::Value::Table(Default::default()));
    let mut adapter: Arc<dyn SiteAdapter> = build_adapter(&market, &market_table)?;

    if !config.input.package_files.is_empty() || config.input.retrieve_from_db {
        let mut seeded = PackageFileAdapter::new(
            adapter,
            config.input.package_files.iter().map(PathBuf::from).collect(),
        );
        if config.input.retrieve_from_db {
            seeded = seeded.with_catalogue(catalogue.clone());
        }
        adapter = Arc::new(seeded);
    }

    let mut resumation = config.resumation.clone();
    if resume {
        resumation.enabled = true;
    }
    let scheduler = Coordinator::seeded_scheduler(adapter.as_ref(), &resumation, fresh).await?;

    let pipeline = Arc::new(PipelineRunner::standard(Context {
        fetcher: fetcher.clone(),
        catalogue,
        content,
        telemetry: telemetry.clone(),
        analyzer: None,
        downloads: config.downloads.clone(),
    }));

    let coordinator = Arc::new(Coordinator::new(
        adapter,
        fetcher,
        pipeline,
        scheduler,
        config.crawler.clone(),
        resumation,
    ));

    match coordinator.clone().run().await {
        Ok(()) => {
            let counters = telemetry.market_counters(&market);
            tracing::info!(
                market,
                items = counters.items,
                versions = counters.versions,
                apks = counters.apks,
                apk_bytes = counters.apk_bytes,
                "crawl completed successfully"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
