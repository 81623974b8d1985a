use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedhound::config::{AppConfig, SourcesFile};
use feedhound::crawler::{
    AdmitHandler, BrowserlessEngine, FetchScheduler, Fetcher, HttpTransport, RenderEngine,
    RequestLimiter, ResultHandler,
};
use feedhound::dedup::fingerprint::Fingerprint;
use feedhound::dedup::Deduplicator;
use feedhound::models::{FetchResult, Source};
use feedhound::parser::ArticleExtractor;
use feedhound::storage::{ArticleStore, MemoryStore, SourceStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "feedhound",
    version,
    about = "Tiered article ingestion with rate-limited fetching and near-duplicate detection",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources once and admit their articles
    Fetch {
        /// Sources file
        #[arg(short, long, default_value = "sources.toml")]
        sources: PathBuf,

        /// Only fetch this source
        #[arg(long)]
        source: Option<String>,

        /// Admit into the SQLite database instead of a throwaway memory store
        #[arg(long, default_value = "false")]
        store: bool,

        /// Print results as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run the scheduler until interrupted
    Run {
        /// Sources file synchronized into the database at startup
        #[arg(short, long, default_value = "sources.toml")]
        sources: PathBuf,

        /// Run a single cycle and exit
        #[arg(long, default_value = "false")]
        once: bool,

        /// Fetch every active source regardless of its check frequency
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Print the fingerprints of a text file
    Fingerprint {
        /// File holding the article body
        file: PathBuf,

        /// Article title
        #[arg(short, long, default_value = "")]
        title: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Fetch {
            sources,
            source,
            store,
            json,
        } => {
            tracing::info!(sources = %sources.display(), source = ?source, store, "Starting fetch command");
            fetch(&config, &sources, source.as_deref(), store, json).await?;
        }

        Commands::Run {
            sources,
            once,
            force,
        } => {
            tracing::info!(sources = %sources.display(), once, force, "Starting run command");
            run(&config, &sources, once, force).await?;
        }

        Commands::Fingerprint { file, title } => {
            fingerprint(&file, &title)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("feedhound=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("feedhound={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Standard tier chain from configuration
fn build_fetcher(config: &AppConfig) -> Result<Fetcher> {
    let limiter = Arc::new(
        RequestLimiter::new(config.rate_limit.clone()).context("Invalid rate limit settings")?,
    );
    let transport = Arc::new(
        HttpTransport::new(config.transport.clone(), limiter)
            .context("Failed to create HTTP transport")?,
    );

    let engine = BrowserlessEngine::from_config(&config.render)
        .context("Invalid render endpoint")?
        .map(|engine| Arc::new(engine) as Arc<dyn RenderEngine>);
    if engine.is_none() {
        tracing::info!("No render endpoint configured, rendered tier disabled");
    }

    Ok(Fetcher::standard(
        transport,
        ArticleExtractor::default(),
        engine,
        config.tier_options(),
        config.fetcher.clone(),
    ))
}

async fn fetch(
    config: &AppConfig,
    sources_path: &Path,
    only: Option<&str>,
    use_sqlite: bool,
    json: bool,
) -> Result<()> {
    let file = SourcesFile::from_file(sources_path)?;
    let sources: Vec<Source> = match only {
        Some(id) => vec![file
            .find(id)
            .cloned()
            .with_context(|| format!("Unknown source: {id}"))?],
        None => file.sources.into_iter().filter(|s| s.active).collect(),
    };

    let articles: Arc<dyn ArticleStore> = if use_sqlite {
        Arc::new(SqliteStore::open(&config.storage.sqlite_path)?)
    } else {
        Arc::new(MemoryStore::new())
    };
    let handler = AdmitHandler::new(Arc::new(Deduplicator::new(articles, config.dedup.clone())));

    let fetcher = Arc::new(build_fetcher(config)?);
    let results = fetcher.fetch_sources(sources).await;

    for result in &results {
        let admitted = handler.admit_all(result).await;
        if json {
            println!("{}", serde_json::to_string(result)?);
        } else {
            print_result(result, admitted.admitted, admitted.duplicates);
        }
    }

    let snapshot = fetcher.metrics().snapshot();
    if !json {
        println!(
            "\n{} sources, {} succeeded, {} articles, avg {:.0} ms",
            snapshot.sources_fetched,
            snapshot.sources_succeeded,
            snapshot.articles_collected,
            snapshot.average_latency_ms
        );
    }
    Ok(())
}

fn print_result(result: &FetchResult, admitted: usize, duplicates: usize) {
    let status = if result.success { "ok" } else { "FAILED" };
    println!(
        "{:<24} {:<6} {:<10} {:>4} candidates {:>4} new {:>4} duplicate  {} ms",
        result.source_id,
        status,
        result.method,
        result.article_count(),
        admitted,
        duplicates,
        result.elapsed.as_millis()
    );
    if let Some(error) = &result.error {
        println!("    {error}");
    }
}

async fn run(config: &AppConfig, sources_path: &Path, once: bool, force: bool) -> Result<()> {
    if let Err(e) = feedhound::metrics::init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let store = Arc::new(SqliteStore::open(&config.storage.sqlite_path)?);
    let file = SourcesFile::from_file(sources_path)?;
    for source in &file.sources {
        store.upsert_source(source)?;
    }
    tracing::info!(count = file.sources.len(), "Sources synchronized");

    let dedup = Arc::new(Deduplicator::new(store.clone(), config.dedup.clone()));
    let handler: Arc<dyn ResultHandler> = Arc::new(AdmitHandler::new(dedup));
    let fetcher = Arc::new(build_fetcher(config)?);
    let scheduler = Arc::new(FetchScheduler::new(
        fetcher,
        store.clone() as Arc<dyn SourceStore>,
        config.scheduler.clone(),
    ));

    if once {
        let summary = scheduler.run_cycle(handler.as_ref(), force).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start(handler).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    scheduler.stop();
    runner.await.context("Scheduler task failed")?;

    if feedhound::metrics::metrics_initialized() {
        match feedhound::metrics::encode_metrics() {
            Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
            Err(e) => tracing::warn!(error = %e, "Could not encode metrics"),
        }
    }
    Ok(())
}

fn fingerprint(file: &Path, title: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let fp = Fingerprint::compute(title, &content);
    println!("content_hash  {}", fp.content_hash);
    println!("simhash       {:016x}", fp.simhash);
    println!("bucket        {}", fp.bucket);
    Ok(())
}
