//! Crawler entry point.
//!
//! `run` crawls once and prints the run summary as JSON; `schedule` keeps a
//! daily cron trigger alive until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use job_crawler::config::{parse_keywords, StorageBackend};
use job_crawler::scheduler::{self, CommandHook, PostRunHook};
use job_crawler::{open_store, CrawlerConfig, HttpPageSource, Orchestrator, RunStatus};
use listing_client::ListingClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "job-crawler")]
#[command(about = "Collect job listings and merge them into storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl once and print the run summary
    Run(RunArgs),

    /// Crawl daily at the configured time until interrupted
    Schedule(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Keywords, comma or `|` separated (overrides CRAWLER_KEYWORDS)
    #[arg(long)]
    keywords: Option<String>,

    /// Keyword workers (overrides CRAWLER_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Pages per keyword, 0 = until exhausted (overrides CRAWLER_MAX_PAGES)
    #[arg(long)]
    max_pages: Option<u32>,

    /// Storage backend (overrides CRAWLER_STORAGE)
    #[arg(long, value_enum)]
    storage: Option<StorageKind>,

    /// Output directory for the file backend
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StorageKind {
    Postgres,
    File,
}

impl StorageKind {
    fn as_str(self) -> &'static str {
        match self {
            StorageKind::Postgres => "postgres",
            StorageKind::File => "file",
        }
    }
}

impl RunArgs {
    fn load(self) -> Result<CrawlerConfig> {
        let config = CrawlerConfig::from_env_with_storage(self.storage.map(StorageKind::as_str))
            .context("Failed to load configuration")?;
        self.apply(config)
    }

    fn apply(self, mut config: CrawlerConfig) -> Result<CrawlerConfig> {
        if let Some(dir) = self.output_dir {
            match &mut config.storage {
                StorageBackend::File { output_dir } => *output_dir = dir,
                StorageBackend::Postgres { .. } => {
                    tracing::warn!(output_dir = %dir.display(), "--output-dir ignored for the postgres backend")
                }
            }
        }
        if let Some(keywords) = self.keywords {
            config.keywords = parse_keywords(&keywords);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_crawler=debug,listing_client=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (args, scheduled) = match cli.command {
        Commands::Run(args) => (args, false),
        Commands::Schedule(args) => (args, true),
    };

    let config = args.load()?;
    tracing::info!(
        keywords = ?config.keywords,
        concurrency = config.concurrency,
        max_pages = config.max_pages,
        "Configuration loaded"
    );

    let store = open_store(&config.storage)
        .await
        .context("Failed to open storage")?;

    let client = ListingClient::with_timeout(config.fetch.request_timeout)
        .context("Failed to build HTTP client")?
        .with_base_url(config.fetch.api_url.clone());
    let orchestrator = Arc::new(Orchestrator::from_config(
        HttpPageSource::new(client),
        store,
        &config,
    ));

    let hook: Option<Arc<dyn PostRunHook>> = config
        .post_run_command
        .clone()
        .map(|cmd| Arc::new(CommandHook::new(cmd)) as Arc<dyn PostRunHook>);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    if scheduled {
        let mut scheduler = scheduler::start_daily(orchestrator, config, hook, shutdown.clone())
            .await
            .context("Failed to start scheduler")?;
        shutdown.cancelled().await;
        scheduler.shutdown().await.context("Failed to stop scheduler")?;
        tracing::info!("Scheduler stopped");
        return Ok(());
    }

    let summary = scheduler::run_once(&orchestrator, &config, hook.as_deref(), shutdown).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.status == RunStatus::Failed {
        anyhow::bail!("run {} failed", summary.run_id);
    }
    Ok(())
}
