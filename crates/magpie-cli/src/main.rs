mod alerting;
mod config;
mod pages;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use magpie_client::alert::WebhookAlerter;
use magpie_core::adapter::Configurable;
use magpie_core::aggregator::{JsonAggregator, MERGED_SEGMENT_BYTES};
use magpie_core::checkpoint::CheckpointStore;
use magpie_core::engine::{Engine, EngineConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::alerting::AlertingReporter;
use crate::config::CrawlConfig;
use crate::pages::PageAdapter;

#[derive(Parser, Debug)]
#[command(name = "magpie", about = "Resumable crawl orchestrator", version)]
struct Cli {
    /// Path to the crawl configuration (YAML).
    #[arg(long, short)]
    config: PathBuf,

    /// Task name, used in log and alert headings.
    #[arg(long, default_value = "pages")]
    task: String,

    /// Delete this crawl's existing output segments before starting.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("magpie=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CrawlConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    let heading = format!("[{host}:{}]", cli.task);

    let alerter = match &config.webhook_url {
        Some(url) => Some(WebhookAlerter::new(url.clone())?),
        None => None,
    };

    if let Some(alerter) = &alerter {
        alerter.notify(&format!("{heading} Crawl starting")).await;
    }

    match run_crawl(&cli, &config, &heading, alerter.clone()).await {
        Ok(()) => {
            if let Some(alerter) = &alerter {
                alerter.notify(&format!("{heading} Crawl finished")).await;
            }
            Ok(())
        }
        Err(e) => {
            if let Some(alerter) = &alerter {
                alerter
                    .notify(&format!("{heading} Crawl failed: {e:#}"))
                    .await;
            }
            Err(e)
        }
    }
}

async fn run_crawl(
    cli: &Cli,
    config: &CrawlConfig,
    heading: &str,
    alerter: Option<WebhookAlerter>,
) -> anyhow::Result<()> {
    let (tasks, identities) = config.load_tasks()?;
    let store = CheckpointStore::new(&config.cache_dir);

    let pending: Vec<_> = tasks
        .into_iter()
        .filter(|t| !store.is_processed(&t.id))
        .collect();
    tracing::info!(
        pending = pending.len(),
        workers = identities.len(),
        "Crawl plan loaded"
    );

    if cli.reset {
        JsonAggregator::reset(&config.save_dir, &config.save_id)?;
    }
    let aggregator = JsonAggregator::new(&config.save_dir, &config.save_id, MERGED_SEGMENT_BYTES)?;

    let mut engine = Engine::new(
        cli.task.clone(),
        PageAdapter::new(store),
        EngineConfig::default(),
    )
    .with_reporter(AlertingReporter::spawn(heading, alerter));

    engine.launch_aggregator(aggregator)?;
    engine.launch_workers(identities);
    engine.enqueue_tasks(pending);
    engine.enqueue_stop_work();

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    engine.run(cancel).await;
    Ok(())
}
