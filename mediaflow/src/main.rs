//! # Mediaflow CLI
//!
//! Entry point for workers and the submit ingress.
//!
//! Provides:
//! - Configuration loading and validation
//! - Worker lifecycle with graceful Ctrl-C shutdown
//! - Durable image submission

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use cli::{Cli, Commands, StatusArgs, SubmitArgs, WorkerArgs};
use mediaflow::cancellation::CancellationToken;
use mediaflow::config::{QueueBackend, WorkerConfig};
use mediaflow::events::LoggingEventSink;
use mediaflow::executors::{
    ExecutorRegistry, HttpWatermarkSource, ShipExecutor, TransformExecutor,
};
use mediaflow::ingress;
use mediaflow::observability::init_logging;
use mediaflow::queue::{DurableQueue, FileQueue, InMemoryQueue};
use mediaflow::scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli.logging())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let config = WorkerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let result = match &cli.command {
        Commands::Worker(args) => run_worker(config, args).await,
        Commands::Submit(args) => run_submit(&config, args).await,
        Commands::Status(args) => run_status(&config, args).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

fn open_queue(config: &WorkerConfig) -> Result<Arc<dyn DurableQueue>> {
    Ok(match config.queue.backend {
        QueueBackend::File => Arc::new(FileQueue::open(&config.queue.path).with_context(|| {
            format!("Failed to open queue at {}", config.queue.path.display())
        })?),
        QueueBackend::Memory => Arc::new(InMemoryQueue::new()),
    })
}

fn build_executors(config: &WorkerConfig) -> Result<ExecutorRegistry> {
    let watermark = HttpWatermarkSource::from_config(&config.transform)
        .context("Failed to build watermark client")?;
    let ship_client = reqwest::Client::builder()
        .build()
        .context("Failed to build upload client")?;

    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(TransformExecutor::from_config(
            Arc::new(watermark),
            &config.transform,
        )))
        .with_executor(Arc::new(ShipExecutor::from_config(
            ship_client,
            &config.ship,
            config.worker_name.clone(),
        )));
    registry.ensure_complete()?;
    Ok(registry)
}

async fn run_worker(mut config: WorkerConfig, args: &WorkerArgs) -> Result<()> {
    if let Some(name) = &args.name {
        config = config.with_worker_name(name.clone());
    }
    if config.queue.backend == QueueBackend::Memory && !args.drain {
        warn!("Memory queue selected; jobs will not survive this process");
    }

    let scheduler = Scheduler::new(open_queue(&config)?, build_executors(&config)?)
        .with_policy(config.retry.clone())
        .with_event_sink(Arc::new(LoggingEventSink::debug()))
        .with_config(SchedulerConfig::from(&config.queue));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker = %config.worker_name,
        queue = %config.queue.path.display(),
        endpoint = %config.ship.endpoint,
        "Worker starting"
    );

    if args.drain {
        let dispositions = scheduler.run_until_idle().await?;
        info!(processed = dispositions.len(), "Queue drained");
        return Ok(());
    }

    let shutdown = Arc::new(CancellationToken::new());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested; finishing the in-flight job");
                shutdown.cancel("ctrl-c");
            }
        }
    });

    let stats = scheduler.run(&shutdown).await;
    info!(
        advanced = stats.advanced,
        completed = stats.completed,
        retried = stats.retried,
        failed = stats.failed,
        errors = stats.errors,
        "Worker stopped"
    );
    Ok(())
}

async fn run_submit(config: &WorkerConfig, args: &SubmitArgs) -> Result<()> {
    if config.queue.backend == QueueBackend::Memory {
        bail!("submit needs a persistent queue; set queue.backend to \"file\"");
    }

    let scheduler = Scheduler::new(open_queue(config)?, ExecutorRegistry::new());
    let job_id = ingress::submit(
        &scheduler,
        &args.file,
        &config.upload_dir,
        args.submitter.clone(),
    )
    .await
    .context("Failed to submit upload")?;

    println!("{job_id}");
    Ok(())
}

async fn run_status(config: &WorkerConfig, args: &StatusArgs) -> Result<()> {
    if config.queue.backend == QueueBackend::Memory {
        bail!("status reads the file queue; the memory backend has no shared state");
    }
    let stats = open_queue(config)?
        .stats()
        .await
        .context("Failed to read queue")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Queue:  {}", config.queue.path.display());
        println!("Ready:  {}", stats.ready);
        println!("Leased: {}", stats.leased);
    }
    Ok(())
}
