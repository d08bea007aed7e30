use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use scanny_core::outcome::Outcome;
use scanny_engine::progress::LogProgress;
use scanny_engine::{EngineRunner, ScanEngine, ScanRequest};
use scanny_pipeline::{drain, Delivery, JobPipeline, StaticSource};
use scanny_tracker::TrackerApi;
use scanny_worker::telemetry::init_tracing;
use scanny_worker::{QueueConsumer, WorkerConfig};

/// Scan execution worker.
#[derive(Parser, Debug)]
#[command(name = "scanny-worker", version)]
#[command(about = "Runs protein database scans on an external engine")]
struct Cli {
    /// Debug logging (overrides VERBOSE; RUST_LOG overrides both)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan one file against one database and exit with the outcome code
    Scan {
        /// Sequence file, relative to WORK_DIR
        scan_file: String,
        /// Database file, relative to WORK_DIR
        db_file: String,
    },
    /// Consume jobs from the broker until stopped
    Serve,
    /// Run job descriptor files through the full pipeline without a broker
    Process {
        #[arg(required = true)]
        descriptors: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env()?;
    config.verbose |= cli.verbose;
    init_tracing(&config);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match cli.command {
        Command::Scan { scan_file, db_file } => Ok(scan(&config, scan_file, db_file, cancel).await),
        Command::Serve => serve(&config, cancel).await,
        Command::Process { descriptors } => process(&config, descriptors, cancel).await,
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

fn engine(config: &WorkerConfig) -> EngineRunner {
    EngineRunner::new(&config.engine_bin)
        .with_protocol(config.engine_protocol)
        .with_config(config.session_config())
}

fn pipeline(config: &WorkerConfig, cancel: CancellationToken) -> JobPipeline {
    let tracker = TrackerApi::new(config.api_url(), config.api_key.clone());
    tracing::info!(
        api_url = %tracker.api_url(),
        engine = %config.engine_bin.display(),
        work_dir = %config.work_dir.display(),
        "Pipeline ready"
    );
    JobPipeline::new(Arc::new(tracker), Arc::new(engine(config)), &config.work_dir)
        .with_cancellation(cancel)
}

async fn scan(
    config: &WorkerConfig,
    scan_file: String,
    db_file: String,
    cancel: CancellationToken,
) -> ExitCode {
    let request = ScanRequest::new(scan_file, db_file);
    let outcome = match engine(config)
        .scan(&request, Arc::new(LogProgress), cancel)
        .await
    {
        Ok(report) => {
            tracing::info!(
                outcome = %report.outcome,
                state = ?report.final_state,
                exit_code = ?report.exit_code,
                "Scan finished"
            );
            report.outcome
        }
        Err(e) => {
            tracing::error!(error = %e, "Scan failed");
            Outcome::Failed
        }
    };
    println!("{outcome}");
    exit_code(outcome)
}

async fn serve(config: &WorkerConfig, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    let pipeline = pipeline(config, cancel.clone());
    let mut consumer = QueueConsumer::connect(&config.broker_url, &config.queue_name).await?;
    let summary = drain(&mut consumer, &pipeline, &cancel).await?;
    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        "Worker stopped"
    );
    if cancel.is_cancelled() {
        Ok(ExitCode::SUCCESS)
    } else {
        // The broker closed the consumer without being asked to.
        anyhow::bail!("consumer on queue {} closed", consumer.queue())
    }
}

async fn process(
    config: &WorkerConfig,
    descriptors: Vec<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let mut deliveries = Vec::with_capacity(descriptors.len());
    for path in &descriptors {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading job descriptor {}", path.display()))?;
        deliveries.push(Delivery::unacknowledged(body));
    }

    let pipeline = pipeline(config, cancel.clone());
    let mut source = StaticSource::new(deliveries);
    let summary = drain(&mut source, &pipeline, &cancel)
        .await
        .unwrap_or_else(|never| match never {});
    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        "All descriptors processed"
    );
    if summary.failed == 0 && summary.processed == descriptors.len() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn exit_code(outcome: Outcome) -> ExitCode {
    u8::try_from(outcome.code())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}
