use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobhive::api::StatusResponse;
use jobhive::config::EngineConfig;
use jobhive::engine::{Engine, ShutdownReport};
use jobhive::error::EngineError;
use jobhive::handlers::SleepHandler;
use jobhive::scheduler::retention::spawn_reaper;
use jobhive::scheduler::JobStatus;
use jobhive::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobhive")]
#[command(version)]
#[command(about = "Asynchronous job engine with a fixed worker pool")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start an engine, run a batch of sleep jobs, then shut down
    Run(RunArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of workers
    #[arg(long, env = "JOBHIVE_WORKERS", default_value = "4")]
    workers: usize,

    /// Maximum number of queued jobs
    #[arg(long, env = "JOBHIVE_QUEUE_CAPACITY", default_value = "1024")]
    queue_capacity: usize,

    /// Default per-job deadline in milliseconds
    #[arg(long, env = "JOBHIVE_DEFAULT_DEADLINE_MS")]
    default_deadline_ms: Option<u64>,

    /// Shutdown grace period in milliseconds
    #[arg(long, env = "JOBHIVE_GRACE_MS", default_value = "30000")]
    grace_ms: u64,

    /// Evict finished jobs older than this many seconds
    #[arg(long, env = "JOBHIVE_RETENTION_SECS")]
    retention_secs: Option<u64>,

    /// Number of jobs to submit
    #[arg(long, default_value = "16")]
    jobs: usize,

    /// How long each job sleeps, in milliseconds
    #[arg(long, default_value = "500")]
    sleep_ms: u64,

    /// Make every Nth job fail (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: usize,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl RunArgs {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.workers, self.queue_capacity)
            .with_grace_period(Duration::from_millis(self.grace_ms));
        if let Some(ms) = self.default_deadline_ms {
            config = config.with_default_deadline(Duration::from_millis(ms));
        }
        config
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    submitted: usize,
    rejected: usize,
    interrupted: bool,
    report: ShutdownReport,
    jobs: Vec<StatusResponse>,
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Engine::start(args.engine_config(), Arc::new(SleepHandler))?);
    let signal = install_shutdown_handler();

    let reaper = args.retention_secs.map(|secs| {
        let ttl = Duration::from_secs(secs);
        spawn_reaper(engine.registry(), ttl, ttl.max(Duration::from_secs(1)), signal.child_token())
    });

    let mut ids: Vec<Uuid> = Vec::with_capacity(args.jobs);
    let mut rejected = 0usize;
    for n in 0..args.jobs {
        let fail = (args.fail_every > 0 && (n + 1) % args.fail_every == 0)
            .then(|| format!("job #{} failed on purpose", n));
        let payload = json!({ "sleep_ms": args.sleep_ms, "tag": n, "fail": fail });

        loop {
            match engine.submit(payload.clone(), None).await {
                Ok(handle) => {
                    ids.push(handle.id);
                    break;
                }
                Err(e @ EngineError::QueueFull { .. }) => {
                    tracing::warn!(error = %e, "Backing off");
                    tokio::select! {
                        _ = signal.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Job rejected");
                    rejected += 1;
                    break;
                }
            }
        }

        if signal.is_cancelled() {
            break;
        }
    }

    // Wait for the batch or a signal, whichever comes first
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    let interrupted = loop {
        tokio::select! {
            _ = signal.cancelled() => break true,
            _ = poll.tick() => {
                if engine.stats().await.jobs.terminal() >= ids.len() {
                    break false;
                }
            }
        }
    };

    let report = engine.shutdown().await;
    if let Some(reaper) = reaper {
        reaper.abort();
    }

    let mut statuses = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Ok(status) = engine.status(id).await {
            statuses.push(status);
        }
    }

    match args.output {
        OutputFormat::Json => {
            let output = RunOutput {
                submitted: ids.len(),
                rejected,
                interrupted,
                report,
                jobs: statuses.iter().map(StatusResponse::from).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_table(&statuses, &report, interrupted),
    }

    Ok(())
}

fn print_table(statuses: &[JobStatus], report: &ShutdownReport, interrupted: bool) {
    if statuses.is_empty() {
        println!("No jobs submitted.");
    } else {
        println!("{:<38} {:<10} {:<7} DETAIL", "JOB ID", "STATE", "WORKER");
        println!("{}", "-".repeat(78));
        for status in statuses {
            let worker = status
                .worker_id
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string());
            let detail = match (&status.error, status.cancel_reason, &status.result) {
                (Some(error), _, _) => error.to_string(),
                (_, Some(reason), _) => reason.to_string(),
                (_, _, Some(result)) => result.to_string(),
                _ => String::new(),
            };
            println!(
                "{:<38} {:<10} {:<7} {}",
                status.id, status.state, worker, detail
            );
        }
        println!();
    }

    if interrupted {
        println!("Interrupted by signal.");
    }
    println!(
        "Completed: {}  Failed: {}  Cancelled: {}  (forced: {}, aborted workers: {})",
        report.jobs.completed,
        report.jobs.failed,
        report.jobs.cancelled,
        report.forced_cancelled,
        report.aborted_workers
    );
    println!("Shutdown took {} ms", report.elapsed_ms);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args.command {
        Commands::Run(run_args) => run(run_args).await?,
    }

    Ok(())
}
