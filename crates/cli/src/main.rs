// Stampede CLI
//
// Decision: Runs benchmarks against the simulated in-memory execution store so the
// harness can be exercised without a platform deployment.
// Decision: Report queries are served over HTTP while (and after) the run is in flight.

mod server;
mod telemetry;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stampede_bench::{
    BenchConfig, BenchOrchestrator, InMemoryExecutionStore, PrometheusMetricsSource, RunResult,
    RunSpec,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "Stampede - Load generation and measurement for durable-execution platforms")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a benchmark and write its reports
    Run {
        /// Path to the run spec (JSON)
        #[arg(long, short)]
        spec: PathBuf,

        /// Simulated delay between start and execution of each target
        #[arg(long, default_value = "0")]
        execution_delay_ms: u64,

        /// Simulated running time of each target execution
        #[arg(long, default_value = "0")]
        run_duration_ms: u64,

        /// Directory for histogram.json, histogram.csv and histogram.html
        #[arg(long, short)]
        output_dir: Option<PathBuf>,

        /// Correlate with Prometheus metrics (see PROMETHEUS_SERVER_ENDPOINT)
        #[arg(long)]
        metrics: bool,

        /// Serve report queries on this address until interrupted
        #[arg(long, env = "STAMPEDE_SERVE_ADDR")]
        serve: Option<SocketAddr>,
    },

    /// Check a run spec and print how it would be sharded
    Validate {
        /// Path to the run spec (JSON)
        #[arg(long, short)]
        spec: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            spec,
            execution_delay_ms,
            run_duration_ms,
            output_dir,
            metrics,
            serve,
        } => {
            let store = InMemoryExecutionStore::new()
                .with_execution_delay(Duration::from_millis(execution_delay_ms))
                .with_run_duration(Duration::from_millis(run_duration_ms));
            run(
                &spec,
                Arc::new(store),
                output_dir.as_deref(),
                metrics,
                serve,
            )
            .await
        }
        Commands::Validate { spec } => validate(&spec),
    }
}

fn load_spec(path: &Path) -> Result<RunSpec> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run spec {}", path.display()))?;
    RunSpec::from_json(&json).with_context(|| format!("Invalid run spec {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let spec = load_spec(path)?;
    println!(
        "target {}: {} executions in {} step(s)",
        spec.target.name,
        spec.total_count(),
        spec.steps.len()
    );
    for (i, step) in spec.steps.iter().enumerate() {
        let rate = match step.shard_rate() {
            0 => "unlimited".to_string(),
            rate => format!("{rate}/s"),
        };
        println!(
            "  step {i}: count {}, {} shard(s), {rate} per shard",
            step.count,
            step.effective_concurrency()
        );
    }
    Ok(())
}

async fn run(
    spec_path: &Path,
    store: Arc<InMemoryExecutionStore>,
    output_dir: Option<&Path>,
    with_metrics: bool,
    serve: Option<SocketAddr>,
) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let config = BenchConfig::from_env();
    let shutdown = CancellationToken::new();

    let mut orchestrator = BenchOrchestrator::new(config.clone(), store.clone(), store)
        .with_cancellation(shutdown.clone());
    if with_metrics {
        let source = PrometheusMetricsSource::new(&config.metrics)
            .context("Failed to create Prometheus client")?;
        orchestrator = orchestrator.with_metrics_source(Arc::new(source));
    }
    let orchestrator = Arc::new(orchestrator);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            signal.cancel();
        }
    });

    let server = match serve {
        Some(addr) => Some(spawn_server(addr, orchestrator.clone(), shutdown.clone()).await?),
        None => None,
    };

    let result = orchestrator.run(spec).await.context("Benchmark run failed")?;

    if let Some(dir) = output_dir {
        write_reports(dir, &result)?;
        tracing::info!(dir = %dir.display(), "Reports written");
    }
    println!("{}", result.histogram_csv(None));

    if with_metrics {
        match orchestrator.metrics_csv(None).await {
            Ok(csv) => println!("\n{csv}"),
            Err(e) => tracing::warn!(error = %e, "Metrics correlation failed"),
        }
    }

    if let Some(server) = server {
        tracing::info!("Run finished, serving reports until interrupted");
        server.await.context("Report server panicked")??;
    }
    Ok(())
}

async fn spawn_server(
    addr: SocketAddr,
    orchestrator: Arc<BenchOrchestrator>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<Result<()>>> {
    let app = server::routes(server::AppState::new(orchestrator)).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Serving report queries");

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("Report server failed")
    }))
}

fn write_reports(dir: &Path, result: &RunResult) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let reports = [
        ("histogram.json", result.histogram_json()?),
        ("histogram.csv", result.histogram_csv(None)),
        ("histogram.html", result.histogram_html()?),
    ];
    for (name, body) in reports {
        let path = dir.join(name);
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
