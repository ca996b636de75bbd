//! docq CLI — validate and run document generation jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docq::config::Config;
use docq::engine::Orchestrator;
use docq::event::EventKind;
use docq::llm::{AnthropicComplianceAnalyst, AnthropicNarrator, anthropic_client};
use docq::model::{DocumentRequest, Job, Priority};
use docq::render::LocalRenderer;
use docq::service::Services;
use docq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "docq", about = "Document generation job orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a request file and print its estimate
    Validate {
        /// JSON document request
        request: PathBuf,
    },
    /// Run a request through the orchestrator and wait for it to finish
    Submit {
        /// JSON document request
        request: PathBuf,
        /// Override the request's priority (low, normal, high, urgent)
        #[arg(long)]
        priority: Option<Priority>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { request } => cmd_validate(&request),
        Command::Submit { request, priority } => cmd_submit(&request, priority).await,
    }
}

fn read_request(path: &Path) -> anyhow::Result<DocumentRequest> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let request = read_request(path)?;
    if let Err(e) = request.validate() {
        for issue in &e.issues {
            println!("  {:<32} {}", issue.field, issue.message);
        }
        anyhow::bail!("{} problem(s) in {}", e.issues.len(), path.display());
    }

    let job = Job::new(request, chrono::Utc::now());
    println!("Steps:      {}", job.progress.total_steps);
    for step in job.planned_steps() {
        println!("  - {step} (~{}s)", step.estimate().as_secs());
    }
    println!("Estimate:   {}s", job.estimated_duration().as_secs());
    println!("Timeout:    {}s", job.timeout().as_secs());
    Ok(())
}

async fn cmd_submit(path: &Path, priority: Option<Priority>) -> anyhow::Result<()> {
    let mut request = read_request(path)?;
    if let Some(p) = priority {
        request.priority = p;
    }

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "docq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let client = anthropic_client(&config.anthropic_api_key)?;
    let renderer = LocalRenderer::new(&config.output_dir);
    let services = Services::new(
        Arc::new(AnthropicNarrator::new(client.clone(), &config.anthropic_model)),
        Arc::new(AnthropicComplianceAnalyst::new(client, &config.anthropic_model)),
        Arc::new(renderer),
    );
    let orchestrator = Orchestrator::new(services, config.orchestrator()?);

    let maintenance = orchestrator.clone();
    tokio::spawn(async move { maintenance.run_maintenance().await });

    let mut events = orchestrator.subscribe();
    let mut submission = orchestrator.submit(request)?;
    let job_id = submission.job_id.clone();
    println!(
        "Queued: {job_id} (estimated {}s)",
        submission.estimated_duration.as_secs()
    );

    let printer = tokio::spawn({
        let job_id = job_id.clone();
        async move {
            while let Ok(event) = events.recv().await {
                if event.job_id() != &job_id {
                    continue;
                }
                match &event.kind {
                    EventKind::Progress {
                        percentage,
                        message,
                        ..
                    } => println!("[{percentage:>3}%] {message}"),
                    EventKind::Retried {
                        retry_count,
                        delay_ms,
                        ..
                    } => println!("retry #{retry_count} in {delay_ms}ms"),
                    other => println!("{}", serde_json::to_string(other).unwrap_or_default()),
                }
            }
        }
    });

    let job = {
        let finished = submission
            .updates
            .wait_for(|job| job.status.is_terminal())
            .await?;
        finished.clone()
    };
    printer.abort();
    orchestrator.shutdown();

    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.result.is_none() {
        anyhow::bail!("job {job_id} ended {}", job.status);
    }
    Ok(())
}
