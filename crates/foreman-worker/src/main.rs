//! Foreman worker entry point.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use foreman_core::layout;
use foreman_worker::{LoopOutcome, Toolbox, WorkerConfig, WorkerError, WorkerLoop};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = WorkerConfig::parse();

    if config.check {
        return check(&config).await;
    }

    info!(
        task_id = %config.task_id,
        workspace = %config.workspace.display(),
        model = %config.model,
        "Starting Foreman worker"
    );

    match run(&config).await {
        Ok(LoopOutcome::Completed(marker)) => {
            info!(message = %marker.message, "Worker finished");
            Ok(())
        }
        Ok(LoopOutcome::AlreadyComplete) => {
            info!("Task was already complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Worker failed");
            std::process::exit(1);
        }
    }
}

async fn run(config: &WorkerConfig) -> Result<LoopOutcome, WorkerError> {
    let toolbox = Toolbox::new(&config.workspace, config.task_id.clone())
        .map_err(WorkerError::Workspace)?
        .with_shell_timeout(config.shell_timeout());
    let model = config.model_client()?;
    if config.api_key().is_none() {
        info!(key_env = %config.api_key_env, "No API key set, using the scripted demo model");
    }

    WorkerLoop::new(toolbox, model)
        .with_max_validation_failures(config.max_validation_failures)
        .run()
        .await
}

/// Container health check: the workspace exists, is writable and holds a prompt.
async fn check(config: &WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = &config.workspace;
    let scratch = workspace.join(".foreman-check");
    tokio::fs::write(&scratch, b"ok").await?;
    tokio::fs::remove_file(&scratch).await?;

    let prompt = workspace.join(layout::PROMPT_FILE);
    if !tokio::fs::try_exists(&prompt).await? {
        return Err(format!("missing {}", prompt.display()).into());
    }

    info!(workspace = %workspace.display(), "Worker check passed");
    Ok(())
}
