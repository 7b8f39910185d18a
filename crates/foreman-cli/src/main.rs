//! Foreman CLI - submit and inspect sandboxed tasks.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use foreman_controller::{
    DockerRuntime, ForemanConfig, Orchestrator, OrchestratorError, RegistryError,
    DEFAULT_CONFIG_FILE,
};
use foreman_core::{Task, TaskId};

/// Foreman CLI - run prompts in sandboxed worker containers
#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Run prompts in sandboxed worker containers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "FOREMAN_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the worker image
    #[command(name = "build-image")]
    BuildImage,

    /// Submit a prompt file
    Submit {
        /// Prompt file (markdown, optional YAML front matter)
        prompt: PathBuf,

        /// Queue the task without running it
        #[arg(short, long)]
        detach: bool,
    },

    /// Run queued tasks until the queue is empty
    Run,

    /// List all tasks
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one task
    Status {
        /// Task ID
        id: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show where a task's artifacts were collected
    Results {
        /// Task ID
        id: String,
    },

    /// Terminate a running task
    Terminate {
        /// Task ID
        id: String,
    },

    /// Verify the configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = ForemanConfig::load(&cli.config)?;

    let runtime = Arc::new(DockerRuntime::connect(config.docker_socket.as_deref())?);
    let orchestrator = Orchestrator::open(config, runtime).await?;

    match cli.command {
        Commands::BuildImage => {
            orchestrator.build_image().await?;
            println!("Image built: {}", orchestrator.config().image);
        }
        Commands::Submit { prompt, detach } => {
            submit(&orchestrator, prompt, detach).await?;
        }
        Commands::Run => {
            run(&orchestrator).await?;
        }
        Commands::List { json } => {
            list(&orchestrator, json).await?;
        }
        Commands::Status { id, json } => {
            let task = orchestrator.status(&TaskId::new(id)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task(&task);
            }
        }
        Commands::Results { id } => {
            results(&orchestrator, TaskId::new(id)).await?;
        }
        Commands::Terminate { id } => {
            let id = TaskId::new(id);
            orchestrator.terminate(&id).await?;
            println!("Termination requested for {id}");
        }
        Commands::Check => {
            check(&cli.config, orchestrator.config());
        }
    }

    Ok(())
}

fn check(path: &std::path::Path, config: &ForemanConfig) {
    println!("Configuration OK ({})", path.display());
    println!("  Image:          {}", config.image);
    println!("  State dir:      {}", config.state_dir.display());
    println!("  Max concurrent: {}", config.max_concurrent);
    println!("  Timeout:        {}s", config.timeout_secs);
    println!("  Model:          {}", config.model.name);
}

async fn submit(
    orchestrator: &Orchestrator,
    prompt: PathBuf,
    detach: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = orchestrator.submit(&prompt).await?;

    if detach {
        println!("Task queued: {id}");
        return Ok(());
    }

    match orchestrator.run_until_idle().await {
        Ok(_) => {}
        Err(OrchestratorError::Registry(RegistryError::DispatcherBusy(_))) => {
            println!("Task queued: {id} (another foreman is running tasks)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    let task = orchestrator.status(&id).await?;
    print_task(&task);
    Ok(())
}

async fn run(orchestrator: &Orchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let finished = orchestrator.run_until_idle().await?;
    if finished.is_empty() {
        println!("No pending tasks.");
        return Ok(());
    }

    println!("Finished {} task(s):", finished.len());
    print_table(&finished);
    Ok(())
}

async fn list(orchestrator: &Orchestrator, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let tasks = orchestrator.list().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!("Tasks ({}):", tasks.len());
    print_table(&tasks);
    Ok(())
}

async fn results(orchestrator: &Orchestrator, id: TaskId) -> Result<(), Box<dyn std::error::Error>> {
    let results = orchestrator.results(&id).await?;

    println!("  ID:         {}", results.task.id);
    println!("  State:      {}", results.task.state);
    match &results.dir {
        Some(dir) => println!("  Artifacts:  {}", dir.display()),
        None => println!("  Artifacts:  (not collected yet)"),
    }
    match &results.marker {
        Some(marker) => {
            println!("  Message:    {}", marker.message);
            println!("  Completed:  {}", format_time(&marker.completed_at));
        }
        None => println!("  Message:    (no completion marker)"),
    }
    Ok(())
}

fn print_table(tasks: &[Task]) {
    println!("{:<32}  {:<11}  {:<9}  {}", "ID", "STATE", "EXIT", "SUBMITTED");
    println!("{}", "-".repeat(80));

    for task in tasks {
        let exit = task
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32}  {:<11}  {:<9}  {}",
            task.id,
            task.state,
            exit,
            format_time(&task.submitted_at)
        );
    }
}

fn print_task(task: &Task) {
    println!("  ID:         {}", task.id);
    println!("  State:      {}", task.state);
    println!(
        "  Prompt:     {} (sha256 {})",
        task.prompt.path.display(),
        short_digest(&task.prompt.sha256)
    );
    println!("  Submitted:  {}", format_time(&task.submitted_at));

    if let Some(started) = &task.started_at {
        println!("  Started:    {}", format_time(started));
    }
    if let Some(finished) = &task.finished_at {
        println!("  Finished:   {}", format_time(finished));
    }
    if let Some(cid) = &task.container_id {
        println!("  Container:  {cid}");
    }
    if let Some(code) = task.exit_code {
        println!("  Exit code:  {code}");
    }
    if let Some(cause) = &task.termination {
        println!("  Terminated: {cause}");
    }
    if let Some(err) = &task.error {
        println!("  Error:      {err}");
    }
    if let Some(dir) = &task.result_dir {
        println!("  Results:    {}", dir.display());
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn format_time(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}
