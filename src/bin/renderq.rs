//! renderq CLI: run the scheduler, or operate on tasks and workers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use renderq::config::Config;
use renderq::config::secrets::ExposeSecret;
use renderq::db::Db;
use renderq::farm::TaskStatusUpdate;
use renderq::model::{NewTask, Priority, TaskId, TaskStatus, WorkerId, WorkerStatus};
use renderq::store::{MemoryStore, Store};
use renderq::telemetry::{TelemetryConfig, init_telemetry};
use renderq::{Farm, Scheduler};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "renderq", about = "Render farm scheduler")]
struct Cli {
    /// TOML file with a [scheduler] table
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop
    Serve,
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Worker operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a render task
    Submit {
        /// RUSH, HIGH, MEDIUM or LOW
        priority: Priority,
        /// Estimated render time in seconds
        estimated_render_seconds: u64,
        /// Scene file to render
        #[arg(long)]
        file_path: Option<String>,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Show a task
    Show {
        /// Task ID (full UUID or prefix)
        id: String,
    },
    /// Change a task's status
    Status {
        /// Task ID (full UUID or prefix)
        id: String,
        status: TaskStatus,
        /// Worker to render on (required for `rendering`)
        #[arg(long)]
        worker: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },
    /// Mark a task completed and print its output
    Complete {
        /// Task ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// List workers
    List,
    /// Register a new ready worker
    Register,
    /// Claim the next pending task for a worker
    RequestTask {
        /// Worker ID (full UUID or prefix)
        id: String,
    },
    /// Send a heartbeat, optionally changing status
    Status {
        /// Worker ID (full UUID or prefix)
        id: String,
        status: WorkerStatus,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_env_and_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Task { action } => {
            let farm = connect(&config).await?;
            match action {
                TaskAction::Submit {
                    priority,
                    estimated_render_seconds,
                    file_path,
                } => cmd_task_submit(&farm, priority, estimated_render_seconds, file_path).await,
                TaskAction::List { status } => cmd_task_list(&farm, status).await,
                TaskAction::Show { id } => cmd_task_show(&farm, &id).await,
                TaskAction::Status {
                    id,
                    status,
                    worker,
                    error,
                } => cmd_task_status(&farm, &id, status, worker, error).await,
                TaskAction::Complete { id } => cmd_task_complete(&farm, &id).await,
            }
        }
        Command::Worker { action } => {
            let farm = connect(&config).await?;
            match action {
                WorkerAction::List => cmd_worker_list(&farm).await,
                WorkerAction::Register => {
                    let worker = farm.register_worker().await?;
                    println!("Registered: {} (status: {})", worker.id, worker.status);
                    Ok(())
                }
                WorkerAction::RequestTask { id } => {
                    let worker_id = resolve_worker(&farm, &id).await?;
                    let task = farm.request_task(worker_id).await?;
                    println!("{}", serde_json::to_string_pretty(&task)?);
                    Ok(())
                }
                WorkerAction::Status { id, status } => {
                    let worker_id = resolve_worker(&farm, &id).await?;
                    let worker = farm.update_worker_status(worker_id, status).await?;
                    println!("{}: {}", worker.id, worker.status);
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "renderq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = Db::connect(url.expose_secret()).await?;
            db.migrate().await?;
            info!("using postgres store");
            Arc::new(db)
        }
        None => {
            warn!("DATABASE_URL not set, state is in-process and lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let scheduler = Scheduler::new(store, config.scheduler)?;
    let sched = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sched.shutdown();
    });

    scheduler.run().await?;
    Ok(())
}

/// Operator commands share state with a running scheduler, so they need
/// Postgres.
async fn connect(config: &Config) -> anyhow::Result<Farm<Db>> {
    let Some(url) = &config.database_url else {
        anyhow::bail!("DATABASE_URL must be set for task and worker commands");
    };
    let db = Db::connect(url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Farm::new(Arc::new(db), config.scheduler.clone()))
}

async fn cmd_task_submit(
    farm: &Farm<Db>,
    priority: Priority,
    estimated_render_seconds: u64,
    file_path: Option<String>,
) -> anyhow::Result<()> {
    let mut new = NewTask::new(priority, estimated_render_seconds);
    if let Some(path) = file_path {
        new = new.file_path(path);
    }
    let task = farm.create_task(new).await?;
    println!("Created: {} ({}, status: {})", task.id, task.priority, task.status);
    Ok(())
}

async fn cmd_task_list(farm: &Farm<Db>, status: Option<TaskStatus>) -> anyhow::Result<()> {
    let tasks: Vec<_> = farm
        .list_tasks()
        .await?
        .into_iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .collect();

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<6}  {:<9}  {:>8}  {:<5}  {:<8}  CREATED",
        "ID", "PRI", "STATUS", "EST_SECS", "TRIES", "WORKER"
    );
    println!("{}", "-".repeat(80));
    for task in &tasks {
        let worker = task
            .assigned_worker_id
            .map(|w| w.to_string()[..8].to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<6}  {:<9}  {:>8}  {:<5}  {:<8}  {}",
            &task.id.to_string()[..8],
            task.priority,
            task.status,
            task.estimated_render_seconds,
            task.retry_count,
            worker,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_task_show(farm: &Farm<Db>, id: &str) -> anyhow::Result<()> {
    let task = farm.get_task(resolve_task(farm, id).await?).await?;
    let dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    println!("ID:          {}", task.id);
    println!("Priority:    {} (rank {})", task.priority, task.priority_rank);
    println!("Status:      {}", task.status);
    println!("Estimate:    {}s", task.estimated_render_seconds);
    println!("File:        {}", dash(task.file_path.clone()));
    println!("Retries:     {}", task.retry_count);
    println!("Worker:      {}", dash(task.assigned_worker_id.map(|w| w.to_string())));
    println!("Last Worker: {}", dash(task.last_worker_id.map(|w| w.to_string())));
    println!("Error:       {}", dash(task.error_message.clone()));
    println!("Created:     {}", task.created_at);
    println!("Started:     {}", dash(task.started_at.map(|t| t.to_string())));
    println!("Completed:   {}", dash(task.completed_at.map(|t| t.to_string())));
    Ok(())
}

async fn cmd_task_status(
    farm: &Farm<Db>,
    id: &str,
    status: TaskStatus,
    worker: Option<String>,
    error: Option<String>,
) -> anyhow::Result<()> {
    let mut update = TaskStatusUpdate::to(status);
    if let Some(worker) = worker {
        update = update.worker(resolve_worker(farm, &worker).await?);
    }
    if let Some(message) = error {
        update = update.error(message);
    }
    let task = farm
        .update_task_status(resolve_task(farm, id).await?, update)
        .await?;
    println!("{}: {}", task.id, task.status);
    Ok(())
}

async fn cmd_task_complete(farm: &Farm<Db>, id: &str) -> anyhow::Result<()> {
    let report = farm.complete_task(resolve_task(farm, id).await?).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_worker_list(farm: &Farm<Db>) -> anyhow::Result<()> {
    let workers = farm.list_workers().await?;
    if workers.is_empty() {
        println!("No workers found.");
        return Ok(());
    }

    println!("{:<8}  {:<8}  {:<8}  LAST HEARTBEAT", "ID", "STATUS", "TASK");
    println!("{}", "-".repeat(60));
    for worker in &workers {
        let task = worker
            .current_task_id
            .map(|t| t.to_string()[..8].to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<8}  {:<8}  {}",
            &worker.id.to_string()[..8],
            worker.status,
            task,
            worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} worker(s)", workers.len());
    Ok(())
}

/// Accept a full UUID or a unique prefix of one.
fn match_prefix<T: Copy>(
    kind: &str,
    input: &str,
    ids: impl Iterator<Item = (T, String)>,
) -> anyhow::Result<T> {
    let matches: Vec<T> = ids
        .filter(|(_, s)| s.starts_with(input))
        .map(|(id, _)| id)
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no {kind} matching '{input}'"),
        [id] => Ok(*id),
        _ => anyhow::bail!("{} {kind}s match '{input}', be more specific", matches.len()),
    }
}

async fn resolve_task(farm: &Farm<Db>, input: &str) -> anyhow::Result<TaskId> {
    if let Ok(uuid) = uuid::Uuid::parse_str(input) {
        return Ok(TaskId(uuid));
    }
    let tasks = farm.list_tasks().await?;
    match_prefix("task", input, tasks.iter().map(|t| (t.id, t.id.to_string())))
}

async fn resolve_worker(farm: &Farm<Db>, input: &str) -> anyhow::Result<WorkerId> {
    if let Ok(uuid) = uuid::Uuid::parse_str(input) {
        return Ok(WorkerId(uuid));
    }
    let workers = farm.list_workers().await?;
    match_prefix("worker", input, workers.iter().map(|w| (w.id, w.id.to_string())))
}
