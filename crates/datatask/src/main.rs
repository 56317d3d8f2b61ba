//! `datatask` command line: run workers, submit tasks and inspect them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use datatask::config::{load_or_default, Config};
use datatask::db::task_repo::{self, TaskFilter};
use datatask::db::Database;
use datatask::logging::init_logging;
use datatask::queue::SqliteQueue;
use datatask::storage::FsObjectStore;
use datatask::submit::{task_status, TaskSubmitter, TaskView};
use datatask::task::{
    ReportPayload, ReportType, Table, TablePayload, TaskPayload, TaskStatus, TaskType,
    UploadPayload,
};
use datatask::worker::{StopMode, TaskConsumer, TaskExecutor, WorkerPool};
use datatask::{health, DataTaskError};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "datatask")]
#[command(about = "Queue-driven load, backup, restore and report tasks")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume task messages and execute them on the worker pool
    Worker(WorkerArgs),
    /// Create a task and queue it for the workers
    #[command(subcommand)]
    Submit(SubmitCommand),
    /// Show one task
    Status {
        task_id: i64,
    },
    /// List tasks, newest first
    List(ListArgs),
    /// Create or upgrade the database schema
    Migrate,
    /// Check the database and the task topic
    Health,
}

#[derive(Args)]
struct WorkerArgs {
    /// Stop once the topic has no more messages
    #[arg(long)]
    once: bool,

    /// Override the configured number of workers
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum SubmitCommand {
    /// Upload departments, jobs and employees from a JSON file
    Load { file: PathBuf },
    /// Back up a table to the object store
    Backup { table: Table },
    /// Replace a table's rows from its backup
    Restore { table: Table },
    /// Generate a hiring report
    Report { report_type: ReportType },
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    status: Option<TaskStatus>,

    #[arg(long = "type")]
    task_type: Option<TaskType>,

    #[arg(long, default_value_t = 20)]
    limit: u64,

    #[arg(long, default_value_t = 0)]
    offset: u64,
}

#[derive(Serialize)]
struct TaskPage {
    total: u64,
    tasks: Vec<TaskView>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: Config) -> CliResult<ExitCode> {
    match command {
        Commands::Worker(args) => run_worker(config, args),
        Commands::Submit(request) => submit(&config, request),
        Commands::Status { task_id } => {
            let db = open_database(&config)?;
            match task_status(&db, task_id)? {
                Some(view) => {
                    print_json(&view)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("Task {} not found", task_id);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::List(args) => {
            let db = open_database(&config)?;
            let filter = TaskFilter {
                status: args.status,
                task_type: args.task_type,
                limit: Some(args.limit),
                offset: Some(args.offset),
            };
            let (rows, total) = task_repo::list(&db, &filter)?;
            print_json(&TaskPage {
                total,
                tasks: rows.into_iter().map(TaskView::from).collect(),
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate => {
            let path = config.database.resolved_path();
            let db = open_database(&config)?;
            println!(
                "Database at {} is at schema v{}",
                path.display(),
                db.schema_version()?
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let db = open_database(&config)?;
            let queue = open_queue(&config, &db)?;
            let status = health::check(&db, &queue, &config.queue.group_id);
            print_json(&status)?;
            Ok(if status.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn run_worker(mut config: Config, args: WorkerArgs) -> CliResult<ExitCode> {
    if let Some(workers) = args.workers {
        config.worker.worker_count = workers;
    }

    let db = open_database(&config)?;
    let store = FsObjectStore::from_config(&config.storage).map_err(DataTaskError::from)?;
    let queue = open_queue(&config, &db)?;

    let worker_count = config.worker.effective_worker_count();
    let queue_capacity = config.worker.effective_queue_capacity();
    let poll_timeout = config.queue.poll_timeout();
    let group = config.queue.group_id.clone();

    let executor = TaskExecutor::new(db, Arc::new(store), Arc::new(config));
    let pool = WorkerPool::new(&executor, worker_count, queue_capacity)?;
    let consumer = TaskConsumer::new(queue.consumer(&group)?, pool, poll_timeout);

    let shutdown = consumer.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        shutdown.request();
    })?;

    let mode = if args.once {
        StopMode::WhenIdle
    } else {
        StopMode::OnShutdown
    };
    let stats = consumer.run(mode)?;
    print_json(&stats)?;
    Ok(ExitCode::SUCCESS)
}

fn submit(config: &Config, request: SubmitCommand) -> CliResult<ExitCode> {
    let payload = match request {
        SubmitCommand::Load { file } => TaskPayload::Load(read_upload(&file)?),
        SubmitCommand::Backup { table } => TaskPayload::Backup(TablePayload { table_name: table }),
        SubmitCommand::Restore { table } => {
            TaskPayload::Restore(TablePayload { table_name: table })
        }
        SubmitCommand::Report { report_type } => {
            TaskPayload::Report(ReportPayload { report_type })
        }
    };

    let db = open_database(config)?;
    let queue = open_queue(config, &db)?;
    let receipt = TaskSubmitter::new(db, queue).submit(payload)?;
    print_json(&receipt)?;
    Ok(ExitCode::SUCCESS)
}

fn read_upload(path: &Path) -> CliResult<UploadPayload> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

fn open_database(config: &Config) -> Result<Database, DataTaskError> {
    Ok(Database::open_with_timeout(
        &config.database.resolved_path(),
        config.database.busy_timeout(),
    )?)
}

fn open_queue(config: &Config, db: &Database) -> Result<SqliteQueue, DataTaskError> {
    Ok(SqliteQueue::new(
        db.clone(),
        &config.queue.topic,
        config.queue.partitions,
    )?)
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
