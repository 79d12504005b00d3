//! bobbin: persistent-queue task scheduler
//!
//! Subcommands:
//! - `run`: the scheduler daemon (or a single cycle with `--once`)
//! - `worker`: execute one task; started by the daemon, one process per task
//! - `submit`, `show`, `status`: task administration
//! - `migrate`: create or upgrade the task table

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bobbin_core::app::{LiveConfig, SchedulerBuilder, Shutdown, Worker};
use bobbin_core::domain::{NewTask, TaskId, TaskType};
use bobbin_core::impls::{InProcessLauncher, ProcessLauncher, ShellRunner, start_line};
use bobbin_core::ports::{Launcher, SystemClock, TaskStore};
use bobbin_pg::PgTaskStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod settings;
mod signals;

use settings::{SchedulerOverrides, Settings, SettingsSource};

#[derive(Parser)]
#[command(name = "bobbin")]
#[command(about = "Persistent-queue task scheduler", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "BOBBIN_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "BOBBIN_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Shell used for external-process tasks
    #[arg(long, global = true, env = "BOBBIN_SHELL")]
    shell: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop
    Run {
        #[command(flatten)]
        overrides: SchedulerOverrides,

        /// Run a single cycle, print its report and exit
        #[arg(long)]
        once: bool,

        /// Run workers as tasks inside this process instead of child processes
        #[arg(long)]
        in_process: bool,
    },

    /// Execute one task (used by the scheduler)
    Worker {
        #[arg(value_name = "TASK_ID")]
        task_id: i64,
    },

    /// Enqueue a task
    Submit {
        /// Execution mode
        #[arg(long = "type", value_enum, default_value = "command")]
        task_type: TaskKind,

        /// Higher runs first
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        priority: i32,

        /// RFC 3339 time the task becomes due (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Payload: SQL for `command`, a shell command line for `external-process`
        payload: String,
    },

    /// Print one task as JSON
    Show {
        #[arg(value_name = "TASK_ID")]
        task_id: i64,
    },

    /// Print task counts by status as JSON
    Status,

    /// Apply database migrations
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskKind {
    Command,
    ExternalProcess,
}

impl From<TaskKind> for TaskType {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Command => TaskType::Command,
            TaskKind::ExternalProcess => TaskType::ExternalProcess,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    // stdout carries the worker start line; logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "bobbin=info,bobbin_core=info,bobbin_pg=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let overrides = match &cli.command {
        Commands::Run { overrides, .. } => overrides.clone(),
        _ => SchedulerOverrides::default(),
    };
    let source = SettingsSource {
        file: cli.config.clone(),
        database_url: cli.database_url.clone(),
        shell: cli.shell.clone(),
        overrides,
    };

    match cli.command {
        Commands::Run {
            once, in_process, ..
        } => run(source, once, in_process).await,
        Commands::Worker { task_id } => Ok(worker(source, TaskId::new(task_id)).await),
        Commands::Submit {
            task_type,
            priority,
            at,
            payload,
        } => {
            let store = connect(&source.load()?).await?;
            let task = NewTask {
                command: payload,
                task_type: task_type.into(),
                priority,
                scheduled_time: at,
            };
            let id = store.insert_task(&task).await?;
            println!("{}", serde_json::json!({ "id": id }));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { task_id } => {
            let store = connect(&source.load()?).await?;
            let Some(task) = store.get_task(TaskId::new(task_id)).await? else {
                bail!("task {task_id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let store = connect(&source.load()?).await?;
            let counts = store.counts_by_status().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate => {
            let store = connect(&source.load()?).await?;
            store.migrate().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(settings: &Settings) -> Result<PgTaskStore> {
    let url = settings.require_database_url()?;
    PgTaskStore::connect(url, settings.max_connections)
        .await
        .context("connecting to PostgreSQL")
}

async fn run(source: SettingsSource, once: bool, in_process: bool) -> Result<ExitCode> {
    let settings = source.load()?;
    let store: Arc<dyn TaskStore> = Arc::new(connect(&settings).await?);

    // in-process workers die with the runtime, so `run` waits for them
    let in_process_workers = in_process.then(|| {
        let worker = Worker::new(
            Arc::clone(&store),
            Arc::new(ShellRunner::new(settings.shell.clone())),
            Arc::new(SystemClock),
        );
        Arc::new(InProcessLauncher::new(Arc::new(worker)))
    });
    let launcher: Arc<dyn Launcher> = match &in_process_workers {
        Some(launcher) => Arc::clone(launcher) as Arc<dyn Launcher>,
        None => worker_process_launcher(&source, &settings)?,
    };

    let config = LiveConfig::new(settings.scheduler);
    let shutdown = Shutdown::new();
    let scheduler = SchedulerBuilder::new()
        .store(store)
        .launcher(launcher)
        .config(config.clone())
        .shutdown(shutdown.clone())
        .build()?;

    if once {
        let report = scheduler.run_cycle(&config.snapshot()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let Some(workers) = &in_process_workers {
            workers.drain().await;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let reload = {
        let config = config.clone();
        move || match source.load() {
            Ok(settings) => {
                info!(scheduler = ?settings.scheduler, "settings reloaded");
                config.update(settings.scheduler);
            }
            Err(e) => warn!(error = %format!("{e:#}"), "settings reload failed, keeping current"),
        }
    };
    let signals = signals::spawn(shutdown, scheduler.waker(), reload)?;

    info!(
        instance = %scheduler.instance(),
        in_process,
        "starting scheduler"
    );
    let exit = scheduler.run().await;
    info!(?exit, "scheduler stopped");
    if let Some(workers) = &in_process_workers {
        workers.drain().await;
        info!("in-process workers finished");
    }
    signals.abort();
    Ok(ExitCode::SUCCESS)
}

/// Launch workers as `<this binary> [--config <file>] worker <task-id>`.
fn worker_process_launcher(
    source: &SettingsSource,
    settings: &Settings,
) -> Result<Arc<dyn Launcher>> {
    let exe = std::env::current_exe().context("locating the bobbin executable")?;
    let mut args = Vec::new();
    if let Some(file) = &source.file {
        args.push("--config".to_string());
        args.push(file.display().to_string());
    }
    args.push("worker".to_string());

    let mut launcher = ProcessLauncher::new(exe)
        .args(args)
        .env("BOBBIN_SHELL", settings.shell.clone());
    // the URL may have come from a flag; pass it through the environment,
    // not the command line
    if let Some(url) = &settings.database_url {
        launcher = launcher.env("BOBBIN_DATABASE_URL", url.clone());
    }
    Ok(Arc::new(launcher))
}

/// Worker process entry point. Confirms start first, then executes.
async fn worker(source: SettingsSource, task_id: TaskId) -> ExitCode {
    let mut stdout = std::io::stdout();
    if writeln!(stdout, "{}", start_line(std::process::id()))
        .and_then(|_| stdout.flush())
        .is_err()
    {
        // nobody is listening for the confirmation; the dispatcher gives up
        return ExitCode::FAILURE;
    }

    let settings = match source.load() {
        Ok(settings) => settings,
        Err(e) => {
            error!(%task_id, error = %format!("{e:#}"), "could not load settings");
            return ExitCode::FAILURE;
        }
    };
    let store: Arc<dyn TaskStore> = match connect(&settings).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%task_id, error = %format!("{e:#}"), "could not reach the task store");
            return ExitCode::FAILURE;
        }
    };

    let worker = Worker::new(
        store,
        Arc::new(ShellRunner::new(settings.shell)),
        Arc::new(SystemClock),
    );
    let executor = bobbin_core::domain::ExecutorId::new(i64::from(std::process::id()));
    let exit = worker.run(task_id, executor).await;
    info!(%task_id, ?exit, "worker finished");

    ExitCode::from(u8::try_from(exit.exit_code()).unwrap_or(1))
}
