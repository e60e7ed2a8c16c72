//! `taskboard`: command-line Kanban board.
//!
//! Talks to a task server when an API URL is configured, otherwise runs
//! against a seeded in-process board. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Offline demo board
//! cargo run --bin taskboard -- list
//!
//! # Against a server
//! cargo run --bin taskboard -- --api-url http://127.0.0.1:8080 \
//!     move --task 3 --to done --index 0
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::board::{BoardError, BoardEvent, BoardManager, Settlement};
use taskboard::config::{CliArgs, ClientConfig, Command};
use taskboard::remote::TaskApi;
use taskboard::remote::http::HttpTaskApi;
use taskboard::remote::loopback::LoopbackTaskApi;
use taskboard_proto::task::{Task, TaskId, TaskStatus, TaskTag};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout carries the board.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(api_url = ?config.api_url, scope = %config.scope(), "taskboard starting");

    let command = cli.command.clone().unwrap_or(Command::List);
    let result = match &config.api_url {
        Some(url) => match HttpTaskApi::new(url.clone(), config.request_timeout) {
            Ok(api) => run(Arc::new(api), &config, command).await,
            Err(e) => Err(e.into()),
        },
        None => {
            println!("(no --api-url given, using the offline demo board)");
            run(Arc::new(LoopbackTaskApi::seeded(demo_tasks())), &config, command).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "taskboard failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run<A: TaskApi>(
    api: Arc<A>,
    config: &ClientConfig,
    command: Command,
) -> Result<(), BoardError> {
    let (board, mut events) = BoardManager::new(api, config.scope(), &config.board)?;
    board.load().await?;

    match command {
        Command::List => {}
        Command::Move { task, to, index } => {
            let outcome = board.move_task(TaskId::new(task), to, index).await?;
            match &outcome.settlement {
                Settlement::NoOp => println!("task {task} is already there"),
                Settlement::Committed => println!(
                    "moved task {task} to {} at position {}",
                    outcome.to,
                    outcome.position.unwrap_or_default()
                ),
                Settlement::RolledBack { .. } | Settlement::Superseded { .. } => {}
            }
        }
        Command::Status { task, to } => {
            let updated = board.set_status(TaskId::new(task), to).await?;
            println!("task {} is now {}", updated.id, updated.status);
        }
        Command::Delete { task } => {
            board.delete(TaskId::new(task)).await?;
            println!("deleted task {task}");
        }
    }

    report_failures(&mut events);
    print_board(&board);
    Ok(())
}

/// Prints move failures as notifications; other events are for renderers.
fn report_failures(events: &mut mpsc::Receiver<BoardEvent>) {
    while let Ok(event) = events.try_recv() {
        if let BoardEvent::MoveFailed { task_id, reason, .. } = event {
            eprintln!("move of task {task_id} failed: {reason}");
        }
    }
}

fn print_board<A: TaskApi>(board: &BoardManager<A>) {
    for status in TaskStatus::ALL {
        let tasks = board.column(status);
        println!("== {status} ({}) ==", tasks.len());
        for task in tasks {
            println!("  [{:>4}] {:>10.3}  {}", task.id.get(), task.position, task.title);
        }
    }
}

fn demo_tasks() -> Vec<Task> {
    let mut tasks = vec![
        Task::new(TaskId::new(1), "Sketch board layout", TaskStatus::Todo, 1000.0),
        Task::new(TaskId::new(2), "Wire drag and drop", TaskStatus::Todo, 2000.0),
        Task::new(TaskId::new(3), "Write release notes", TaskStatus::Todo, 3000.0),
        Task::new(TaskId::new(4), "Fix login redirect", TaskStatus::InProgress, 1000.0),
        Task::new(TaskId::new(5), "Set up CI", TaskStatus::Done, 500.0),
        Task::new(TaskId::new(6), "Pick a name", TaskStatus::Done, 1500.0),
    ];
    tasks[1].tag = Some(TaskTag::Feature);
    tasks[3].tag = Some(TaskTag::Issue);
    tasks
}
