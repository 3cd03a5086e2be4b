//! `blocksync` command-line entry point.
//!
//! # Responsibility
//! - Build an `AppContext` from config and dispatch one subcommand.
//! - Drain background writers before exit.

mod args;

use args::{Cli, Commands};
use blocksync_core::config;
use blocksync_core::model::external_task::{filter_by_status, sort_by_priority};
use blocksync_core::{AppContext, Identity, ImportStatus, RunOutcome, SyncStatus};
use clap::Parser;
use log::error;
use std::process::ExitCode;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = config::load_or_default(cli.config.as_deref());

    if let Err(err) = blocksync_core::logging::init_from_config(&config) {
        eprintln!("warning: logging disabled: {err}");
    }

    let identity = match cli.user {
        Some(user) => Identity::Authenticated(user),
        None => Identity::Anonymous,
    };
    let context = match AppContext::start(config, identity).await {
        Ok(context) => context,
        Err(err) => {
            error!("event=cli_start module=cli status=error error={err}");
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code = run(&context, cli.command).await;
    context.shutdown().await;
    code
}

async fn run(context: &AppContext, command: Commands) -> ExitCode {
    match command {
        Commands::Status => {
            let mut status = context.reconciler().subscribe_status();
            let _ = tokio::time::timeout(
                Duration::from_secs(2),
                status.wait_for(|status| *status != SyncStatus::Syncing),
            )
            .await;
            let store = context.store();
            println!("client_id: {}", context.client_id());
            println!(
                "database: {}{}",
                context.db_path().display(),
                if context.is_durable() { "" } else { " (unavailable, in-memory)" }
            );
            println!("sync: {}", context.reconciler().status());
            println!("tasks: {}", store.tasks().len());
            println!("blocks: {}", store.blocks().len());
            println!("breaks: {}", store.breaks().len());
            match context.persistence().log_len() {
                Ok(len) => println!("log entries: {len}"),
                Err(err) => println!("log entries: unavailable ({err})"),
            }
            println!("shared dir: {}", context.config().shared_dir().display());
            ExitCode::SUCCESS
        }
        Commands::Complete {
            task_id,
            minutes,
            block,
        } => match context.relay().record(task_id, minutes, block).await {
            Ok(RunOutcome::Delivered {
                written,
                already_present,
            }) => {
                println!("recorded: written={written} already_present={already_present}");
                ExitCode::SUCCESS
            }
            Ok(RunOutcome::Failed { error, .. }) => {
                eprintln!("error: completion not written: {error}");
                ExitCode::FAILURE
            }
            Ok(other) => {
                println!("queued: {other:?}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: relay task failed: {err}");
                ExitCode::FAILURE
            }
        },
        Commands::Import { status } => {
            let importer = context.importer();
            let outcome = importer.poll_once().await;
            let tasks = importer.tasks();
            let shown = match status.as_deref() {
                Some(wanted) => sort_by_priority(
                    &filter_by_status(&tasks, wanted)
                        .into_iter()
                        .cloned()
                        .collect::<Vec<_>>(),
                ),
                None => sort_by_priority(&tasks),
            };
            println!("import: {outcome}");
            for task in shown {
                println!("{:>8.2}  [{}] {}  {}", task.priority(), task.status, task.id, task.content);
            }
            if outcome == ImportStatus::Error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Tasks => {
            for task in context.store().tasks() {
                let (done, total) = task.progress();
                println!(
                    "{}  {} {}  ({done}/{total} subtasks, {} blocks)",
                    task.id,
                    if task.completed { "[x]" } else { "[ ]" },
                    task.title,
                    task.blocks_spent
                );
            }
            ExitCode::SUCCESS
        }
        Commands::AddTask { title } => match context.store().create_task(title.join(" ")) {
            Ok(task) => {
                println!("created {}", task.id);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
        Commands::Compact => match context.persistence().compact().await {
            Ok(before) => {
                println!("compacted {before} entries into one snapshot");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
    }
}
