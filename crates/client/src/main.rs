use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use bookforge_client::ApiClient;
use bookforge_core::{JobKind, TaskId};
use bookforge_infra::monitor::{MonitorOutcome, ProgressMonitor};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Submit generation jobs and follow their progress
#[derive(Parser)]
#[command(name = "bookforge")]
#[command(version)]
struct Cli {
    /// Base URL of the bookforge API
    #[arg(long, env = "BOOKFORGE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Principal sent as X-Forwarded-User
    #[arg(long, env = "BOOKFORGE_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a job: book, large-book or image
    Submit {
        #[arg(value_parser = parse_kind)]
        kind: JobKind,

        #[arg(long)]
        count: Option<i64>,

        /// Large books only
        #[arg(long)]
        word_count: Option<i64>,

        /// Poll until every task is terminal
        #[arg(long)]
        watch: bool,

        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },

    /// Show the status report, or one task
    Status { task_id: Option<TaskId> },
}

fn parse_kind(raw: &str) -> Result<JobKind, String> {
    raw.parse().map_err(|e: bookforge_core::DomainError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    bookforge_observability::tracing::init_with(bookforge_observability::tracing::LogFormat::Text);
    let cli = Cli::parse();

    let mut client = ApiClient::new(cli.api_url);
    if let Some(user) = cli.user {
        client = client.with_user(user);
    }

    match cli.command {
        Commands::Submit {
            kind,
            count,
            word_count,
            watch,
            timeout_secs,
        } => {
            let receipt = client.submit(kind, count, word_count).await?;
            println!("{}", receipt.message);
            for task_id in &receipt.task_ids {
                println!("{task_id}");
            }
            if watch {
                follow(client, &receipt.task_ids, Duration::from_secs(timeout_secs)).await?;
            }
        }
        Commands::Status { task_id: Some(task_id) } => match client.task_status(task_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("no status record for {task_id}"),
        },
        Commands::Status { task_id: None } => {
            let report = client.status_report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn follow(client: ApiClient, task_ids: &[TaskId], timeout: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let monitor = ProgressMonitor::new(Arc::new(client)).with_timeout(timeout);
    let outcome = monitor
        .watch(task_ids, &cancel, |s| {
            println!(
                "progress {:>3}%  completed {}  failed {}  pending {}",
                s.progress, s.completed, s.failed, s.pending
            );
        })
        .await;

    match outcome {
        MonitorOutcome::Finished(s) if s.failed > 0 => bail!("{} of {} tasks failed", s.failed, s.total),
        MonitorOutcome::Finished(_) => Ok(()),
        MonitorOutcome::TimedOut(s) => bail!(
            "timed out after {}s with {} of {} tasks pending",
            timeout.as_secs(),
            s.pending,
            s.total
        ),
        MonitorOutcome::Cancelled(_) => bail!("cancelled"),
    }
}
