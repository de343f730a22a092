//! `upshift` CLI entry-point.
//!
//! Workflows are run by the loader that owns the actors; this binary reads
//! and maintains the store they write to.
//!
//! Available sub-commands:
//! - `migrate`: apply pending store migrations.
//! - `executions`: list every recorded run attempt.
//! - `report`: checkpoints and errors of one execution.
//! - `messages`: messages produced within one execution.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::{MessageBus, StoreConfig};

#[derive(Parser)]
#[command(
    name = "upshift",
    about = "Inspect and maintain the upgrade orchestration store",
    version
)]
struct Cli {
    /// SQLite URL of the store.
    #[arg(long, global = true, env = "UPSHIFT_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending store migrations.
    Migrate,
    /// List every recorded run attempt.
    Executions,
    /// Show attempts, checkpoints and errors of an execution.
    Report {
        execution: String,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the messages produced within an execution.
    Messages { execution: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    // Opening the bus applies pending migrations.
    let bus = MessageBus::open(&config)
        .await
        .with_context(|| format!("cannot open store at {}", config.database_url))?;

    match cli.command {
        Command::Migrate => {
            info!("Migrations applied to {}", config.database_url);
        }
        Command::Executions => {
            for row in bus.list_executions().await.context("listing executions")? {
                println!(
                    "{:>5}  {}  {:<10}  {}",
                    row.id,
                    row.stamp.format("%Y-%m-%d %H:%M:%S"),
                    row.kind,
                    row.context
                );
            }
        }
        Command::Report { execution, json } => {
            let report = engine::report(&bus, &execution)
                .await
                .with_context(|| format!("building report for {execution}"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("Execution {}", report.execution);
            println!("  attempts: {}", report.attempts.len());
            println!("  messages: {}", report.messages);
            println!("Checkpoints:");
            for row in &report.checkpoints {
                println!("  {:<17} {:<20} {}", row.event, row.phase, row.actor);
            }
            println!("Errors:");
            if report.errors.is_empty() {
                println!("  none");
            }
            for err in &report.errors {
                println!(
                    "  [{}] {}/{}: {}",
                    err.severity, err.phase, err.actor, err.message
                );
            }
        }
        Command::Messages { execution } => {
            for message in bus
                .messages(&execution)
                .await
                .with_context(|| format!("reading messages of {execution}"))?
            {
                println!(
                    "{:>5}  {:<20} {:<12} {}/{}  {}",
                    message.id,
                    message.msg_type,
                    message.topic,
                    message.phase,
                    message.actor,
                    message.data
                );
            }
        }
    }

    Ok(())
}
