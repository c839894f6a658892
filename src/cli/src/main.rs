//! Settle CLI - operator tooling for payment reconciliation.
//!
//! Triggers manual and emergency runs, inspects the job queue and previews the
//! cron schedule.

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, queue, reconcile, schedule};
use context::CliContext;
use output::OutputFormat;

/// Settle - Payment Reconciliation CLI
#[derive(Parser)]
#[command(
    name = "settle",
    version = "0.1.0",
    about = "Settle - Payment Reconciliation",
    long_about = "Trigger payment reconciliation runs, manage the job queue and preview schedules.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Config file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "SETTLE_CONFIG")]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger reconciliation runs
    #[command(subcommand)]
    Reconcile(reconcile::ReconcileCommands),

    /// Job queue operations
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Preview the reconciliation schedule
    #[command(subcommand)]
    Schedule(schedule::ScheduleCommands),

    /// Show the effective configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = match CliContext::load(cli.config.as_deref(), format) {
        Ok(ctx) => match cli.command {
            Commands::Reconcile(cmd) => reconcile::execute(cmd, &ctx).await,
            Commands::Queue(cmd) => queue::execute(cmd, &ctx).await,
            Commands::Schedule(cmd) => schedule::execute(cmd, &ctx),
            Commands::Config(cmd) => config::execute(cmd, &ctx),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
