//! Configuration inspection commands.
//!
//! Shows the configuration the server would load from the same file and
//! `SETTLE__*` environment.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[derive(Debug, Serialize, Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl ConfigRow {
    fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn rows(ctx: &CliContext) -> Vec<ConfigRow> {
    let config = &ctx.config;
    let recon = &config.reconciliation;
    vec![
        ConfigRow::new("redis.url", ctx.redis_display()),
        ConfigRow::new("redis.queue_prefix", &config.redis.queue_prefix),
        ConfigRow::new("queue.max_size", config.queue.max_size),
        ConfigRow::new("queue.max_attempts", config.queue.max_attempts),
        ConfigRow::new("reconciliation.timezone", &recon.timezone),
        ConfigRow::new("reconciliation.frequent_cron", &recon.frequent_cron),
        ConfigRow::new("reconciliation.regular_cron", &recon.regular_cron),
        ConfigRow::new("reconciliation.comprehensive_cron", &recon.comprehensive_cron),
        ConfigRow::new("reconciliation.max_manual_hours", recon.max_manual_hours),
        ConfigRow::new("logging.level", &config.logging.level),
        ConfigRow::new("metrics.enabled", config.metrics.enabled),
        ConfigRow::new("metrics.endpoint", &config.metrics.endpoint),
    ]
}

pub fn execute(cmd: ConfigCommands, ctx: &CliContext) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let rows = rows(ctx);
            match ctx.format {
                OutputFormat::Table => {
                    output::print_header("Effective Configuration");
                    output::print_list(&rows, ctx.format)?;
                }
                _ => output::print_list(&rows, ctx.format)?,
            }
        }
    }
    Ok(())
}
