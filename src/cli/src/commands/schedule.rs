//! Schedule preview commands.
//!
//! Resolves the configured cron rules offline; no Redis connection is made.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;
use settle_core::reconciliation::Cadence;
use tabled::Tabled;

use crate::context::CliContext;
use crate::output;

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// List the cadences and their next occurrences
    Show {
        /// Occurrences to list per cadence
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,
    },
}

#[derive(Debug, Serialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct OccurrenceRow {
    #[tabled(rename = "Cadence")]
    cadence: String,
    #[tabled(rename = "Cron")]
    cron: String,
    #[tabled(rename = "Runs At")]
    runs_at: String,
    #[tabled(rename = "Window")]
    window_hours: u32,
    #[tabled(rename = "Batch")]
    batch_size: u32,
    #[tabled(rename = "Orders")]
    orders: String,
    #[tabled(rename = "Priority")]
    priority: String,
}

pub fn execute(cmd: ScheduleCommands, ctx: &CliContext) -> Result<()> {
    match cmd {
        ScheduleCommands::Show { count } => {
            let cadences = Cadence::resolve_all(&ctx.config.reconciliation)?;
            let now = Utc::now();

            let rows: Vec<OccurrenceRow> = cadences
                .iter()
                .flat_map(|cadence| {
                    let kind = cadence.kind;
                    cadence
                        .rule
                        .upcoming(now, count)
                        .into_iter()
                        .map(move |at| OccurrenceRow {
                            cadence: kind.name().to_string(),
                            cron: cadence.rule.expression().to_string(),
                            runs_at: at.to_rfc3339(),
                            window_hours: kind.time_range_hours(),
                            batch_size: kind.batch_size(),
                            orders: if kind.only_unconfirmed() { "unconfirmed" } else { "all" }
                                .to_string(),
                            priority: kind.priority().as_str().to_string(),
                        })
                })
                .collect();

            output::print_list(&rows, ctx.format)?;
        }
    }
    Ok(())
}
