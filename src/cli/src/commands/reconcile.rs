//! Reconciliation trigger commands.
//!
//! Enqueue manual or emergency reconciliation jobs outside the cron schedule.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use settle_core::jobs::JobHandle;
use settle_core::reconciliation::EMERGENCY_WINDOW_HOURS;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Reconcile a custom window at high priority
    Manual {
        /// Hours to look back
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Include confirmed orders, not just unconfirmed ones
        #[arg(long)]
        all_orders: bool,
    },

    /// Reconcile the last 72 hours of unconfirmed orders at critical priority
    Emergency,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerReport<'a> {
    reconciliation_type: &'a str,
    time_range_hours: u32,
    only_unconfirmed: bool,
    job: &'a JobHandle,
}

pub async fn execute(cmd: ReconcileCommands, ctx: &CliContext) -> Result<()> {
    let scheduler = ctx.scheduler()?;

    let (kind, hours, only_unconfirmed, handle) = match cmd {
        ReconcileCommands::Manual { hours, all_orders } => {
            ctx.config.reconciliation.check_manual_window(hours)?;
            let only_unconfirmed = !all_orders;
            let handle = scheduler
                .trigger_manual_reconciliation(hours, only_unconfirmed)
                .await?;
            ("manual", hours, only_unconfirmed, handle)
        }
        ReconcileCommands::Emergency => {
            let handle = scheduler.trigger_emergency_reconciliation().await?;
            ("emergency", EMERGENCY_WINDOW_HOURS, true, handle)
        }
    };

    match ctx.format {
        OutputFormat::Table => {
            output::print_success(&format!("Enqueued {} reconciliation", kind));
            output::print_detail("Job ID", &handle.id.to_string());
            output::print_detail("Priority", handle.priority.as_str());
            output::print_detail("Window", &format!("{}h", hours));
            output::print_detail(
                "Orders",
                if only_unconfirmed { "unconfirmed" } else { "all" },
            );
            output::print_detail("Queue", &ctx.redis_display());
        }
        _ => output::print_item(
            &TriggerReport {
                reconciliation_type: kind,
                time_range_hours: hours,
                only_unconfirmed,
                job: &handle,
            },
            ctx.format,
        )?,
    }

    Ok(())
}
