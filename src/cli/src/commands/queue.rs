//! Job queue commands.

use anyhow::Result;
use clap::Subcommand;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show queue depth
    Stats,

    /// Stop workers from picking up jobs; enqueueing continues
    Pause,

    /// Let workers pick up jobs again
    Resume,

    /// Return jobs claimed by a crashed worker to their wait lists.
    /// Run only while no worker is consuming the queue.
    Recover,
}

pub async fn execute(cmd: QueueCommands, ctx: &CliContext) -> Result<()> {
    let queue = ctx.queue()?;

    match cmd {
        QueueCommands::Stats => {
            let stats = queue.stats().await?;
            match ctx.format {
                OutputFormat::Table => {
                    output::print_header("Queue");
                    output::print_detail("Redis", &ctx.redis_display());
                    output::print_detail("Prefix", &ctx.config.redis.queue_prefix);
                    output::print_detail("Pending", &stats.pending.to_string());
                    output::print_detail("Delayed", &stats.delayed.to_string());
                    output::print_detail("Active", &stats.active.to_string());
                    output::print_detail("Dead", &stats.dead_letter.to_string());
                    output::print_detail(
                        "State",
                        if stats.paused { "paused" } else { "running" },
                    );
                    if stats.paused {
                        output::print_warning("Workers are not dequeueing jobs");
                    }
                }
                _ => output::print_item(&stats, ctx.format)?,
            }
        }
        QueueCommands::Pause => {
            queue.pause().await?;
            output::print_success("Queue paused");
        }
        QueueCommands::Resume => {
            queue.resume().await?;
            output::print_success("Queue resumed");
        }
        QueueCommands::Recover => {
            let recovered = queue.recover_stalled().await?;
            if recovered == 0 {
                output::print_warning("No unacknowledged jobs");
            } else {
                output::print_success(&format!("Requeued {} unacknowledged job(s)", recovered));
            }
        }
    }

    Ok(())
}
