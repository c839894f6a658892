//! Cron rules and the three recurring reconciliation cadences.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::fmt;
use std::str::FromStr;

use super::jitter::JitterRange;
use super::request::{ReconciliationJobRequest, ReconciliationType};
use crate::config::ReconciliationConfig;
use crate::error::{Result, SettleError};
use crate::jobs::JobPriority;

// ═══════════════════════════════════════════════════════════════════════════════
// Cron Rule
// ═══════════════════════════════════════════════════════════════════════════════

/// A cron expression bound to an IANA timezone.
///
/// Accepts 5-field Unix expressions (minute first), and the 6/7-field forms
/// with a leading seconds field understood by the `cron` crate.
#[derive(Debug, Clone)]
pub struct CronRule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronRule {
    /// Parse `expression` and resolve `timezone`.
    ///
    /// # Errors
    ///
    /// `InvalidSchedule` for a malformed expression, `InvalidTimezone` for an
    /// unknown zone name.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let normalized = normalize_expression(expression)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| SettleError::invalid_schedule(expression, e.to_string()))?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| SettleError::invalid_timezone(timezone))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First occurrence strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&self.timezone);
        self.schedule
            .after(&local_after)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// The next `count` occurrences after `after`, in the rule's timezone.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Tz>> {
        let local_after = after.with_timezone(&self.timezone);
        self.schedule.after(&local_after).take(count).collect()
    }
}

impl fmt::Display for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.timezone)
    }
}

fn normalize_expression(expression: &str) -> Result<String> {
    match expression.split_whitespace().count() {
        5 => Ok(format!("0 {} *", expression.trim())),
        6 | 7 => Ok(expression.trim().to_string()),
        n => Err(SettleError::invalid_schedule(
            expression,
            format!("expected 5, 6 or 7 fields, found {}", n),
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cadences
// ═══════════════════════════════════════════════════════════════════════════════

/// The recurring reconciliation sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CadenceKind {
    /// Every 15 minutes, last 4 hours, unconfirmed orders only
    Frequent,
    /// Every 6 hours, last 24 hours, all orders
    Regular,
    /// Daily at 02:00, last 7 days, all orders
    Comprehensive,
}

impl CadenceKind {
    /// Registration order.
    pub const ALL: [CadenceKind; 3] = [Self::Frequent, Self::Regular, Self::Comprehensive];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Frequent => "frequent",
            Self::Regular => "regular",
            Self::Comprehensive => "comprehensive",
        }
    }

    pub fn default_cron(&self) -> &'static str {
        match self {
            Self::Frequent => "0 */15 * * * *",
            Self::Regular => "0 0 */6 * * *",
            Self::Comprehensive => "0 0 2 * * *",
        }
    }

    pub fn time_range_hours(&self) -> u32 {
        match self {
            Self::Frequent => 4,
            Self::Regular => 24,
            Self::Comprehensive => 168,
        }
    }

    pub fn batch_size(&self) -> u32 {
        match self {
            Self::Frequent => 30,
            Self::Regular => 100,
            Self::Comprehensive => 200,
        }
    }

    pub fn only_unconfirmed(&self) -> bool {
        matches!(self, Self::Frequent)
    }

    pub fn priority(&self) -> JobPriority {
        match self {
            Self::Frequent | Self::Regular => JobPriority::Medium,
            Self::Comprehensive => JobPriority::Low,
        }
    }

    pub fn jitter(&self) -> JitterRange {
        match self {
            Self::Frequent => JitterRange::new(60_000, 300_000),
            Self::Regular => JitterRange::new(300_000, 900_000),
            Self::Comprehensive => JitterRange::new(600_000, 1_800_000),
        }
    }

    /// Build the scheduled request for this cadence with the given delay.
    pub fn request(&self, delay_ms: u64) -> Result<ReconciliationJobRequest> {
        ReconciliationJobRequest::new(
            ReconciliationType::Scheduled,
            self.time_range_hours(),
            self.batch_size(),
            self.only_unconfirmed(),
            self.priority(),
            delay_ms,
        )
    }
}

impl fmt::Display for CadenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cadence with its resolved cron rule.
#[derive(Debug, Clone)]
pub struct Cadence {
    pub kind: CadenceKind,
    pub rule: CronRule,
}

impl Cadence {
    /// Resolve every cadence from configuration, failing on the first bad rule.
    pub fn resolve_all(config: &ReconciliationConfig) -> Result<Vec<Cadence>> {
        CadenceKind::ALL
            .iter()
            .map(|&kind| {
                let rule = CronRule::parse(config.cron_for(kind), &config.timezone)
                    .map_err(|e| e.with_context("cadence", kind.name()))?;
                Ok(Cadence { kind, rule })
            })
            .collect()
    }
}
