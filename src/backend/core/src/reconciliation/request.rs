//! Reconciliation job parameters as handed to the queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SettleError};
use crate::jobs::JobPriority;

/// Why a reconciliation run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationType {
    Scheduled,
    Manual,
    Emergency,
}

impl ReconciliationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for ReconciliationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one reconciliation run.
///
/// Built once by the scheduler and immutable afterwards. The window and batch
/// size are always positive; deserializing a payload re-checks that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRequest")]
pub struct ReconciliationJobRequest {
    reconciliation_type: ReconciliationType,
    time_range_hours: u32,
    batch_size: u32,
    only_unconfirmed: bool,
    priority: JobPriority,
    delay_ms: u64,
}

impl ReconciliationJobRequest {
    /// Validate and build a request.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `time_range_hours` or `batch_size` is zero.
    pub fn new(
        reconciliation_type: ReconciliationType,
        time_range_hours: u32,
        batch_size: u32,
        only_unconfirmed: bool,
        priority: JobPriority,
        delay_ms: u64,
    ) -> Result<Self> {
        if time_range_hours == 0 {
            return Err(SettleError::invalid_input(
                "time_range_hours",
                "Reconciliation window must be at least one hour",
            ));
        }
        if batch_size == 0 {
            return Err(SettleError::invalid_input(
                "batch_size",
                "Reconciliation batch size must be positive",
            ));
        }

        Ok(Self {
            reconciliation_type,
            time_range_hours,
            batch_size,
            only_unconfirmed,
            priority,
            delay_ms,
        })
    }

    pub fn reconciliation_type(&self) -> ReconciliationType {
        self.reconciliation_type
    }

    pub fn time_range_hours(&self) -> u32 {
        self.time_range_hours
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn only_unconfirmed(&self) -> bool {
        self.only_unconfirmed
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    reconciliation_type: ReconciliationType,
    time_range_hours: u32,
    batch_size: u32,
    only_unconfirmed: bool,
    priority: JobPriority,
    #[serde(default)]
    delay_ms: u64,
}

impl TryFrom<RawRequest> for ReconciliationJobRequest {
    type Error = SettleError;

    fn try_from(raw: RawRequest) -> Result<Self> {
        Self::new(
            raw.reconciliation_type,
            raw.time_range_hours,
            raw.batch_size,
            raw.only_unconfirmed,
            raw.priority,
            raw.delay_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_rejects_empty_window() {
        let err = ReconciliationJobRequest::new(
            ReconciliationType::Manual,
            0,
            50,
            false,
            JobPriority::High,
            0,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.details().context["field"], "time_range_hours");
    }

    #[test]
    fn test_rejects_empty_batch() {
        let err = ReconciliationJobRequest::new(
            ReconciliationType::Scheduled,
            4,
            0,
            true,
            JobPriority::Medium,
            0,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.details().context["field"], "batch_size");
    }

    #[test]
    fn test_wire_form_is_camel_case() {
        let request = ReconciliationJobRequest::new(
            ReconciliationType::Scheduled,
            4,
            30,
            true,
            JobPriority::Medium,
            120_000,
        )
        .unwrap();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "reconciliationType": "scheduled",
                "timeRangeHours": 4,
                "batchSize": 30,
                "onlyUnconfirmed": true,
                "priority": "medium",
                "delayMs": 120000
            })
        );
        assert_eq!(request.delay(), Duration::from_secs(120));
    }

    #[test]
    fn test_payload_validation_on_deserialize() {
        let bad = serde_json::json!({
            "reconciliationType": "manual",
            "timeRangeHours": 0,
            "batchSize": 50,
            "onlyUnconfirmed": false,
            "priority": "high"
        });
        assert!(serde_json::from_value::<ReconciliationJobRequest>(bad).is_err());

        let good = serde_json::json!({
            "reconciliationType": "emergency",
            "timeRangeHours": 72,
            "batchSize": 20,
            "onlyUnconfirmed": true,
            "priority": "critical"
        });
        let request: ReconciliationJobRequest = serde_json::from_value(good).unwrap();
        assert_eq!(request.reconciliation_type(), ReconciliationType::Emergency);
        assert_eq!(request.delay_ms(), 0);
    }
}
