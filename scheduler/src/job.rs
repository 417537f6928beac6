//! Batch job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use corebank_common::{JobId, LedgerError, Result};

/// Well-known job type keys. Job types stay open strings so operators can
/// register new handlers without touching this crate.
pub mod job_types {
    pub const INTEREST_CALCULATION: &str = "interest_calculation";
    pub const FRAUD_SCAN: &str = "fraud_scan";
    pub const KYC_RENEWAL: &str = "kyc_renewal";
    pub const REPORT_GENERATION: &str = "report_generation";
}

/// Batch job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its scheduled time.
    Pending,
    /// Currently executing on a worker.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Retry budget exhausted. Terminal.
    Failed,
    /// Failed at least once, waiting for its next attempt.
    Retrying,
    /// Cancelled before completion. Terminal.
    Cancelled,
}

impl JobStatus {
    /// Check if this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if a job in this status can still be cancelled outright.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }
}

/// A schedulable, retryable unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique job identifier.
    pub id: JobId,
    /// Handler key; which registered handler runs this job.
    pub job_type: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Earliest time the job may run.
    pub scheduled_at: DateTime<Utc>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempts that have failed so far.
    pub retry_count: u32,
    /// Attempts allowed before the job fails terminally.
    pub max_retry: u32,
    /// When the next retry attempt becomes due.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Dispatch priority, 1 (lowest) to 5 (highest).
    pub priority: u8,
    /// Items processed by the most recent attempt.
    pub processed_items: u64,
    /// Total items the job covers, when known.
    pub total_items: u64,
    /// Always derived from processed/total, clamped to 0..=100.
    pub progress_percentage: u8,
    /// Parent job for sub-job chaining.
    pub parent_job_id: Option<JobId>,
    /// Set when a cancel arrives while the job is running; applied once the
    /// attempt finishes.
    pub cancel_requested: bool,
    /// Message from the last failed attempt.
    pub last_error: Option<String>,
    /// Handler-specific payload.
    pub parameters: serde_json::Value,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job record last changed.
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    /// Create a pending job. Priority must be within 1..=5.
    pub fn new(
        job_type: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        parameters: serde_json::Value,
        priority: u8,
        max_retry: u32,
        parent_job_id: Option<JobId>,
    ) -> Result<Self> {
        if !(1..=5).contains(&priority) {
            return Err(LedgerError::Validation {
                message: format!("Priority {priority} outside 1..=5"),
                field: Some("priority".to_string()),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retry,
            next_retry_at: None,
            priority,
            processed_items: 0,
            total_items: 0,
            progress_percentage: 0,
            parent_job_id,
            cancel_requested: false,
            last_error: None,
            parameters,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record item counts and recompute the derived progress percentage.
    pub fn set_progress(&mut self, processed_items: u64, total_items: u64) {
        self.processed_items = processed_items;
        self.total_items = total_items;
        self.progress_percentage = if total_items == 0 {
            0
        } else {
            (processed_items.saturating_mul(100) / total_items).min(100) as u8
        };
    }

    /// Check whether the job is due to run.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.scheduled_at <= now,
            JobStatus::Retrying => self.next_retry_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BatchJob {
        BatchJob::new(
            "fraud_scan",
            Utc::now(),
            serde_json::json!({}),
            3,
            3,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_priority_bounds() {
        for priority in [0u8, 6] {
            let err = BatchJob::new(
                "fraud_scan",
                Utc::now(),
                serde_json::json!({}),
                priority,
                3,
                None,
            )
            .unwrap_err();
            assert!(matches!(err, LedgerError::Validation { .. }));
        }
    }

    #[test]
    fn test_progress_is_derived_and_clamped() {
        let mut job = job();

        job.set_progress(1, 3);
        assert_eq!(job.progress_percentage, 33);

        job.set_progress(10, 3);
        assert_eq!(job.progress_percentage, 100);

        job.set_progress(5, 0);
        assert_eq!(job.progress_percentage, 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_progress_matches_floor_division(
                processed in 0u64..1_000_000,
                total in 1u64..1_000_000,
            ) {
                let mut job = job();
                job.set_progress(processed, total);

                let expected = (processed * 100 / total).min(100) as u8;
                prop_assert_eq!(job.progress_percentage, expected);
                prop_assert!(job.progress_percentage <= 100);
            }
        }
    }

    #[test]
    fn test_due_computation() {
        let mut job = job();
        let now = Utc::now();
        assert!(job.is_due(now));

        job.status = JobStatus::Retrying;
        assert!(!job.is_due(now));

        job.next_retry_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_due(now));
    }
}
