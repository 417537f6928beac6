//! Pluggable job handlers.

use async_trait::async_trait;

use corebank_common::Result;

use crate::job::BatchJob;

/// What a successful attempt reports back to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOutcome {
    pub processed_items: u64,
    pub total_items: u64,
}

impl JobOutcome {
    pub fn new(processed_items: u64, total_items: u64) -> Self {
        Self {
            processed_items,
            total_items,
        }
    }
}

/// Job-type-specific work. Implementations are registered with the
/// scheduler under a job type key; a returned error counts against the
/// job's retry budget.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &BatchJob) -> Result<JobOutcome>;
}
