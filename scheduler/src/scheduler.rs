//! Dispatch loop and job lifecycle management.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, instrument, warn};

use corebank_common::{JobId, LedgerError, Result};

use crate::backoff::backoff_delay;
use crate::handler::{JobHandler, JobOutcome};
use crate::job::{BatchJob, JobStatus};

/// Input to [`BatchJobScheduler::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub scheduled_at: chrono::DateTime<Utc>,
    pub parameters: serde_json::Value,
    pub priority: u8,
    pub max_retry: u32,
    pub parent_job_id: Option<JobId>,
}

impl EnqueueRequest {
    /// Request with default priority 1 and retry budget 3.
    pub fn new(
        job_type: impl Into<String>,
        scheduled_at: chrono::DateTime<Utc>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            scheduled_at,
            parameters,
            priority: 1,
            max_retry: 3,
            parent_job_id: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_parent(mut self, parent_job_id: JobId) -> Self {
        self.parent_job_id = Some(parent_job_id);
        self
    }
}

/// Single coordinating loop feeding a bounded worker pool.
///
/// Due jobs are dispatched by priority descending, then scheduled time
/// ascending. A worker permit bounds how many handlers run at once.
pub struct BatchJobScheduler {
    jobs: DashMap<JobId, BatchJob>,
    children: DashMap<JobId, Vec<JobId>>,
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    workers: Arc<Semaphore>,
    poll_interval: StdDuration,
}

impl BatchJobScheduler {
    pub fn new(worker_count: usize, poll_interval: StdDuration) -> Self {
        Self {
            jobs: DashMap::new(),
            children: DashMap::new(),
            handlers: DashMap::new(),
            workers: Arc::new(Semaphore::new(worker_count)),
            poll_interval,
        }
    }

    /// Register the handler invoked for a job type.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Enqueue a new pending job.
    #[instrument(skip(self, request), fields(job_type = %request.job_type))]
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<BatchJob> {
        if let Some(parent) = request.parent_job_id {
            if !self.jobs.contains_key(&parent) {
                return Err(LedgerError::JobNotFound(parent));
            }
        }

        let job = BatchJob::new(
            request.job_type,
            request.scheduled_at,
            request.parameters,
            request.priority,
            request.max_retry,
            request.parent_job_id,
        )?;

        if let Some(parent) = job.parent_job_id {
            self.children.entry(parent).or_default().push(job.id);
        }
        self.jobs.insert(job.id, job.clone());

        info!(job_id = %job.id, priority = job.priority, "Job enqueued");
        Ok(job)
    }

    /// Get a job's current state.
    pub fn get(&self, job_id: JobId) -> Result<BatchJob> {
        self.jobs
            .get(&job_id)
            .map(|j| j.clone())
            .ok_or(LedgerError::JobNotFound(job_id))
    }

    /// Cancel a job and cascade to its descendants.
    ///
    /// Pending and retrying jobs become cancelled immediately. A running job
    /// is never interrupted; it is flagged and reconciled to cancelled once
    /// its current attempt finishes. Terminal jobs cannot be cancelled.
    #[instrument(skip(self))]
    pub fn cancel(&self, job_id: JobId) -> Result<BatchJob> {
        {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(LedgerError::JobNotFound(job_id))?;

            if job.status.is_terminal() {
                return Err(LedgerError::Validation {
                    message: format!("Job {job_id} is already {:?}", job.status),
                    field: Some("status".to_string()),
                });
            }

            if job.status.is_cancellable() {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.next_retry_at = None;
            } else {
                job.cancel_requested = true;
            }
            job.updated_at = Utc::now();
        }

        self.cascade_cancel(job_id);
        self.get(job_id)
    }

    fn cascade_cancel(&self, parent: JobId) {
        let child_ids = self
            .children
            .get(&parent)
            .map(|c| c.clone())
            .unwrap_or_default();
        for child_id in child_ids {
            if let Some(mut child) = self.jobs.get_mut(&child_id) {
                if child.status.is_cancellable() {
                    child.status = JobStatus::Cancelled;
                    child.completed_at = Some(Utc::now());
                    child.next_retry_at = None;
                } else if child.status == JobStatus::Running {
                    child.cancel_requested = true;
                }
                child.updated_at = Utc::now();
            }
            self.cascade_cancel(child_id);
        }
    }

    /// Due jobs, priority descending then scheduled time ascending.
    fn due_jobs(&self) -> Vec<BatchJob> {
        let now = Utc::now();
        let mut due: Vec<BatchJob> = self
            .jobs
            .iter()
            .filter(|j| j.is_due(now) && !j.cancel_requested)
            .map(|j| j.clone())
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
        });
        due
    }

    /// One dispatch pass: run every currently-due job to the end of its
    /// attempt. Concurrency within the pass is bounded by the worker pool.
    pub async fn dispatch_once(self: Arc<Self>) -> usize {
        let due = self.due_jobs();
        let mut handles = Vec::with_capacity(due.len());

        for job in due {
            // The job may have been cancelled since collection.
            let claimed = {
                match self.jobs.get_mut(&job.id) {
                    Some(mut j) if j.is_due(Utc::now()) && !j.cancel_requested => {
                        j.status = JobStatus::Running;
                        j.started_at = Some(Utc::now());
                        j.updated_at = Utc::now();
                        true
                    }
                    _ => false,
                }
            };
            if !claimed {
                continue;
            }

            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                scheduler.execute(job.id).await;
            }));
        }

        let dispatched = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job worker panicked");
            }
        }
        dispatched
    }

    async fn execute(&self, job_id: JobId) {
        let _permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let job = match self.get(job_id) {
            Ok(job) => job,
            Err(_) => return,
        };

        let handler = self.handlers.get(&job.job_type).map(|h| h.clone());
        let result = match handler {
            Some(handler) => handler.run(&job).await,
            None => Err(LedgerError::Internal(format!(
                "No handler registered for job type {}",
                job.job_type
            ))),
        };

        match result {
            Ok(outcome) => self.finish_success(job_id, outcome),
            Err(e) => self.finish_failure(job_id, e),
        }
    }

    fn finish_success(&self, job_id: JobId, outcome: JobOutcome) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.set_progress(outcome.processed_items, outcome.total_items);
            job.completed_at = Some(Utc::now());
            job.next_retry_at = None;
            job.updated_at = Utc::now();
            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                info!(job_id = %job_id, "Job completed but was reconciled to cancelled");
            } else {
                job.status = JobStatus::Completed;
                job.progress_percentage = 100;
                info!(job_id = %job_id, items = job.processed_items, "Job completed");
            }
        }
    }

    fn finish_failure(&self, job_id: JobId, error: LedgerError) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.updated_at = Utc::now();
            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.next_retry_at = None;
                return;
            }

            job.retry_count += 1;
            job.last_error = Some(error.to_string());

            if job.retry_count < job.max_retry {
                job.status = JobStatus::Retrying;
                job.next_retry_at = Some(Utc::now() + backoff_delay(job.retry_count));
                warn!(
                    job_id = %job_id,
                    retry_count = job.retry_count,
                    error = %error,
                    "Job attempt failed; retry scheduled"
                );
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.next_retry_at = None;
                error!(
                    job_id = %job_id,
                    attempts = job.retry_count,
                    error = %error,
                    "Job failed terminally"
                );
            }
        }
    }

    /// Run the dispatch loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(poll_interval = ?self.poll_interval, "Scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Arc::clone(&self).dispatch_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn force_due(&self, job_id: JobId) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            let past = Utc::now() - chrono::Duration::seconds(1);
            job.scheduled_at = past;
            if job.next_retry_at.is_some() {
                job.next_retry_at = Some(past);
            }
        }
    }
}
