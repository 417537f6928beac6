//! CoreBank Batch Job Scheduler
//!
//! Generic retry-capable asynchronous job runner: a single coordinating
//! loop feeds a bounded worker pool, jobs carry their own retry budget, and
//! failures back off exponentially until the budget is exhausted.

pub mod job;
pub mod backoff;
pub mod handler;
pub mod scheduler;

pub use job::{job_types, BatchJob, JobStatus};
pub use backoff::backoff_delay;
pub use handler::{JobHandler, JobOutcome};
pub use scheduler::{BatchJobScheduler, EnqueueRequest};
