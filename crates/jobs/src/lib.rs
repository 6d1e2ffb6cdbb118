#![warn(clippy::unwrap_used)]

pub mod job;
pub mod retry;
pub mod runner;

pub use job::{Job, JobAttempt, JobFailure, JobHandle, JobRef, JobStatus};
pub use retry::RetryPolicy;
pub use runner::{JobError, JobRunner, TokioJobRunner};
