//! Job runners. The orchestrator only sees [`JobRunner`]; the tokio worker
//! pool below is one adapter, an external queue would be another.

use crate::job::{Job, JobAttempt, JobHandle, JobRef, JobStatus};
use crate::retry::RetryPolicy;
use finboard_core::config::JobsConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job runner is shut down")]
    ShutDown,

    #[error("no async runtime available to run jobs")]
    NoRuntime,
}

pub trait JobRunner: Send + Sync {
    /// Queue a job. Fire-and-forget, or poll/await the returned handle.
    fn submit(&self, job: Job) -> Result<JobHandle, JobError>;

    /// Whether submitted jobs will actually run.
    fn is_available(&self) -> bool;
}

/// In-process worker pool: jobs run as tokio tasks, at most `workers` at once.
pub struct TokioJobRunner {
    runtime: Option<Handle>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
    shut_down: AtomicBool,
}

impl TokioJobRunner {
    /// Bind to the current tokio runtime, if any.
    pub fn new(workers: usize, policy: RetryPolicy) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("No tokio runtime at runner construction, jobs will be rejected");
        }
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            policy,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Pool of `jobs.workers` workers retrying per the `jobs` section.
    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.workers, RetryPolicy::from_config(config))
    }

    /// Stop accepting jobs. Queued jobs that have not started fail.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.permits.close();
        info!("Job runner shut down");
    }
}

impl JobRunner for TokioJobRunner {
    fn submit(&self, job: Job) -> Result<JobHandle, JobError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(JobError::ShutDown);
        }
        let runtime = self.runtime.as_ref().ok_or(JobError::NoRuntime)?;

        let reference = JobRef {
            id: Uuid::new_v4(),
            name: job.name.clone(),
        };
        let (tx, rx) = watch::channel(JobStatus::Queued);
        let permits = self.permits.clone();
        let policy = self.policy.clone();
        let job_id = reference.id;

        runtime.spawn(async move {
            let Job { name, mut task } = job;

            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(job = %name, job_id = %job_id, "Runner closed before job started");
                tx.send_replace(JobStatus::Failed {
                    attempts: 0,
                    error: "runner shut down".to_string(),
                });
                return;
            };

            let max_attempts = policy.max_attempts();
            let mut number = 0;
            loop {
                number += 1;
                tx.send_replace(JobStatus::Running { attempt: number });
                debug!(job = %name, job_id = %job_id, attempt = number, "Job attempt started");

                let attempt = JobAttempt {
                    number,
                    max_attempts,
                };
                match task(attempt).await {
                    Ok(()) => {
                        metrics::counter!("jobs.succeeded").increment(1);
                        info!(job = %name, job_id = %job_id, attempts = number, "Job succeeded");
                        tx.send_replace(JobStatus::Succeeded { attempts: number });
                        break;
                    }
                    Err(failure) if failure.transient && !attempt.is_final() => {
                        let delay = policy.delay_for(number);
                        metrics::counter!("jobs.retried").increment(1);
                        warn!(
                            job = %name,
                            job_id = %job_id,
                            attempt = number,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure,
                            "Transient job failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(failure) => {
                        metrics::counter!("jobs.failed").increment(1);
                        error!(job = %name, job_id = %job_id, attempts = number, error = %failure, "Job failed");
                        tx.send_replace(JobStatus::Failed {
                            attempts: number,
                            error: failure.message,
                        });
                        break;
                    }
                }
            }
        });

        Ok(JobHandle::new(reference, rx))
    }

    fn is_available(&self) -> bool {
        self.runtime.is_some() && !self.shut_down.load(Ordering::SeqCst)
    }
}
