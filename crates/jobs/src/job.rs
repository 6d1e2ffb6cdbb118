//! Job definitions and pollable handles.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::watch;
use uuid::Uuid;

/// Which attempt of a job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobAttempt {
    pub number: u32,
    pub max_attempts: u32,
}

impl JobAttempt {
    /// No retry follows this attempt, whatever its outcome.
    pub fn is_final(&self) -> bool {
        self.number >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
    /// Transient failures are retried while attempts remain.
    pub transient: bool,
}

impl JobFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobFailure>> + Send>>;

/// A named unit of background work. The task is re-invoked once per attempt.
pub struct Job {
    pub name: String,
    pub task: Box<dyn FnMut(JobAttempt) -> JobFuture + Send>,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, mut task: F) -> Self
    where
        F: FnMut(JobAttempt) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobFailure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            task: Box::new(move |attempt| Box::pin(task(attempt))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded { .. } | JobStatus::Failed { .. })
    }
}

/// Serializable reference returned to callers alongside a `processing` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    reference: JobRef,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn new(reference: JobRef, status: watch::Receiver<JobStatus>) -> Self {
        Self { reference, status }
    }

    pub fn id(&self) -> Uuid {
        self.reference.id
    }

    pub fn reference(&self) -> &JobRef {
        &self.reference
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Wait for a terminal status. A job whose worker vanished without
    /// reporting one (panic, runtime shutdown) reads as failed.
    pub async fn wait(&self) -> JobStatus {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                let last = status.borrow().clone();
                if last.is_terminal() {
                    return last;
                }
                let attempts = match last {
                    JobStatus::Running { attempt } => attempt,
                    _ => 0,
                };
                return JobStatus::Failed {
                    attempts,
                    error: "job aborted".to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_attempt() {
        let attempt = JobAttempt {
            number: 3,
            max_attempts: 3,
        };
        assert!(attempt.is_final());
        assert!(!JobAttempt {
            number: 1,
            max_attempts: 3
        }
        .is_final());
    }

    #[tokio::test]
    async fn test_wait_reports_abort_when_sender_dropped() {
        let (tx, rx) = watch::channel(JobStatus::Running { attempt: 2 });
        let handle = JobHandle::new(
            JobRef {
                id: Uuid::new_v4(),
                name: "compute:kpis:abc".into(),
            },
            rx,
        );
        drop(tx);
        assert_eq!(
            handle.wait().await,
            JobStatus::Failed {
                attempts: 2,
                error: "job aborted".into()
            }
        );
    }
}
