//! Background execution for import, analysis and export.
//!
//! Each job runs on tokio's blocking pool against owned inputs. Tickets are
//! handed out in order and only the newest ticket's result is kept; older
//! results are dropped when they arrive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("background job '{label}' panicked or was cancelled: {message}")]
    Join { label: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// A newer job was issued while this one ran.
    Superseded,
}

impl<T> JobOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Superseded => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    latest: Arc<AtomicU64>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Issues a ticket and runs `work` on the blocking pool.
    pub async fn run<T, F>(&self, label: &str, work: F) -> Result<JobOutcome<T>, JobError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let ticket = self.issue();
        self.run_with(ticket, label, work).await
    }

    pub async fn run_with<T, F>(
        &self,
        ticket: Ticket,
        label: &str,
        work: F,
    ) -> Result<JobOutcome<T>, JobError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        tracing::debug!(job = label, ticket = ticket.0, "job started");
        let value = tokio::task::spawn_blocking(work)
            .await
            .map_err(|err| JobError::Join {
                label: label.to_string(),
                message: err.to_string(),
            })?;

        if self.is_current(ticket) {
            tracing::debug!(job = label, ticket = ticket.0, "job completed");
            Ok(JobOutcome::Completed(value))
        } else {
            tracing::warn!(job = label, ticket = ticket.0, "discarding stale job result");
            Ok(JobOutcome::Superseded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[tokio::test]
    async fn single_job_completes() {
        let jobs = JobQueue::new();
        let outcome = jobs.run("sum", || (1..=4).sum::<u32>()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed(10));
    }

    #[tokio::test]
    async fn newer_job_supersedes_older_one() {
        let jobs = JobQueue::new();
        let (release, gate) = mpsc::channel::<()>();

        let first = jobs.issue();
        let slow = {
            let jobs = jobs.clone();
            tokio::spawn(async move {
                jobs.run_with(first, "export", move || {
                    let _ = gate.recv();
                    "old"
                })
                .await
            })
        };

        let second = jobs.run("export", || "new").await.unwrap();
        release.send(()).unwrap();
        let first = slow.await.unwrap().unwrap();

        assert_eq!(second, JobOutcome::Completed("new"));
        assert_eq!(first, JobOutcome::Superseded);
        assert_eq!(first.completed(), None);
    }

    #[tokio::test]
    async fn panicking_job_surfaces_join_error() {
        let jobs = JobQueue::new();
        let err = jobs
            .run("boom", || -> u8 { panic!("boom") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn tickets_increase() {
        let jobs = JobQueue::new();
        let a = jobs.issue();
        let b = jobs.issue();
        assert!(b > a);
        assert!(!jobs.is_current(a));
        assert!(jobs.is_current(b));
    }
}
