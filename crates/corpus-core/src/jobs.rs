// corpus-core/src/jobs.rs
//! Asynchronous units of work
//!
//! A job scans one shard (or fetches its sentences) and reports back through
//! the reply channel handed in at enqueue time. Delivery is at-least-once:
//! a queue may report the same job more than once, so consumers dedupe on
//! the job id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::aggregator::CallbackKind;
use crate::bundle::RawRow;
use crate::catalog::Shard;
use crate::error::QueueError;

pub type JobId = Uuid;

/// The body of a job
pub type Work = BoxFuture<'static, Result<Vec<RawRow>, String>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),
    #[error("job was stopped")]
    Stopped,
}

/// Completion event, the equivalent of a job library's success/failure callback
#[derive(Debug, Clone)]
pub struct Completion {
    pub job: JobId,
    pub kind: CallbackKind,
    pub shard: Shard,
    pub outcome: Result<Vec<RawRow>, JobError>,
}

pub struct JobRequest {
    pub id: JobId,
    pub kind: CallbackKind,
    pub shard: Shard,
    /// The job does not start before this one has completed or stopped
    pub depends_on: Option<JobId>,
    pub work: Work,
    pub reply: mpsc::UnboundedSender<Completion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting on its dependency
    Queued,
    Running,
    /// Completed, stopped, or never seen
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub depends_on: Option<JobId>,
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, request: JobRequest) -> Result<JobHandle, QueueError>;

    /// Best effort; a stopped job never reports
    fn stop(&self, job: JobId);

    fn status(&self, job: JobId) -> JobStatus;
}

struct JobSlot {
    status: JobStatus,
    done: watch::Receiver<bool>,
    abort: AbortHandle,
}

/// In-process queue running every job as a tokio task
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Default)]
pub struct TokioJobQueue {
    jobs: Arc<Mutex<HashMap<JobId, JobSlot>>>,
}

impl TokioJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(jobs: &Mutex<HashMap<JobId, JobSlot>>) -> MutexGuard<'_, HashMap<JobId, JobSlot>> {
        jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Jobs queued or running
    pub fn active(&self) -> usize {
        Self::lock(&self.jobs).len()
    }
}

impl JobQueue for TokioJobQueue {
    fn enqueue(&self, request: JobRequest) -> Result<JobHandle, QueueError> {
        let JobRequest { id, kind, shard, depends_on, work, reply } = request;
        if reply.is_closed() {
            return Err(QueueError::Unavailable(format!("nobody is waiting for job {id}")));
        }

        let (done_tx, done_rx) = watch::channel(false);
        let mut jobs = Self::lock(&self.jobs);
        let dependency = depends_on.and_then(|dep| jobs.get(&dep)).map(|slot| slot.done.clone());

        let registry = Arc::clone(&self.jobs);
        let task = tokio::spawn(async move {
            if let Some(mut dependency) = dependency {
                // a stopped dependency drops its sender, which also releases us
                let _ = dependency.wait_for(|done| *done).await;
            }
            if let Some(slot) = Self::lock(&registry).get_mut(&id) {
                slot.status = JobStatus::Running;
            }

            let outcome = work.await.map_err(JobError::Failed);

            Self::lock(&registry).remove(&id);
            let _ = done_tx.send(true);
            let _ = reply.send(Completion { job: id, kind, shard, outcome });
        });

        jobs.insert(
            id,
            JobSlot {
                status: JobStatus::Queued,
                done: done_rx,
                abort: task.abort_handle(),
            },
        );
        Ok(JobHandle { id, depends_on })
    }

    fn stop(&self, job: JobId) {
        if let Some(slot) = Self::lock(&self.jobs).remove(&job) {
            tracing::debug!("[JobQueue] stopping {}", job);
            slot.abort.abort();
        }
    }

    fn status(&self, job: JobId) -> JobStatus {
        Self::lock(&self.jobs)
            .get(&job)
            .map(|slot| slot.status)
            .unwrap_or(JobStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn shard() -> Shard {
        Shard::new(1, "loc", "b1", 10)
    }

    fn request(id: JobId, depends_on: Option<JobId>, work: Work, reply: &mpsc::UnboundedSender<Completion>) -> JobRequest {
        JobRequest {
            id,
            kind: CallbackKind::Query,
            shard: shard(),
            depends_on,
            work,
            reply: reply.clone(),
        }
    }

    #[tokio::test]
    async fn test_job_reports_rows() {
        let queue = TokioJobQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        queue
            .enqueue(request(id, None, async { Ok(vec![(1, json!("m"))]) }.boxed(), &tx))
            .unwrap();

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.job, id);
        assert_eq!(completion.outcome.unwrap().len(), 1);
        assert_eq!(queue.status(id), JobStatus::Unknown);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let queue = TokioJobQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue
            .enqueue(request(Uuid::new_v4(), None, async { Err("relation does not exist".to_string()) }.boxed(), &tx))
            .unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.outcome.unwrap_err(), JobError::Failed("relation does not exist".into()));
    }

    #[tokio::test]
    async fn test_dependency_orders_jobs() {
        let queue = TokioJobQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        queue
            .enqueue(request(first, None, async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(vec![])
            }.boxed(), &tx))
            .unwrap();
        queue.enqueue(request(second, Some(first), async { Ok(vec![]) }.boxed(), &tx)).unwrap();

        assert_eq!(rx.recv().await.unwrap().job, first);
        assert_eq!(rx.recv().await.unwrap().job, second);
    }

    #[tokio::test]
    async fn test_stop_suppresses_completion_and_releases_dependents() {
        let queue = TokioJobQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slow = Uuid::new_v4();
        let next = Uuid::new_v4();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        queue
            .enqueue(request(slow, None, async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            }.boxed(), &tx))
            .unwrap();
        queue.enqueue(request(next, Some(slow), async { Ok(vec![]) }.boxed(), &tx)).unwrap();

        queue.stop(slow);
        let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(completion.job, next);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
