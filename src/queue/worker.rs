/**
 * Job Worker (C6)
 *
 * Pulls jobs from one or more tenants' `JobQueue`s and dispatches them to
 * registered `JobHandler`s, bounding concurrency with a semaphore and
 * enforcing a per-job timeout. This is the "worker process" role from
 * §5: it never talks to API consumers directly — everything it needs to
 * signal back goes through C4 (the handlers it wraps do that).
 */
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::Result;

use super::queue::JobQueue;
use super::types::{Job, QueueLimits};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

pub struct Worker {
    queues: Vec<Arc<JobQueue>>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    limits: QueueLimits,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    pub fn new(queues: Vec<Arc<JobQueue>>, limits: QueueLimits) -> Self {
        let semaphore = Arc::new(Semaphore::new(limits.max_concurrent));
        Self { queues, handlers: HashMap::new(), limits, semaphore }
    }

    pub fn register(&mut self, job_name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_name.into(), handler);
    }

    /// Runs one poll-and-dispatch pass across every queue this worker
    /// services. Returns the number of jobs claimed (0 means idle).
    ///
    /// The caller drives the loop (typically `while !cancelled { poll_once().await; sleep(...).await }`)
    /// so cancellation is a plain loop condition rather than baked in here.
    pub async fn poll_once(&self) -> usize {
        let kinds: Vec<String> = self.handlers.keys().cloned().collect();
        let mut claimed = 0usize;

        for queue in &self.queues {
            loop {
                let permit = match self.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let job = match queue.claim_next(&kinds).await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        drop(permit);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to claim job");
                        drop(permit);
                        break;
                    }
                };
                claimed += 1;

                let Some(handler) = self.handlers.get(&job.kind).cloned() else {
                    warn!(kind = %job.kind, job_id = %job.id, "no handler registered for job kind, failing job");
                    let _ = queue.fail(&job.id).await;
                    drop(permit);
                    continue;
                };

                let queue = queue.clone();
                let timeout = self.limits.job_timeout;
                let max_attempts = self.limits.max_attempts;
                tokio::spawn(async move {
                    let _permit = permit;
                    let job_id = job.id.clone();
                    let result = tokio::time::timeout(timeout, handler.handle(&job)).await;
                    match result {
                        Ok(Ok(())) => {
                            if let Err(e) = queue.complete(&job_id).await {
                                error!(error = %e, job_id, "failed to mark job completed");
                            }
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, job_id, "job handler returned an error");
                            let _ = queue.fail(&job_id).await;
                            if job.attempts < max_attempts {
                                let _ = queue.requeue(&job_id).await;
                            }
                        }
                        Err(_) => {
                            error!(job_id, "job timed out");
                            let _ = queue.fail(&job_id).await;
                            if job.attempts < max_attempts {
                                let _ = queue.requeue(&job_id).await;
                            }
                        }
                    }
                });
            }
        }

        if claimed > 0 {
            info!(claimed, "worker dispatched jobs");
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDriver;
    use crate::tenant::TenantId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _job: &Job) -> Result<()> {
            Err(crate::error::Error::Transient("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_worker_dispatches_registered_handler() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let queue = Arc::new(JobQueue::new(driver, TenantId::new("acme")));
        queue.enqueue("generate_status_hint", json!({})).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new(vec![queue.clone()], QueueLimits::default());
        worker.register("generate_status_hint", Arc::new(CountingHandler(counter.clone())));

        assert_eq!(worker.poll_once().await, 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_job_immediately() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let queue = Arc::new(JobQueue::new(driver, TenantId::new("acme")));
        queue.enqueue_with_id("job_1".into(), "unregistered_kind", json!({})).await.unwrap();

        let worker = Worker::new(vec![queue.clone()], QueueLimits::default());
        worker.poll_once().await;

        use super::super::types::JobStatus;
        assert_eq!(queue.get("job_1").await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_failing_handler_requeues_under_max_attempts() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let queue = Arc::new(JobQueue::new(driver, TenantId::new("acme")));
        queue.enqueue_with_id("job_1".into(), "create_entity", json!({})).await.unwrap();

        let mut worker = Worker::new(vec![queue.clone()], QueueLimits::default());
        worker.register("create_entity", Arc::new(FailingHandler));
        worker.poll_once().await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        use super::super::types::JobStatus;
        assert_eq!(queue.get("job_1").await.unwrap().status, JobStatus::Queued);
    }
}
