//! Job registry: submission, lookup, background dispatch and retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, Semaphore};

use crate::agent::Journal;
use crate::error::{Error, Result};
use crate::job::{Job, SubmitJobRequest};
use crate::processor::JobProcessor;
use crate::sandbox::SandboxProvider;

/// Shared, in-memory map of job records keyed by job id.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one job.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Applies `f` to a job in place. Returns `None` if the job is gone.
    pub async fn update<F, R>(&self, job_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        self.jobs.write().await.get_mut(job_id).map(f)
    }

    /// Inserts `job` unless its id is taken, under a single write lock.
    ///
    /// Returns `Ok(job)` on insertion and `Err(existing)` otherwise.
    pub async fn insert_if_absent(&self, job: Job) -> std::result::Result<Job, Job> {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(&job.job_id) {
            return Err(existing.clone());
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// A journal appending to the given job's log.
    pub fn journal(&self, job_id: impl Into<String>) -> JobJournal {
        JobJournal {
            store: self.clone(),
            job_id: job_id.into(),
        }
    }
}

/// [`Journal`] backed by a job's `logs`.
pub struct JobJournal {
    store: JobStore,
    job_id: String,
}

#[async_trait]
impl Journal for JobJournal {
    async fn append(&self, line: String) {
        self.store.update(&self.job_id, |job| job.log(line)).await;
    }
}

/// Result of a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A new job was accepted and scheduled.
    Created(Job),
    /// A job with this id already existed; returned unchanged.
    Existing(Job),
}

impl SubmitOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Accepts jobs and runs them in the background.
pub struct JobRegistry {
    store: JobStore,
    processor: Arc<dyn JobProcessor>,
    provider: Arc<SandboxProvider>,
    permits: Arc<Semaphore>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(
        store: JobStore,
        processor: Arc<dyn JobProcessor>,
        provider: Arc<SandboxProvider>,
    ) -> Self {
        Self {
            store,
            processor,
            provider,
            permits: Arc::new(Semaphore::new(4)),
            retention: Duration::from_secs(86_400),
        }
    }

    /// Sets how many jobs may be processed at once.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// Sets how long terminal jobs are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<SandboxProvider> {
        &self.provider
    }

    /// Accepts a submission.
    ///
    /// Resubmitting a known id returns the stored job without rescheduling.
    /// New jobs are validated, stored as PENDING and handed to a background
    /// task; this call does not wait for processing.
    pub async fn submit(&self, request: SubmitJobRequest) -> Result<SubmitOutcome> {
        if let Some(job_id) = request.trimmed_job_id() {
            if let Some(existing) = self.store.get(&job_id).await {
                tracing::debug!(job_id = %job_id, "returning existing job");
                return Ok(SubmitOutcome::Existing(existing));
            }
        }

        let submission = request.validate()?;
        let mut job = Job::new(submission);
        if let Some(slug) = &job.repo_slug {
            job.sandbox = Some(self.provider.ensure_for_branch(slug, &job.branch));
        }

        let job = match self.store.insert_if_absent(job).await {
            Ok(job) => job,
            Err(existing) => return Ok(SubmitOutcome::Existing(existing)),
        };

        tracing::info!(job_id = %job.job_id, branch = %job.branch, "job accepted");
        self.spawn(job.job_id.clone());
        Ok(SubmitOutcome::Created(job))
    }

    /// Snapshot of one job.
    pub async fn lookup(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)
            .await
            .ok_or_else(|| Error::NotFound(job_id.to_string()))
    }

    /// Removes terminal jobs last updated longer ago than the retention
    /// window. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(retention);

        let mut jobs = self.store.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !job.status.is_terminal() || cutoff.map_or(true, |cutoff| job.updated_at > cutoff)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = jobs.len(), "evicted expired jobs");
        }
        evicted
    }

    fn spawn(&self, job_id: String) {
        let store = self.store.clone();
        let processor = Arc::clone(&self.processor);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let error = Error::Internal(format!("dispatch closed: {}", e));
                    mark_failed(&store, &job_id, &error).await;
                    return;
                }
            };

            let worker = tokio::spawn({
                let store = store.clone();
                let job_id = job_id.clone();
                async move { processor.process(store, job_id).await }
            });

            let error = match worker.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(join) => Error::Internal(format!("job task aborted: {}", join)),
            };
            tracing::error!(job_id = %job_id, error = %error, "job processing failed");
            mark_failed(&store, &job_id, &error).await;
        });
    }
}

async fn mark_failed(store: &JobStore, job_id: &str, error: &Error) {
    store
        .update(job_id, |job| {
            if !job.status.is_terminal() {
                job.fail(error);
            }
        })
        .await;
}
