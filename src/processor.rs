//! Per-job pipeline: workspace, clone, run-loop, diff, cleanup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{AgentLoop, AgentTask, Journal};
use crate::diff;
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::monitor::{LoopLimits, ProgressSummary};
use crate::reasoning::ReasoningService;
use crate::registry::JobStore;
use crate::sandbox::{Workspace, WorkspaceManager};
use crate::tools::ToolDispatcher;

/// Runs one accepted job to a terminal status.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Processes `job_id`, recording progress in `store`.
    ///
    /// An `Err` means the job could not be brought to a terminal status; the
    /// caller marks it failed.
    async fn process(&self, store: JobStore, job_id: String) -> Result<()>;
}

/// Clones the repository into a fresh workspace and lets the reasoning
/// service work on it through the tool dispatcher.
pub struct SandboxJobProcessor {
    workspaces: WorkspaceManager,
    service: Option<Arc<dyn ReasoningService>>,
    limits: LoopLimits,
    call_timeout: Duration,
    shell_timeout: Duration,
}

/// What a successful pipeline produced.
struct PipelineOutput {
    summary: Option<String>,
    changed_files: Vec<String>,
    patch: String,
}

impl SandboxJobProcessor {
    /// `service` is `None` when no reasoning service is configured; jobs then
    /// fail before cloning.
    pub fn new(workspaces: WorkspaceManager, service: Option<Arc<dyn ReasoningService>>) -> Self {
        Self {
            workspaces,
            service,
            limits: LoopLimits::default(),
            call_timeout: Duration::from_secs(300),
            shell_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    async fn run_pipeline(
        &self,
        store: &JobStore,
        job: &Job,
        workspace: &Workspace,
    ) -> Result<PipelineOutput> {
        let journal = store.journal(job.job_id.clone());

        let service = self.service.clone().ok_or_else(|| {
            Error::ExternalService("reasoning service not configured".to_string())
        })?;

        journal
            .append(format!("cloning {} ({})", job.branch, describe_source(job)))
            .await;
        let repo_path = self.workspaces.clone(job, workspace).await?;
        journal.append("clone complete".to_string()).await;

        let dispatcher = ToolDispatcher::new(&repo_path, self.shell_timeout).await?;
        let agent = AgentLoop::new(service)
            .with_limits(self.limits)
            .with_call_timeout(self.call_timeout);
        let task = AgentTask {
            task_description: &job.task_description,
            test_command: job.test_command.as_deref(),
            repo_path: dispatcher.root(),
        };
        let outcome = agent.run(task, &dispatcher, &journal).await?;

        journal.append(finished_line(&outcome.progress)).await;

        let changed_files = diff::changed_files(&repo_path).await?;
        let patch = diff::patch(&repo_path).await?;

        Ok(PipelineOutput {
            summary: outcome.summary,
            changed_files,
            patch,
        })
    }
}

#[async_trait]
impl JobProcessor for SandboxJobProcessor {
    async fn process(&self, store: JobStore, job_id: String) -> Result<()> {
        let job = store
            .update(&job_id, |job| {
                job.transition(JobStatus::Running);
                job.log("job started");
                job.clone()
            })
            .await
            .ok_or_else(|| Error::NotFound(job_id.clone()))?;

        tracing::info!(job_id = %job_id, "processing job");

        let mut workspace = match self.workspaces.prepare(&job).await {
            Ok(workspace) => workspace,
            Err(e) => {
                record_failure(&store, &job_id, &e).await;
                return Ok(());
            }
        };
        let sandbox_path = workspace.root().display().to_string();
        store
            .update(&job_id, |job| {
                job.sandbox_path = Some(sandbox_path.clone());
                job.log(format!("workspace ready at {}", sandbox_path));
            })
            .await;

        let result = self.run_pipeline(&store, &job, &workspace).await;
        self.workspaces.cleanup(&mut workspace).await;

        match result {
            Ok(output) => {
                store
                    .update(&job_id, |job| {
                        job.summary = output.summary;
                        job.changed_files = output.changed_files;
                        job.patch = output.patch;
                        job.transition(JobStatus::Completed);
                        job.log(format!("job completed, {} file(s) changed", job.changed_files.len()));
                    })
                    .await;
                tracing::info!(job_id = %job_id, "job completed");
            }
            Err(e) => record_failure(&store, &job_id, &e).await,
        }
        Ok(())
    }
}

async fn record_failure(store: &JobStore, job_id: &str, error: &Error) {
    if error.is_timeout() {
        tracing::warn!(job_id = %job_id, error = %error, "job timed out");
    } else {
        tracing::error!(job_id = %job_id, error = %error, "job failed");
    }
    store.update(job_id, |job| job.fail(error)).await;
}

/// Log line summarizing a finished run-loop.
fn finished_line(progress: &ProgressSummary) -> String {
    let list = |files: &[String]| {
        if files.is_empty() {
            "none".to_string()
        } else {
            files.join(", ")
        }
    };
    format!(
        "agent finished after {} turn(s) and {} tool call(s) ({} failed); read: {}; wrote: {}",
        progress.turns,
        progress.tool_calls,
        progress.tool_errors,
        list(&progress.files_read),
        list(&progress.files_written)
    )
}

fn describe_source(job: &Job) -> String {
    match (&job.repo_url, &job.repo_slug) {
        (Some(url), _) => url.clone(),
        (None, Some(slug)) => slug.clone(),
        (None, None) => "no repository".to_string(),
    }
}
