//! Job records and submission payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::SandboxConnection;

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Pending -> Running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// A turn cap or deadline was hit before the model finished.
    TimedOut,
}

impl JobStatus {
    /// Returns true once no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        write!(f, "{}", s)
    }
}

/// Incoming job submission as received over HTTP.
///
/// Fields are optional so that validation can report every missing field at
/// once instead of failing at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_id: Option<String>,
    pub repo_url: Option<String>,
    pub repo_slug: Option<String>,
    pub branch: Option<String>,
    #[serde(alias = "task")]
    pub task_description: Option<String>,
    #[serde(alias = "commit")]
    pub commit_hash: Option<String>,
    pub test_command: Option<String>,
}

/// A submission whose required fields are present and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub job_id: String,
    pub repo_url: Option<String>,
    pub repo_slug: Option<String>,
    pub branch: String,
    pub task_description: String,
    pub commit_hash: Option<String>,
    pub test_command: Option<String>,
}

/// Trims a value, treating blank strings as absent.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SubmitJobRequest {
    /// Trimmed job id, if present.
    pub fn trimmed_job_id(&self) -> Option<String> {
        non_blank(self.job_id.as_deref())
    }

    /// Checks required fields, naming all that are missing.
    pub fn validate(&self) -> Result<ValidatedSubmission> {
        let job_id = self.trimmed_job_id();
        let repo_url = non_blank(self.repo_url.as_deref());
        let repo_slug = non_blank(self.repo_slug.as_deref());
        let branch = non_blank(self.branch.as_deref());
        let task_description = non_blank(self.task_description.as_deref());

        let mut missing = Vec::new();
        if job_id.is_none() {
            missing.push("jobId");
        }
        if repo_url.is_none() && repo_slug.is_none() {
            missing.push("repoUrl or repoSlug");
        }
        if branch.is_none() {
            missing.push("branch");
        }
        if task_description.is_none() {
            missing.push("taskDescription");
        }

        match (job_id, branch, task_description) {
            (Some(job_id), Some(branch), Some(task_description)) if missing.is_empty() => {
                Ok(ValidatedSubmission {
                    job_id,
                    repo_url,
                    repo_slug,
                    branch,
                    task_description,
                    commit_hash: non_blank(self.commit_hash.as_deref()),
                    test_command: non_blank(self.test_command.as_deref()),
                })
            }
            _ => Err(Error::Validation(format!(
                "{} required",
                missing.join(", ")
            ))),
        }
    }
}

/// One requested coding task and everything learned while running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_slug: Option<String>,
    pub branch: String,
    pub task_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub patch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConnection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a PENDING job from a validated submission.
    pub fn new(submission: ValidatedSubmission) -> Self {
        let now = Utc::now();
        Self {
            job_id: submission.job_id,
            repo_url: submission.repo_url,
            repo_slug: submission.repo_slug,
            branch: submission.branch,
            task_description: submission.task_description,
            commit_hash: submission.commit_hash,
            test_command: submission.test_command,
            status: JobStatus::Pending,
            summary: None,
            changed_files: Vec::new(),
            patch: String::new(),
            error: None,
            logs: Vec::new(),
            sandbox_path: None,
            sandbox: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The URL to clone: `repoUrl` when given, otherwise the slug under `git_base_url`.
    pub fn clone_url(&self, git_base_url: &str) -> Option<String> {
        if let Some(url) = &self.repo_url {
            return Some(url.clone());
        }
        self.repo_slug.as_ref().map(|slug| {
            format!(
                "{}/{}.git",
                git_base_url.trim_end_matches('/'),
                slug.trim_matches('/')
            )
        })
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.job_id,
                from = %self.status,
                to = %next,
                "ignoring non-monotonic status transition"
            );
            return false;
        }
        self.status = next;
        self.touch();
        true
    }

    /// Appends a trace line to the job log.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        self.touch();
    }

    /// Marks the job terminal because of `error`.
    pub fn fail(&mut self, error: &Error) {
        let status = if error.is_timeout() {
            JobStatus::TimedOut
        } else {
            JobStatus::Failed
        };
        let message = error.to_string();
        if self.transition(status) {
            self.error = Some(message.clone());
            self.log(format!("job {}: {}", status, message));
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
