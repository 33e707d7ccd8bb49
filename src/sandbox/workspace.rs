//! Per-job workspace directories holding a shallow repository clone.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::job::Job;

/// Name of the clone directory inside a workspace.
pub const REPO_DIR: &str = "repo";

/// An ephemeral directory owned by one job.
///
/// Call [`Workspace::cleanup`] when processing ends. If a workspace is dropped
/// without cleanup, the directory is removed synchronously on drop.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    cleaned_up: bool,
}

impl Workspace {
    /// Returns the workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where the repository is (or will be) cloned.
    pub fn repo_path(&self) -> PathBuf {
        self.root.join(REPO_DIR)
    }

    /// Removes the workspace. Failures are logged and swallowed so they never
    /// mask the job outcome. Later calls are no-ops.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => tracing::debug!(path = ?self.root, "removed workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(error = %e, path = ?self.root, "failed to remove workspace");
            }
        }
    }

    /// Whether cleanup has already run.
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(error = %e, path = ?self.root, "failed to cleanup workspace on drop");
                }
            }
        }
    }
}

/// Creates workspaces and clones repositories into them.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Parent directory for workspaces. If None, uses the system temp directory.
    base_dir: Option<PathBuf>,
    /// Base URL used to resolve a repository slug into a clone URL.
    git_base_url: String,
    clone_timeout: Duration,
}

impl WorkspaceManager {
    pub fn new(base_dir: Option<PathBuf>, git_base_url: impl Into<String>) -> Self {
        Self {
            base_dir,
            git_base_url: git_base_url.into(),
            clone_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the upper bound for clone and checkout.
    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    /// Creates a uniquely named directory for `job`.
    pub async fn prepare(&self, job: &Job) -> Result<Workspace> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };
        tokio::fs::create_dir_all(&base).await?;

        let short_uuid = &uuid::Uuid::new_v4().simple().to_string()[..8];
        let root = base.join(format!(
            "ai-hub-{}-{}",
            sanitize_for_path(&job.job_id),
            short_uuid
        ));
        tokio::fs::create_dir(&root).await?;

        tracing::info!(job_id = %job.job_id, path = ?root, "created workspace");

        Ok(Workspace {
            root,
            cleaned_up: false,
        })
    }

    /// Shallow-clones the job's branch into `<workspace>/repo`, then checks out
    /// the requested commit if there is one.
    pub async fn clone(&self, job: &Job, workspace: &Workspace) -> Result<PathBuf> {
        let url = job.clone_url(&self.git_base_url).ok_or_else(|| {
            Error::SourceControl(format!("job {} has no repository reference", job.job_id))
        })?;
        let repo_path = workspace.repo_path();

        let mut clone = git_command();
        clone
            .args(["clone", "--branch", &job.branch, "--depth", "1", &url])
            .arg(&repo_path);
        self.run_git(clone, "git clone").await?;

        if let Some(commit) = &job.commit_hash {
            self.checkout(&repo_path, commit).await?;
        }

        tracing::info!(
            job_id = %job.job_id,
            branch = %job.branch,
            path = ?repo_path,
            "cloned repository"
        );

        Ok(repo_path)
    }

    /// Removes the workspace; see [`Workspace::cleanup`].
    pub async fn cleanup(&self, workspace: &mut Workspace) {
        workspace.cleanup().await;
    }

    async fn checkout(&self, repo_path: &Path, commit: &str) -> Result<()> {
        let mut checkout = git_command();
        checkout.current_dir(repo_path).args(["checkout", commit]);
        if self.run_git(checkout, "git checkout").await.is_ok() {
            return Ok(());
        }

        // The commit is outside the shallow history; fetch it explicitly.
        tracing::debug!(commit = %commit, "commit not in shallow clone, fetching");
        let mut fetch = git_command();
        fetch
            .current_dir(repo_path)
            .args(["fetch", "--depth", "1", "origin", commit]);
        self.run_git(fetch, "git fetch").await?;

        let mut checkout = git_command();
        checkout.current_dir(repo_path).args(["checkout", commit]);
        self.run_git(checkout, "git checkout").await?;
        Ok(())
    }

    async fn run_git(&self, mut command: Command, what: &str) -> Result<Output> {
        command.kill_on_drop(true);
        let output = tokio::time::timeout(self.clone_timeout, command.output())
            .await
            .map_err(|_| {
                Error::Timeout(format!("{} exceeded {:?}", what, self.clone_timeout))
            })?
            .map_err(|e| Error::SourceControl(format!("failed to run {}: {}", what, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SourceControl(format!(
                "{} failed: {}",
                what,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// A `git` invocation that fails instead of prompting for credentials.
fn git_command() -> Command {
    let mut command = Command::new("git");
    command
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(std::process::Stdio::null());
    command
}

/// Replaces anything but alphanumerics, `-` and `_` with `-`.
fn sanitize_for_path(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SubmitJobRequest;
    use crate::test_support::{create_temp_git_repo, git};
    use std::ffi::OsStr;
    use tempfile::TempDir;

    fn head_of(repo: &Path) -> String {
        let output = std::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Origin with two commits on `main`; returns it with the first commit's id.
    fn origin_with_two_commits() -> (TempDir, String) {
        let origin = create_temp_git_repo();
        let first = head_of(origin.path());
        std::fs::write(origin.path().join("README.md"), "# Second\n").unwrap();
        git(origin.path(), &["commit", "-am", "Second commit"]);
        (origin, first)
    }

    fn job_for(repo_url: &str, branch: &str, commit: Option<&str>) -> Job {
        let request = SubmitJobRequest {
            job_id: Some("job/1".to_string()),
            repo_url: Some(repo_url.to_string()),
            branch: Some(branch.to_string()),
            task_description: Some("noop".to_string()),
            commit_hash: commit.map(str::to_string),
            ..Default::default()
        };
        Job::new(request.validate().unwrap())
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_for_path("job/1 x"), "job-1-x");
        assert_eq!(sanitize_for_path("ok_id-2"), "ok_id-2");
    }

    #[tokio::test]
    async fn prepare_creates_unique_directories() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for("unused", "main", None);

        let mut first = manager.prepare(&job).await.unwrap();
        let mut second = manager.prepare(&job).await.unwrap();

        assert_ne!(first.root(), second.root());
        assert!(first.root().is_dir());
        let name = first.root().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ai-hub-job-1-"));

        first.cleanup().await;
        second.cleanup().await;
    }

    #[tokio::test]
    async fn clone_checks_out_branch_into_repo_dir() {
        let origin = create_temp_git_repo();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for(&origin.path().display().to_string(), "main", None);

        let mut workspace = manager.prepare(&job).await.unwrap();
        let repo = manager.clone(&job, &workspace).await.unwrap();

        assert_eq!(repo, workspace.root().join("repo"));
        assert!(repo.join("README.md").exists());
        assert!(repo.join(".git").exists());

        manager.cleanup(&mut workspace).await;
    }

    #[tokio::test]
    async fn clone_of_missing_branch_is_source_control_error() {
        let origin = create_temp_git_repo();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for(&origin.path().display().to_string(), "does-not-exist", None);

        let mut workspace = manager.prepare(&job).await.unwrap();
        let err = manager.clone(&job, &workspace).await.unwrap_err();

        assert!(matches!(err, Error::SourceControl(_)));
        workspace.cleanup().await;
    }

    #[tokio::test]
    async fn checkout_of_unknown_commit_fails() {
        let origin = create_temp_git_repo();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for(
            &origin.path().display().to_string(),
            "main",
            Some("0000000000000000000000000000000000000000"),
        );

        let mut workspace = manager.prepare(&job).await.unwrap();
        let err = manager.clone(&job, &workspace).await.unwrap_err();

        assert!(matches!(err, Error::SourceControl(_)));
        workspace.cleanup().await;
    }

    #[tokio::test]
    async fn clone_checks_out_requested_commit() {
        let (origin, first) = origin_with_two_commits();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for(&origin.path().display().to_string(), "main", Some(&first));

        let mut workspace = manager.prepare(&job).await.unwrap();
        let repo = manager.clone(&job, &workspace).await.unwrap();

        assert_eq!(head_of(&repo), first);
        assert_eq!(
            std::fs::read_to_string(repo.join("README.md")).unwrap(),
            "# Test Repo\n"
        );
        workspace.cleanup().await;
    }

    #[tokio::test]
    async fn commit_outside_shallow_history_is_fetched() {
        let (origin, first) = origin_with_two_commits();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let url = format!("file://{}", origin.path().display());
        let job = job_for(&url, "main", Some(&first));

        let mut workspace = manager.prepare(&job).await.unwrap();
        let repo = manager.clone(&job, &workspace).await.unwrap();

        assert_eq!(head_of(&repo), first);
        assert_eq!(
            std::fs::read_to_string(repo.join("README.md")).unwrap(),
            "# Test Repo\n"
        );
        workspace.cleanup().await;
    }

    #[tokio::test]
    async fn clone_past_its_deadline_is_a_timeout() {
        let origin = create_temp_git_repo();
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com")
            .with_clone_timeout(Duration::ZERO);
        let job = job_for(&origin.path().display().to_string(), "main", None);

        let mut workspace = manager.prepare(&job).await.unwrap();
        let err = manager.clone(&job, &workspace).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("git clone exceeded"));
        workspace.cleanup().await;
    }

    #[test]
    fn git_never_prompts_for_credentials() {
        let command = git_command();
        let prompt = command
            .as_std()
            .get_envs()
            .find(|(key, _)| *key == OsStr::new("GIT_TERMINAL_PROMPT"))
            .and_then(|(_, value)| value);

        assert_eq!(prompt, Some(OsStr::new("0")));
    }

    #[tokio::test]
    async fn cleanup_removes_directory_and_is_idempotent() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for("unused", "main", None);

        let mut workspace = manager.prepare(&job).await.unwrap();
        let root = workspace.root().to_path_buf();
        tokio::fs::write(root.join("scratch.txt"), "x").await.unwrap();

        workspace.cleanup().await;
        workspace.cleanup().await;

        assert!(!root.exists());
        assert!(workspace.is_cleaned_up());
    }

    #[tokio::test]
    async fn dropped_workspace_is_removed() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(base.path().to_path_buf()), "https://github.com");
        let job = job_for("unused", "main", None);

        let workspace = manager.prepare(&job).await.unwrap();
        let root = workspace.root().to_path_buf();
        drop(workspace);

        assert!(!root.exists());
    }
}
