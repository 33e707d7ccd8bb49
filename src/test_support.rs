//! Fixtures shared by unit tests.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::reasoning::{FollowUpRequest, InitialRequest, ModelResponse, ReasoningService};

/// Runs git in `dir`, panicking on failure.
pub(crate) fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Helper to create a temp git repo with one commit on `main`.
pub(crate) fn create_temp_git_repo() -> TempDir {
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    git(temp_dir.path(), &["init"]);
    git(temp_dir.path(), &["config", "user.email", "test@test.com"]);
    git(temp_dir.path(), &["config", "user.name", "Test User"]);

    std::fs::write(temp_dir.path().join("README.md"), "# Test Repo\n")
        .expect("failed to write README");

    git(temp_dir.path(), &["add", "."]);
    git(temp_dir.path(), &["commit", "-m", "Initial commit"]);
    git(temp_dir.path(), &["branch", "-M", "main"]);

    temp_dir
}

/// Reasoning service that sleeps for `delay` before failing.
pub(crate) struct StalledReasoning {
    pub(crate) delay: Duration,
}

#[async_trait]
impl ReasoningService for StalledReasoning {
    async fn create_response(&self, _request: InitialRequest) -> Result<ModelResponse> {
        tokio::time::sleep(self.delay).await;
        Err(Error::ExternalService("stalled".to_string()))
    }

    async fn continue_with_tool_outputs(&self, _request: FollowUpRequest) -> Result<ModelResponse> {
        tokio::time::sleep(self.delay).await;
        Err(Error::ExternalService("stalled".to_string()))
    }

    fn name(&self) -> &str {
        "stalled"
    }
}
