//! Extraction of changed files and a unified patch from a working tree.

use std::path::Path;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Lists paths changed in `repo`, in `git status` order.
///
/// Untracked files are listed individually. For renames and copies only the
/// destination is reported. Returns an empty list when `repo` is not a git
/// working tree.
pub async fn changed_files(repo: &Path) -> Result<Vec<String>> {
    if !is_repository(repo).await {
        return Ok(Vec::new());
    }

    let output = git(
        repo,
        &["status", "--porcelain", "-z", "--untracked-files=all"],
    )
    .await?;
    Ok(parse_porcelain_z(&output))
}

/// Produces a unified diff of the working tree against `HEAD`.
///
/// New files are marked intent-to-add first so they show up in the diff.
/// Returns an empty string when `repo` is not a git working tree or has no
/// commits yet.
pub async fn patch(repo: &Path) -> Result<String> {
    if !is_repository(repo).await {
        return Ok(String::new());
    }
    if !has_head(repo).await {
        tracing::debug!(repo = ?repo, "repository has no commits, skipping patch");
        return Ok(String::new());
    }

    git(repo, &["add", "--intent-to-add", "--all"]).await?;
    git(repo, &["diff", "HEAD"]).await
}

async fn is_repository(repo: &Path) -> bool {
    tokio::fs::try_exists(repo.join(".git"))
        .await
        .unwrap_or(false)
}

async fn has_head(repo: &Path) -> bool {
    Command::new("git")
        .current_dir(repo)
        .args(["rev-parse", "--verify", "--quiet", "HEAD"])
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

async fn git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::SourceControl(format!("failed to run git {}: {}", args[0], e)))?;

    if !output.status.success() {
        return Err(Error::SourceControl(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `git status --porcelain -z` records.
///
/// Each record is `XY <path>`; rename and copy records are followed by an
/// extra field holding the source path, which is skipped.
fn parse_porcelain_z(raw: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());

    while let Some(record) = fields.next() {
        if record.len() < 4 {
            continue;
        }
        let (status, path) = record.split_at(3);
        files.push(path.to_string());
        if status.contains('R') || status.contains('C') {
            fields.next();
        }
    }
    files
}
