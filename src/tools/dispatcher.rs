//! Executes tool calls against the repository root.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::{Error, Result};

use super::confine::resolve_confined;
use super::{ToolCall, ToolResult, READ_FILE, RUN_SHELL, WRITE_FILE};

/// Largest number of bytes kept from each of stdout and stderr.
const MAX_STREAM_BYTES: usize = 64 * 1024;

/// Runs model-requested tools confined to one repository.
///
/// Only confinement violations come back as `Err`; every other failure is
/// turned into an `{"error": ...}` result the model can react to.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    root: PathBuf,
    canonical_root: PathBuf,
    shell_timeout: Duration,
}

impl ToolDispatcher {
    /// Creates a dispatcher for the repository at `root`.
    pub async fn new(root: &Path, shell_timeout: Duration) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        let canonical_root = tokio::fs::canonicalize(&root).await?;
        Ok(Self {
            root,
            canonical_root,
            shell_timeout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dispatches one call.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult> {
        let outcome = match call.name.as_str() {
            RUN_SHELL => self.run_shell(call).await,
            READ_FILE => self.read_file(call).await,
            WRITE_FILE => self.write_file(call).await,
            other => Err(Error::Tool(format!("unknown tool: {}", other))),
        };

        match outcome {
            Ok(output) => Ok(ToolResult::ok(call, output)),
            Err(e @ Error::Security { .. }) => {
                tracing::warn!(tool = %call.name, error = %e, "blocked tool call");
                Err(e)
            }
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool call failed");
                Ok(ToolResult::error(call, tool_message(e)))
            }
        }
    }

    async fn resolve(&self, requested: Option<&str>, what: &str) -> Result<PathBuf> {
        let requested = requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Tool(format!("{} is required", what)))?;
        resolve_confined(&self.root, &self.canonical_root, requested).await
    }

    async fn run_shell(&self, call: &ToolCall) -> Result<Value> {
        let argv = command_vector(call.arguments.get("command"))?;
        let cwd = match call.str_arg("cwd").map(str::trim).filter(|c| !c.is_empty()) {
            Some(cwd) => self.resolve(Some(cwd), "cwd").await?,
            None => self.root.clone(),
        };

        tracing::info!(command = ?argv, cwd = ?cwd, "running tool command");

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.shell_timeout, command.output())
            .await
            .map_err(|_| {
                Error::Tool(format!(
                    "command timed out after {} seconds",
                    self.shell_timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Tool(format!("failed to start {}: {}", argv[0], e)))?;

        Ok(json!({
            "stdout": truncate_stream(&output.stdout),
            "stderr": truncate_stream(&output.stderr),
            "exitCode": output.status.code(),
        }))
    }

    async fn read_file(&self, call: &ToolCall) -> Result<Value> {
        let path = self.resolve(call.str_arg("path"), "path").await?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(json!({ "content": content }))
    }

    async fn write_file(&self, call: &ToolCall) -> Result<Value> {
        let path = self.resolve(call.str_arg("path"), "path").await?;
        let content = call.str_arg("content").unwrap_or_default();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        tracing::debug!(path = ?path, bytes = content.len(), "wrote file");
        Ok(json!({ "status": "ok" }))
    }
}

/// Extracts the non-empty argument vector of a `run_shell` call.
fn command_vector(raw: Option<&Value>) -> Result<Vec<String>> {
    let parts = raw
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Tool("command is required for run_shell".to_string()))?;

    let argv = parts
        .iter()
        .map(|part| {
            part.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| Error::Tool("command elements must be strings".to_string()))
        })
        .collect::<Result<Vec<String>>>()?;

    match argv.first() {
        Some(program) if !program.is_empty() => Ok(argv),
        _ => Err(Error::Tool("command is required for run_shell".to_string())),
    }
}

fn truncate_stream(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_STREAM_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_STREAM_BYTES]).into_owned();
    text.push_str(&format!(
        "\n[truncated {} bytes]",
        bytes.len() - MAX_STREAM_BYTES
    ));
    text
}

/// Message reported to the model for a failed tool call.
fn tool_message(error: Error) -> String {
    match error {
        Error::Tool(msg) => msg,
        other => other.to_string(),
    }
}
