//! The agentic run-loop.
//!
//! Drives a conversation with a [`ReasoningService`], dispatching the tool
//! calls it asks for until a turn comes back with none. Tool calls from one
//! turn run sequentially in the order the service listed them.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::monitor::{LoopLimits, ProgressMonitor, ProgressSummary};
use crate::reasoning::{
    extract_text, extract_tool_calls, FollowUpRequest, InitialRequest, ModelResponse,
    ReasoningService, ToolOutput,
};
use crate::tools::{catalog, ToolCall, ToolDispatcher, ToolResult, READ_FILE, WRITE_FILE};

/// Sink for human-readable trace lines about a run.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, line: String);
}

/// Journal that keeps lines in memory.
#[derive(Default)]
pub struct MemoryJournal {
    lines: tokio::sync::Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, line: String) {
        self.lines.lock().await.push(line);
    }
}

/// What the loop is asked to do.
#[derive(Debug, Clone, Copy)]
pub struct AgentTask<'a> {
    pub task_description: &'a str,
    pub test_command: Option<&'a str>,
    pub repo_path: &'a Path,
}

/// Result of a loop that ran to completion.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Last non-empty text the service produced.
    pub summary: Option<String>,
    pub progress: ProgressSummary,
}

/// Runs tool-calling conversations against a reasoning service.
pub struct AgentLoop {
    service: Arc<dyn ReasoningService>,
    limits: LoopLimits,
    call_timeout: Duration,
}

impl AgentLoop {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self {
            service,
            limits: LoopLimits::default(),
            call_timeout: Duration::from_secs(300),
        }
    }

    /// Sets the turn cap and total time budget.
    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the bound on a single service call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Runs the loop until the service stops requesting tools.
    ///
    /// Service failures and confinement violations abort with an error;
    /// exceeding a bound aborts with [`Error::Timeout`].
    pub async fn run(
        &self,
        task: AgentTask<'_>,
        dispatcher: &ToolDispatcher,
        journal: &dyn Journal,
    ) -> Result<LoopOutcome> {
        let tools = catalog();
        let mut monitor = ProgressMonitor::new(self.limits);
        let mut summary: Option<String> = None;

        tracing::info!(
            service = %self.service.name(),
            repo = ?task.repo_path,
            "starting agent loop"
        );

        let initial = InitialRequest {
            instructions: system_instructions(task.repo_path, task.test_command),
            task: task.task_description.to_string(),
            tools: tools.clone(),
        };
        let mut response = self
            .call(&monitor, self.service.create_response(initial))
            .await?;
        monitor.record_turn();

        loop {
            if let Some(text) = extract_text(&response.output) {
                summary = Some(text);
            }
            let calls = extract_tool_calls(&response.output);

            journal
                .append(format!(
                    "turn {}: {} tool call(s)",
                    monitor.turns(),
                    calls.len()
                ))
                .await;

            if calls.is_empty() {
                tracing::info!(turns = monitor.turns(), "agent loop finished");
                return Ok(LoopOutcome {
                    summary,
                    progress: ProgressSummary::from(&monitor),
                });
            }

            let mut tool_outputs = Vec::with_capacity(calls.len());
            for call in &calls {
                tracing::debug!(turn = monitor.turns(), tool = %call.name, call_id = %call.id, "dispatching tool call");
                journal
                    .append(format!("tool {} ({})", call.name, call.id))
                    .await;
                let result = dispatcher.dispatch(call).await?;
                record_result(&mut monitor, call, &result);
                if let Some(error) = result.output.get("error").and_then(|e| e.as_str()) {
                    journal
                        .append(format!("tool {} failed: {}", call.name, error))
                        .await;
                }
                tool_outputs.push(ToolOutput {
                    call_id: result.call_id.clone(),
                    output: result.serialized(),
                });
            }

            if let Some(reason) = monitor.check_limits() {
                return Err(Error::Timeout(reason.to_string()));
            }

            let follow_up = FollowUpRequest {
                previous_response_id: response.id.clone(),
                tool_outputs,
                tools: tools.clone(),
            };
            response = self
                .call(
                    &monitor,
                    self.service.continue_with_tool_outputs(follow_up),
                )
                .await?;
            monitor.record_turn();
        }
    }

    /// Awaits one service call, bounded by the per-call timeout and whatever
    /// remains of the total budget.
    async fn call<F>(&self, monitor: &ProgressMonitor, request: F) -> Result<ModelResponse>
    where
        F: Future<Output = Result<ModelResponse>>,
    {
        let budget = self.call_timeout.min(monitor.remaining());
        match tokio::time::timeout(budget, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "reasoning service did not answer within {:?}",
                budget
            ))),
        }
    }
}

fn record_result(monitor: &mut ProgressMonitor, call: &ToolCall, result: &ToolResult) {
    let failed = result.is_error();
    monitor.record_tool_call(failed);
    if failed {
        return;
    }
    if let Some(path) = call.str_arg("path") {
        match call.name.as_str() {
            READ_FILE => monitor.record_file_read(path),
            WRITE_FILE => monitor.record_file_write(path),
            _ => {}
        }
    }
}

/// System instruction sent with the first turn.
pub fn system_instructions(repo_path: &Path, test_command: Option<&str>) -> String {
    format!(
        "You are operating in an isolated sandbox at {}. Use the tools to read and change files \
         and to run commands. Suggested test command: {}. Always work only inside the repository \
         directory.",
        repo_path.display(),
        test_command.unwrap_or("n/a")
    )
}
