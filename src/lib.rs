//! Sandbox Orchestrator - runs coding tasks against repositories in isolated
//! workspaces.
//!
//! A job names a repository, a branch and a task. The orchestrator clones the
//! repository into an ephemeral workspace, lets a reasoning service work on
//! it through a small set of confined tools, and records the resulting
//! changed files and patch on the job.

pub mod agent;
pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod job;
pub mod monitor;
pub mod processor;
pub mod reasoning;
pub mod registry;
pub mod sandbox;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use agent::{AgentLoop, AgentTask, Journal, LoopOutcome, MemoryJournal};
pub use api::{router, AppState};
pub use config::{OrchestratorConfig, Validate, ValidationResult};
pub use error::{Error, Result};
pub use job::{Job, JobStatus, SubmitJobRequest};
pub use monitor::{LoopLimits, ProgressMonitor, ProgressSummary};
pub use processor::{JobProcessor, SandboxJobProcessor};
pub use reasoning::{ReasoningService, ResponsesClient, ScriptedReasoning};
pub use registry::{JobRegistry, JobStore, SubmitOutcome};
pub use sandbox::{SandboxConnection, SandboxProvider, Workspace, WorkspaceManager};
pub use tools::{ToolCall, ToolDispatcher, ToolResult};
