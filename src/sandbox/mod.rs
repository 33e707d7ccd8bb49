//! Sandbox module for isolated job execution environments.
//!
//! This module provides the [`SandboxProvider`] that hands out cached,
//! TTL-bound sandbox connections and the [`WorkspaceManager`] that gives each
//! job its own directory with a shallow repository clone.

mod provider;
mod workspace;

pub use provider::{SandboxConnection, SandboxProvider};
pub use workspace::{Workspace, WorkspaceManager, REPO_DIR};
