//! Progress monitoring for a job's run-loop.
//!
//! Tracks reasoning turns, tool calls and file activity, and detects when the
//! turn cap or the total wall-clock budget is exhausted.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Bounds enforced on one run-loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    /// Maximum reasoning-service turns.
    pub max_turns: u32,
    /// Maximum total wall-clock time.
    pub total_timeout: Duration,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_turns: 50,
            total_timeout: Duration::from_secs(3600),
        }
    }
}

/// Which bound was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    /// Turn cap reached.
    Turns(u32),
    /// Total time exceeded.
    Total(Duration),
}

impl std::fmt::Display for LimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turns(max) => write!(f, "turn limit of {} reached", max),
            Self::Total(limit) => write!(f, "run exceeded {:?}", limit),
        }
    }
}

/// Tracks progress of one run-loop.
pub struct ProgressMonitor {
    /// Reasoning-service round trips so far.
    turns: u32,
    /// Tool calls dispatched.
    tool_calls: usize,
    /// Tool calls that reported an error to the model.
    tool_errors: usize,
    /// Files successfully read, relative as requested.
    files_read: BTreeSet<String>,
    /// Files successfully written, relative as requested.
    files_written: BTreeSet<String>,
    /// Time when monitoring started.
    start_time: Instant,
    /// Bounds to enforce.
    limits: LoopLimits,
}

impl ProgressMonitor {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            turns: 0,
            tool_calls: 0,
            tool_errors: 0,
            files_read: BTreeSet::new(),
            files_written: BTreeSet::new(),
            start_time: Instant::now(),
            limits,
        }
    }

    /// Records one reasoning-service round trip.
    pub fn record_turn(&mut self) {
        self.turns += 1;
    }

    /// Records a dispatched tool call and whether it reported an error.
    pub fn record_tool_call(&mut self, failed: bool) {
        self.tool_calls += 1;
        if failed {
            self.tool_errors += 1;
        }
    }

    pub fn record_file_read(&mut self, path: impl Into<String>) {
        self.files_read.insert(path.into());
    }

    pub fn record_file_write(&mut self, path: impl Into<String>) {
        self.files_written.insert(path.into());
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    pub fn files_written(&self) -> &BTreeSet<String> {
        &self.files_written
    }

    pub fn total_duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time left before the total budget runs out.
    pub fn remaining(&self) -> Duration {
        self.limits.total_timeout.saturating_sub(self.total_duration())
    }

    /// Returns `Some(reason)` if another turn must not start.
    pub fn check_limits(&self) -> Option<LimitReason> {
        if self.turns >= self.limits.max_turns {
            Some(LimitReason::Turns(self.limits.max_turns))
        } else if self.total_duration() >= self.limits.total_timeout {
            Some(LimitReason::Total(self.limits.total_timeout))
        } else {
            None
        }
    }
}

/// Snapshot of a monitor taken when the loop ends.
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub turns: u32,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub files_read: Vec<String>,
    pub files_written: Vec<String>,
    pub total_duration_secs: f64,
}

impl From<&ProgressMonitor> for ProgressSummary {
    fn from(monitor: &ProgressMonitor) -> Self {
        Self {
            turns: monitor.turns,
            tool_calls: monitor.tool_calls,
            tool_errors: monitor.tool_errors,
            files_read: monitor.files_read.iter().cloned().collect(),
            files_written: monitor.files_written.iter().cloned().collect(),
            total_duration_secs: monitor.total_duration().as_secs_f64(),
        }
    }
}
