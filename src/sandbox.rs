mod executor;
mod runner;

pub use executor::ProcessExecutor;
pub use runner::{ExecutionRequest, SandboxRunner};

use serde::Serialize;

/// How a single compile or run step ended
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimeLimit,
    RuntimeError,
}

/// Result of one process launch
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    /// Captured error stream, or a description of the fault when the process
    /// produced none
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn completed(stdout: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            stdout: stdout.into(),
            stderr: String::new(),
            elapsed_ms,
        }
    }

    pub fn time_limit(elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::TimeLimit,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms,
        }
    }

    pub fn fault(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::RuntimeError,
            stdout: String::new(),
            stderr: message.into(),
            elapsed_ms,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
