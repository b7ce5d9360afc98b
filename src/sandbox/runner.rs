use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::ExecutionResult;

/// Everything needed to launch one step
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Program followed by its arguments
    pub command: &'a [String],
    pub working_dir: &'a Path,
    /// Written to the process and then closed; may be empty
    pub stdin: &'a str,
    pub timeout: Duration,
    /// Ceiling on stdout and stderr combined, in bytes
    pub output_limit: u64,
    /// Whether anything written to stderr fails a step that exited cleanly
    pub fail_on_stderr: bool,
}

/// Trait for the ways a compile or run step can be executed
///
/// Implementations never fail: every outcome, including the inability to
/// start the program, is classified into an [`ExecutionResult`].
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn execute(&self, request: ExecutionRequest<'_>) -> ExecutionResult;
}
