use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::comparator::{Comparison, compare, normalize};
use crate::error::Result;
use crate::language::Language;
use crate::model::{SubmissionStatus, Verdict};
use crate::sandbox::{ExecutionRequest, ExecutionStatus, SandboxRunner};
use crate::workspace::{Workspace, WorkspaceManager};

use super::{JudgeRequest, JudgingStrategy};

const COMPILE_TIMEOUT_MS: u64 = 10_000;
const COMPILE_OUTPUT_LIMIT: u64 = 16 * 1024 * 1024;
const DEFAULT_TIME_LIMIT_MS: u64 = 2000;
const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
const PREVIEW_CHARS: usize = 50;

/// Limits applied to compile and run steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    /// Fixed, regardless of the problem's own limits
    pub compile_timeout: Duration,
    pub compile_output_limit: u64,
    /// Used when a problem has no time limit set
    pub default_time_limit_ms: u64,
    /// Used when a problem has no memory limit set
    pub default_memory_limit_mb: u64,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_millis(COMPILE_TIMEOUT_MS),
            compile_output_limit: COMPILE_OUTPUT_LIMIT,
            default_time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            default_memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

/// Compiles the submission, then runs it against every test case in order,
/// stopping at the first case that does not pass.
pub struct TraditionalStrategy {
    workspaces: WorkspaceManager,
    runner: Arc<dyn SandboxRunner>,
    limits: StepLimits,
}

impl TraditionalStrategy {
    pub fn new(workspaces: WorkspaceManager, runner: Arc<dyn SandboxRunner>) -> Self {
        Self {
            workspaces,
            runner,
            limits: StepLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: StepLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn judge_in_workspace(
        &self,
        workspace: &Workspace,
        language: Language,
        request: &JudgeRequest,
    ) -> Verdict {
        let total = request.total_cases();
        let profile = language.profile();

        let source = match workspace.write_source(&language.source_file_name(), &request.code) {
            Ok(path) => path,
            Err(e) => {
                log::error!("Failed to write code for submission {}: {e}", request.submission_id);
                return Verdict::internal_error(total, "Failed to write code file");
            }
        };

        if let Some(command) = profile.compile_command(&source) {
            if let Some(failure) = self.compile(&command, workspace.path(), total).await {
                return failure;
            }
        }

        let run_command = profile.run_command(&source);
        self.run_test_cases(&run_command, workspace.path(), request)
            .await
    }

    /// Runs the compile step; returns a verdict only when compilation failed
    async fn compile(&self, command: &[String], dir: &Path, total: u32) -> Option<Verdict> {
        log::debug!("Compiling: {command:?}");
        let result = self
            .runner
            .execute(ExecutionRequest {
                command,
                working_dir: dir,
                stdin: "",
                timeout: self.limits.compile_timeout,
                output_limit: self.limits.compile_output_limit,
                // Compiler warnings do not fail a build
                fail_on_stderr: false,
            })
            .await;

        let message = match result.status {
            ExecutionStatus::Completed => {
                log::debug!("Compilation successful in {} ms", result.elapsed_ms);
                return None;
            }
            ExecutionStatus::TimeLimit => format!(
                "Compilation timed out after {} ms",
                self.limits.compile_timeout.as_millis()
            ),
            ExecutionStatus::RuntimeError if result.stderr.trim().is_empty() => {
                "Compilation error".to_string()
            }
            ExecutionStatus::RuntimeError => result.stderr,
        };

        log::debug!("Compilation failed: {message}");
        Some(Verdict::failed(
            SubmissionStatus::CompileError,
            0,
            total,
            0,
            message,
        ))
    }

    async fn run_test_cases(
        &self,
        command: &[String],
        dir: &Path,
        request: &JudgeRequest,
    ) -> Verdict {
        let total = request.total_cases();
        let problem = &request.problem;
        let time_limit = match problem.time_limit {
            0 => self.limits.default_time_limit_ms,
            ms => ms,
        };
        let memory_limit = match problem.memory_limit {
            0 => self.limits.default_memory_limit_mb,
            mb => mb,
        };
        let timeout = Duration::from_millis(time_limit);
        let output_limit = memory_limit.saturating_mul(1024 * 1024);

        let mut passed = 0;
        let mut total_time = 0;

        for (idx, case) in request.test_cases.iter().enumerate() {
            let number = idx + 1;
            log::debug!("Running test case {number}/{total}");

            let result = self
                .runner
                .execute(ExecutionRequest {
                    command,
                    working_dir: dir,
                    stdin: &case.input,
                    timeout,
                    output_limit,
                    fail_on_stderr: true,
                })
                .await;

            log::debug!(
                "Test case {number}: {:?} in {} ms",
                result.status,
                result.elapsed_ms
            );

            match result.status {
                ExecutionStatus::TimeLimit => {
                    return Verdict::failed(
                        SubmissionStatus::TimeLimit,
                        passed,
                        total,
                        total_time,
                        format!("Time Limit Exceeded on test case {number}"),
                    );
                }
                ExecutionStatus::RuntimeError => {
                    return Verdict::failed(
                        SubmissionStatus::RuntimeError,
                        passed,
                        total,
                        total_time,
                        format!(
                            "Runtime Error on test case {number}: {}",
                            result.stderr.trim()
                        ),
                    );
                }
                ExecutionStatus::Completed => {
                    if compare(&result.stdout, &case.expected_output) == Comparison::Failed {
                        log::debug!(
                            "Test case {number} mismatch, expected \"{}\", got \"{}\"",
                            preview(&normalize(&case.expected_output)),
                            preview(&normalize(&result.stdout))
                        );
                        return Verdict::failed(
                            SubmissionStatus::WrongAnswer,
                            passed,
                            total,
                            total_time,
                            format!("Wrong Answer on test case {number}"),
                        );
                    }
                    passed += 1;
                    total_time += result.elapsed_ms;
                }
            }
        }

        log::debug!("All {passed} test cases passed");
        Verdict::accepted(total, total_time)
    }
}

#[async_trait]
impl JudgingStrategy for TraditionalStrategy {
    fn name(&self) -> &'static str {
        "traditional"
    }

    async fn compute_verdict(&self, request: &JudgeRequest) -> Result<Verdict> {
        let total = request.total_cases();

        let language = match request.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                log::warn!("Submission {} rejected: {e}", request.submission_id);
                return Ok(Verdict::internal_error(total, e.to_string()));
            }
        };

        let workspace = match self.workspaces.provision(request.submission_id) {
            Ok(workspace) => workspace,
            Err(e) => {
                log::error!("Submission {}: {e}", request.submission_id);
                return Ok(Verdict::internal_error(total, "Failed to create workspace"));
            }
        };

        let verdict = self
            .judge_in_workspace(&workspace, language, request)
            .await;
        workspace.release();

        Ok(verdict)
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "é".repeat(50)));
        assert_eq!(preview(&"x".repeat(50)), "x".repeat(50));
    }

    #[test]
    fn default_limits() {
        let limits = StepLimits::default();
        assert_eq!(limits.compile_timeout, Duration::from_secs(10));
        assert_eq!(limits.default_time_limit_ms, 2000);
        assert_eq!(limits.default_memory_limit_mb, 256);
    }
}
