use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use super::{ExecutionRequest, ExecutionResult, SandboxRunner};

const READ_CHUNK: usize = 8192;

/// Runs each step as a plain child process.
///
/// Isolation is limited to a private working directory, a wall-clock timeout
/// and an output ceiling. There is no memory accounting and no filesystem or
/// permission confinement.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SandboxRunner for ProcessExecutor {
    async fn execute(&self, request: ExecutionRequest<'_>) -> ExecutionResult {
        let Some((program, args)) = request.command.split_first() else {
            return ExecutionResult::fault("Empty command", 0);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so anything the step forked can be taken down with it
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::debug!("Failed to spawn `{program}`: {e}");
                return ExecutionResult::fault(format!("Failed to spawn `{program}`: {e}"), 0);
            }
        };
        let pid = child.id();

        feed_stdin(&mut child, request.stdin);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let budget = OutputBudget::new(request.output_limit);

        let outcome = tokio::time::timeout(request.timeout, async {
            let (out, err) = tokio::try_join!(capture(stdout, &budget), capture(stderr, &budget))?;
            let status = child.wait().await.map_err(CaptureError::Io)?;
            Ok::<_, CaptureError>((status, out, err))
        })
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok((status, out, err))) => {
                // Background processes outlive the step unless the group is killed
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                classify(status, &out, &err, elapsed_ms, request.fail_on_stderr)
            }
            Ok(Err(CaptureError::OutputLimit)) => {
                terminate(&mut child, pid).await;
                log::debug!(
                    "`{program}` killed after exceeding {} output bytes",
                    request.output_limit
                );
                ExecutionResult::fault(
                    format!("Output limit of {} bytes exceeded", request.output_limit),
                    elapsed_ms,
                )
            }
            Ok(Err(CaptureError::Io(e))) => {
                terminate(&mut child, pid).await;
                ExecutionResult::fault(format!("Failed to collect process output: {e}"), elapsed_ms)
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                log::debug!(
                    "`{program}` killed after {} ms time limit",
                    request.timeout.as_millis()
                );
                ExecutionResult::time_limit(elapsed_ms)
            }
        }
    }
}

/// Writes the input on a separate task and closes the pipe afterwards.
///
/// A program that never reads would otherwise block the writer once the pipe
/// buffer fills, while the program itself waits on its full stdout.
fn feed_stdin(child: &mut Child, input: &str) {
    let Some(mut pipe) = child.stdin.take() else {
        return;
    };
    let input = input.as_bytes().to_vec();

    tokio::spawn(async move {
        if let Err(e) = pipe.write_all(&input).await {
            // The program may exit without consuming its input
            log::debug!("Stopped writing stdin: {e}");
        }
    });
}

enum CaptureError {
    OutputLimit,
    Io(std::io::Error),
}

/// Byte allowance shared by stdout and stderr
struct OutputBudget {
    limit: u64,
    used: AtomicU64,
}

impl OutputBudget {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    fn consume(&self, bytes: usize) -> Result<(), CaptureError> {
        let bytes = bytes as u64;
        let used = self.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if used > self.limit {
            Err(CaptureError::OutputLimit)
        } else {
            Ok(())
        }
    }
}

async fn capture<R>(stream: Option<R>, budget: &OutputBudget) -> Result<Vec<u8>, CaptureError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(Vec::new());
    };

    let mut captured = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await.map_err(CaptureError::Io)?;
        if n == 0 {
            return Ok(captured);
        }
        budget.consume(n)?;
        captured.extend_from_slice(&chunk[..n]);
    }
}

fn classify(
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
    elapsed_ms: u64,
    fail_on_stderr: bool,
) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr).into_owned();

    let clean_stderr = !fail_on_stderr || stderr.trim().is_empty();
    if status.success() && clean_stderr {
        return ExecutionResult {
            stderr,
            ..ExecutionResult::completed(stdout, elapsed_ms)
        };
    }

    let message = if stderr.trim().is_empty() {
        describe_exit(status)
    } else {
        stderr
    };
    ExecutionResult {
        stdout,
        ..ExecutionResult::fault(message, elapsed_ms)
    }
}

fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {signal}");
        }
    }

    match status.code() {
        Some(code) => format!("Process exited with code {code}"),
        None => "Process exited abnormally".to_string(),
    }
}

/// Kills the step and everything in its process group, then reaps it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    if let Err(e) = child.start_kill() {
        log::debug!("Kill signal not delivered: {e}");
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap terminated process: {e}");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: kill(2) with a negative pid signals the group created at spawn;
    // it touches no memory owned by this process.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        // ESRCH when nothing in the group is left
        log::debug!(
            "Failed to signal process group {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_shared_and_inclusive() {
        let budget = OutputBudget::new(10);
        assert!(budget.consume(6).is_ok());
        assert!(budget.consume(4).is_ok());
        assert!(matches!(budget.consume(1), Err(CaptureError::OutputLimit)));
    }

    #[cfg(unix)]
    #[test]
    fn exit_descriptions() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait statuses: exit code in the high byte, signal in the low bits
        assert_eq!(
            describe_exit(ExitStatus::from_raw(3 << 8)),
            "Process exited with code 3"
        );
        assert_eq!(
            describe_exit(ExitStatus::from_raw(9)),
            "Process terminated by signal 9"
        );
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_keeps_stderr_as_diagnostic() {
        use std::os::unix::process::ExitStatusExt;

        let result = classify(ExitStatus::from_raw(1 << 8), b"partial", b"boom\n", 5, false);
        assert_eq!(result.status, crate::sandbox::ExecutionStatus::RuntimeError);
        assert_eq!(result.stderr, "boom\n");
        assert_eq!(result.stdout, "partial");

        let result = classify(ExitStatus::from_raw(0), b"ok\n", b"warning\n", 5, false);
        assert!(result.is_completed());
        assert_eq!(result.stdout, "ok\n");
        assert_eq!(result.stderr, "warning\n");
    }

    #[cfg(unix)]
    #[test]
    fn stderr_fails_a_clean_exit_when_asked() {
        use std::os::unix::process::ExitStatusExt;

        let result = classify(ExitStatus::from_raw(0), b"ok\n", b"warning\n", 5, true);
        assert_eq!(result.status, crate::sandbox::ExecutionStatus::RuntimeError);
        assert_eq!(result.stderr, "warning\n");

        let result = classify(ExitStatus::from_raw(0), b"ok\n", b" \n", 5, true);
        assert!(result.is_completed());
    }
}
