#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use codejudge::sandbox::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, ProcessExecutor, SandboxRunner,
};

const MB: u64 = 1024 * 1024;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

async fn run(
    command: &[String],
    dir: &Path,
    stdin: &str,
    timeout_ms: u64,
    output_limit: u64,
) -> ExecutionResult {
    ProcessExecutor::new()
        .execute(ExecutionRequest {
            command,
            working_dir: dir,
            stdin,
            timeout: Duration::from_millis(timeout_ms),
            output_limit,
            fail_on_stderr: false,
        })
        .await
}

/// Whether `pid` exists and is not a zombie waiting to be reaped
fn is_running(pid: libc::pid_t) -> bool {
    // Signal 0 only checks for existence
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

#[tokio::test]
async fn echoes_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&sh("cat"), dir.path(), "121\nabc\n", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "121\nabc\n");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn empty_stdin_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    // `cat` only terminates once its input reaches end of file
    let result = run(&sh("cat; echo done"), dir.path(), "", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "done\n");
}

#[tokio::test]
async fn large_input_is_not_a_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let input = "x".repeat(1024 * 1024);
    let result = run(&sh("wc -c"), dir.path(), &input, 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout.trim(), "1048576");
}

#[tokio::test]
async fn runs_inside_the_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

    let result = run(&sh("cat marker.txt"), dir.path(), "", 5000, MB).await;
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "here");
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let start = Instant::now();
    let result = run(&sh("sleep 10"), dir.path(), "", 200, MB).await;

    assert_eq!(result.status, ExecutionStatus::TimeLimit);
    assert!(result.elapsed_ms >= 200);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn timeout_takes_down_forked_children() {
    let dir = tempfile::tempdir().unwrap();
    let start = Instant::now();
    // The background sleep keeps stdout open; only a group kill ends it
    let result = run(&sh("sleep 10 & sleep 10"), dir.path(), "", 200, MB).await;

    assert_eq!(result.status, ExecutionStatus::TimeLimit);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn background_processes_do_not_outlive_the_step() {
    let dir = tempfile::tempdir().unwrap();
    // Detached from the pipes, so the step itself finishes normally
    let script = "sleep 30 >/dev/null 2>&1 </dev/null & echo $! > bg.pid; echo ok";
    let result = run(&sh(script), dir.path(), "", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "ok\n");

    let pid: libc::pid_t = std::fs::read_to_string(dir.path().join("bg.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while is_running(pid) {
        assert!(Instant::now() < deadline, "background process {pid} survived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn nonzero_exit_is_a_runtime_error() {
    let dir = tempfile::tempdir().unwrap();

    let result = run(&sh("echo boom >&2; exit 3"), dir.path(), "", 5000, MB).await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stderr.trim(), "boom");

    let result = run(&sh("exit 4"), dir.path(), "", 5000, MB).await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stderr, "Process exited with code 4");
}

#[tokio::test]
async fn signal_death_is_described() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&sh("kill -9 $$"), dir.path(), "", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stderr, "Process terminated by signal 9");
}

#[tokio::test]
async fn stderr_on_success_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&sh("echo warning >&2; echo ok"), dir.path(), "", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "ok\n");
    assert_eq!(result.stderr, "warning\n");
}

#[tokio::test]
async fn stderr_on_success_can_be_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let command = sh("echo warning >&2; echo ok");
    let result = ProcessExecutor::new()
        .execute(ExecutionRequest {
            command: &command,
            working_dir: dir.path(),
            stdin: "",
            timeout: Duration::from_secs(5),
            output_limit: MB,
            fail_on_stderr: true,
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stderr, "warning\n");
}

#[tokio::test]
async fn output_ceiling_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let start = Instant::now();
    let result = run(&sh("yes"), dir.path(), "", 10_000, 64 * 1024).await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert!(result.stderr.starts_with("Output limit of 65536 bytes exceeded"));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn spawn_failure_is_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let command = vec!["definitely-not-a-real-binary-4711".to_string()];
    let result = run(&command, dir.path(), "", 5000, MB).await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert!(result.stderr.starts_with("Failed to spawn `definitely-not-a-real-binary-4711`"));

    let result = run(&[], dir.path(), "", 5000, MB).await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
}
