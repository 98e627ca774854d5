//! Child process plumbing: captured one-shot commands and the streamed test run.

use crate::logbuf::LogStore;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub const STDERR_PREFIX: &str = "[stderr] ";

/// Exit code recorded when the process was killed by a signal (including our timeout).
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Exit code recorded when the process could not be started or waited on.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

/// Output still pending this long after exit is abandoned.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum CaptureError {
    Spawn(std::io::Error),
    TimedOut,
}

/// Run to completion collecting output. The child's whole process group is
/// killed if `timeout` elapses.
pub async fn run_captured(mut cmd: Command, timeout: Duration) -> Result<Output, CaptureError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut cmd);

    let child = cmd.spawn().map_err(CaptureError::Spawn)?;
    let pid = child.id();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(CaptureError::Spawn),
        // Dropping the future drops the child, which kills it.
        Err(_) => {
            kill_process_group(pid);
            Err(CaptureError::TimedOut)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Spawn `cmd`, streaming stdout/stderr line by line into `logs` until it exits
/// or `timeout` elapses.
///
/// Start-up failures are not errors here: they are logged and reported as exit code 1.
pub async fn run_streaming(
    mut cmd: Command,
    timeout: Duration,
    logs: Arc<dyn LogStore>,
    run_id: &str,
) -> ProcessOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(run_id, error = %e, "failed to spawn test command");
            logs.append(run_id, format!("[error] failed to start test command: {}", e));
            return ProcessOutcome {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                timed_out: false,
            };
        }
    };

    let pid = child.id();
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump_lines(out, logs.clone(), run_id.to_string(), "")));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump_lines(err, logs.clone(), run_id.to_string(), STDERR_PREFIX)));

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => ProcessOutcome {
            exit_code: status.code().unwrap_or(SIGNALLED_EXIT_CODE),
            timed_out: false,
        },
        Ok(Err(e)) => {
            warn!(run_id, error = %e, "failed to wait for test command");
            ProcessOutcome {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                timed_out: false,
            }
        }
        Err(_) => {
            warn!(run_id, timeout_sec = timeout.as_secs(), "test command timed out; killing");
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                warn!(run_id, error = %e, "failed to kill timed-out process");
            }
            ProcessOutcome {
                exit_code: SIGNALLED_EXIT_CODE,
                timed_out: true,
            }
        }
    };

    // Something outside the group may still hold the pipes; stop listening
    // rather than append to a finished run.
    for mut task in [stdout_task, stderr_task].into_iter().flatten() {
        if tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut task).await.is_err() {
            warn!(run_id, "output capture did not finish after process exit");
            task.abort();
        }
    }

    outcome
}

/// Make the child lead a new process group so a timeout can reach its descendants.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pgid = pid, error = %e, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Forward lines as they arrive. Invalid UTF-8 is replaced rather than ending the stream.
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    logs: Arc<dyn LogStore>,
    run_id: String,
    prefix: &'static str,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                logs.append(&run_id, format!("{}{}", prefix, line));
            }
            Err(e) => {
                debug!(run_id = %run_id, error = %e, "output stream closed with error");
                break;
            }
        }
    }
}
