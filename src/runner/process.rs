//! Child process supervision
//!
//! Spawns a command in its own process group, pipes stdin, captures stdout
//! and stderr separately, and kills the whole group when the wall-clock
//! limit expires or the caller cancels.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SandboxError;

/// How long to wait for the output pipes to close after a kill
const READER_GRACE: Duration = Duration::from_secs(2);

/// Limits applied to one supervised process
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Wall-clock limit
    pub timeout: Duration,
    /// Bytes kept per stream
    pub max_output_bytes: usize,
}

/// Why the process stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own (normally or by a signal)
    Exited,
    /// Killed because the wall-clock limit expired
    TimedOut,
    /// Killed because the caller cancelled
    Cancelled,
}

/// Captured result of a supervised process
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code; None if killed by a signal
    pub exit_code: Option<i32>,
    pub termination: Termination,
    /// Some output was discarded because of `max_output_bytes`
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Run `cmd` to completion, the timeout, or cancellation, whichever is first
pub async fn supervise(
    mut cmd: Command,
    stdin: &[u8],
    limits: &ProcessLimits,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, SandboxError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| SandboxError::Launch(format!("failed to spawn {:?}: {}", cmd.as_std().get_program(), e)))?;
    let pid = child.id();

    // Writing from a separate task keeps a full stdout pipe from blocking stdin
    let stdin_task = child.stdin.take().map(|mut pipe| {
        let input = stdin.to_vec();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    debug!("Failed to write stdin: {}", e);
                }
            }
            // Dropping the pipe closes stdin
        })
    });

    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, limits.max_output_bytes)));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, limits.max_output_bytes)));

    let waited = tokio::select! {
        status = child.wait() => Ok(status?),
        _ = tokio::time::sleep(limits.timeout) => Err(Termination::TimedOut),
        _ = cancel.cancelled() => Err(Termination::Cancelled),
    };

    let (exit_code, termination) = match waited {
        Ok(status) => (status.code(), Termination::Exited),
        Err(termination) => {
            debug!("Killing process group {:?} ({:?})", pid, termination);
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                debug!("Failed to kill child: {}", e);
            }
            (None, termination)
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    let (stdout, stdout_truncated) = join_reader(stdout_task).await;
    let (stderr, stderr_truncated) = join_reader(stderr_task).await;

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code,
        termination,
        truncated: stdout_truncated || stderr_truncated,
        elapsed: started.elapsed(),
    })
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok((buf, truncated))
}

async fn join_reader(task: Option<JoinHandle<io::Result<(Vec<u8>, bool)>>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };

    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!("Failed to read process output: {}", e);
            (Vec::new(), false)
        }
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            (Vec::new(), false)
        }
        Err(_) => {
            // A surviving descendant still holds the pipe open
            warn!("Output pipe still open {:?} after kill", READER_GRACE);
            task.abort();
            (Vec::new(), true)
        }
    }
}
