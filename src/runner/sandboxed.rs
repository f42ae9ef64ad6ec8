//! Sandboxed runner implementation using Docker
//!
//! Executes untrusted user code in a network-less container with the
//! workspace mounted, under a hard wall-clock limit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::process::{supervise, ProcessLimits, ProcessOutput, Termination};
use super::{RunOutcome, Runner, SandboxError};
use crate::sandbox::{ContainerGuard, SandboxConfig, SandboxInvocation, Step, RUNTIME_LAUNCH_FAILURE};

/// Prefixes the runtime itself puts on stderr when it fails to start a
/// container
const LAUNCH_ERROR_PREFIXES: &[&str] = &[
    "docker: Error response from daemon",
    "docker: Cannot connect to the Docker daemon",
    "Error response from daemon",
    "Cannot connect to the Docker daemon",
    "Unable to find image",
];

/// Runner that executes code in a Docker container
pub struct SandboxedRunner {
    config: SandboxConfig,
}

impl SandboxedRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run an invocation in the sandbox.
    ///
    /// A compile step runs in its own container first. The run step only
    /// starts if it exits 0, and gets whatever is left of the time budget.
    pub async fn execute(
        &self,
        invocation: &SandboxInvocation,
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SandboxError> {
        let started = Instant::now();

        let compiled = if invocation.compile_command.is_some() {
            let output = self
                .run_step(invocation, Step::Compile, b"", invocation.timeout, cancel)
                .await?;
            if output.termination != Termination::Exited || output.exit_code != Some(0) {
                // A compiler killed by a signal still failed to compile
                let compile_exit = (output.termination == Termination::Exited)
                    .then(|| output.exit_code.unwrap_or(-1));
                return Ok(outcome(output, compile_exit, started.elapsed()));
            }
            Some(output)
        } else {
            None
        };

        let remaining = invocation.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            let mut timed_out = compiled
                .map(|compile| outcome(compile, Some(0), started.elapsed()))
                .unwrap_or_default();
            timed_out.exit_code = None;
            timed_out.timed_out = true;
            return Ok(timed_out);
        }

        let mut output = self
            .run_step(invocation, Step::Run, stdin, remaining, cancel)
            .await?;
        let compile_exit = match compiled {
            Some(compile) => {
                output.stdout = [compile.stdout, output.stdout].concat();
                output.stderr = [compile.stderr, output.stderr].concat();
                output.truncated |= compile.truncated;
                Some(0)
            }
            None => None,
        };
        Ok(outcome(output, compile_exit, started.elapsed()))
    }

    /// Start one container and supervise it to completion
    async fn run_step(
        &self,
        invocation: &SandboxInvocation,
        step: Step,
        stdin: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SandboxError> {
        let name = invocation.step_name(step);
        let args = invocation.runtime_args(&self.config, step, timeout);
        debug!("Running {} with args: {:?}", self.config.runtime, args);

        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(&args);

        // Removes the container if this future is dropped mid-run
        let guard = ContainerGuard::new(&self.config.runtime, &name);

        let limits = ProcessLimits {
            timeout,
            max_output_bytes: self.config.max_output_bytes,
        };
        let output = supervise(cmd, stdin, &limits, cancel).await?;

        match output.termination {
            Termination::Exited => guard.disarm(),
            // Killing the CLI does not stop the container
            Termination::TimedOut | Termination::Cancelled => guard.remove().await,
        }

        if output.termination == Termination::Exited && is_launch_failure(output.exit_code, &output.stderr) {
            return Err(SandboxError::Launch(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output)
    }
}

#[async_trait]
impl Runner for SandboxedRunner {
    async fn run(
        &self,
        invocation: &SandboxInvocation,
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SandboxError> {
        self.execute(invocation, stdin, cancel).await
    }
}

fn outcome(output: ProcessOutput, compile_exit: Option<i32>, elapsed: Duration) -> RunOutcome {
    RunOutcome {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        compile_exit,
        timed_out: output.termination == Termination::TimedOut,
        cancelled: output.termination == Termination::Cancelled,
        truncated: output.truncated,
        elapsed,
    }
}

/// `docker run` exits with 125 when the runtime itself fails. A user
/// program can exit with 125 and print anything, so stderr must start with
/// one of the runtime's own error prefixes.
fn is_launch_failure(exit_code: Option<i32>, stderr: &[u8]) -> bool {
    if exit_code != Some(RUNTIME_LAUNCH_FAILURE) {
        return false;
    }
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim_start();
    LAUNCH_ERROR_PREFIXES
        .iter()
        .any(|prefix| stderr.starts_with(prefix))
}
