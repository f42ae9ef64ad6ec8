//! Runner module - Execution abstraction layer
//!
//! This module provides a unified interface for running one sandbox
//! invocation:
//! - `SandboxedRunner`: runs the invocation in a Docker container
//! - `process::supervise`: timeout/cancellation-aware child process handling
//!
//! The runner module does NOT:
//! - Decide outcomes (that's the classifier's job)
//! - Create or remove workspaces
//! - Know about individual languages

pub mod process;
pub mod sandboxed;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::sandbox::SandboxInvocation;

/// Failures of the sandbox machinery itself, never of the user's program
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The runtime could not be started (binary missing, daemon
    /// unreachable, image unavailable)
    #[error("Failed to launch sandbox: {0}")]
    Launch(String),
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of running an invocation (raw, no classification)
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code; None if the process was killed
    pub exit_code: Option<i32>,
    /// Exit status of the compile step, if one ran to completion
    pub compile_exit: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Output exceeded the capture limit and was cut
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Runner trait for executing sandbox invocations
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `invocation`, feeding `stdin`, until it exits, times out, or
    /// `cancel` fires
    async fn run(
        &self,
        invocation: &SandboxInvocation,
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SandboxError>;
}

// Re-exports
pub use sandboxed::SandboxedRunner;
