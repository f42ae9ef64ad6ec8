//! Executor module - Orchestrates one execution end to end
//!
//! For every request the executor:
//! - Validates the language against the registry
//! - Waits for a worker pool slot
//! - Creates a workspace, resolves the entrypoint and writes the source
//! - Runs the sandbox and classifies the outcome
//! - Destroys the workspace, whatever happened before
//!
//! Every failure is mapped into the closed `Outcome` set; `execute` never
//! returns an error.

pub mod pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{classify, Observation, Outcome};
use crate::entrypoint;
use crate::languages::{LanguageProfile, LanguageRegistry};
use crate::runner::Runner;
use crate::sandbox::SandboxInvocation;
use crate::workspace::{Workspace, WorkspaceManager};

pub use pool::WorkerPool;

/// Wall-clock limit for one execution, compile step included
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
}

/// Result of one execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Workspace id, None if the request never got a workspace
    pub execution_id: Option<Uuid>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Output was cut at the capture limit
    pub truncated: bool,
    pub outcome: Outcome,
    /// Explanation for outcomes that carry no program output
    pub message: Option<String>,
}

impl ExecutionResult {
    fn failed(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            execution_id: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            timed_out: outcome == Outcome::Timeout,
            truncated: false,
            outcome,
            message: Some(message.into()),
        }
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        let mut combined = String::from_utf8_lossy(&self.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&self.stderr));
        combined
    }
}

pub struct Executor {
    registry: Arc<LanguageRegistry>,
    workspaces: WorkspaceManager,
    runner: Arc<dyn Runner>,
    pool: WorkerPool,
    timeout: Duration,
}

impl Executor {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        workspaces: WorkspaceManager,
        runner: Arc<dyn Runner>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            registry,
            workspaces,
            runner,
            pool,
            timeout: EXECUTION_TIMEOUT,
        }
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute `request`, stopping early if `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let Some(profile) = self.registry.lookup(&request.language) else {
            info!("Rejected unsupported language: {}", request.language);
            return ExecutionResult::failed(
                Outcome::UnsupportedLanguage,
                format!("Language not supported: {}", request.language),
            );
        };

        debug!(
            "Waiting for a sandbox slot ({} of {} busy, {} queued)",
            self.pool.capacity() - self.pool.available(),
            self.pool.capacity(),
            self.pool.waiting()
        );
        let _permit = tokio::select! {
            permit = self.pool.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("Rejected {} execution: {}", profile.id, e);
                    return ExecutionResult::failed(Outcome::InfrastructureError, e.to_string());
                }
            },
            _ = cancel.cancelled() => {
                return ExecutionResult::failed(Outcome::InfrastructureError, "Execution cancelled");
            }
        };

        let workspace = match self.workspaces.create().await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Failed to create workspace: {}", e);
                return ExecutionResult::failed(Outcome::InfrastructureError, e.to_string());
            }
        };
        let execution_id = workspace.id();
        let started = Instant::now();
        info!(
            execution_id = %execution_id,
            language = %profile.id,
            "Execution started"
        );

        let mut result = self.run_in_workspace(profile, request, &workspace, cancel).await;
        result.execution_id = Some(execution_id);

        if let Err(e) = workspace.destroy().await {
            warn!(execution_id = %execution_id, "Failed to destroy workspace: {}", e);
        }

        info!(
            execution_id = %execution_id,
            language = %profile.id,
            outcome = %result.outcome,
            timed_out = result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Execution finished"
        );
        result
    }

    async fn run_in_workspace(
        &self,
        profile: &LanguageProfile,
        request: &ExecutionRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let entrypoint = match entrypoint::resolve(profile, &request.code) {
            Ok(entrypoint) => entrypoint,
            Err(e) => {
                let mut result = ExecutionResult::failed(Outcome::CompileError, e.to_string());
                result.stderr = e.to_string().into_bytes();
                return result;
            }
        };

        if let Err(e) = workspace
            .write_source(&entrypoint.source_file, &request.code)
            .await
        {
            error!("Failed to write source: {}", e);
            return ExecutionResult::failed(Outcome::InfrastructureError, e.to_string());
        }

        let invocation = SandboxInvocation {
            image: profile.image.clone(),
            container_name: format!("sandbox-{}", workspace.id()),
            workspace: workspace.path().to_path_buf(),
            compile_command: profile.compile_argv(&entrypoint),
            run_command: profile.run_argv(&entrypoint),
            timeout: self.timeout,
        };
        debug!(
            "Invocation for {}: compile={:?} run={:?}",
            invocation.container_name, invocation.compile_command, invocation.run_command
        );

        let run = match self
            .runner
            .run(&invocation, request.stdin.as_bytes(), cancel)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                error!("Sandbox failed for {}: {}", invocation.container_name, e);
                let outcome = classify(&Observation {
                    launch_failed: true,
                    ..Default::default()
                });
                return ExecutionResult::failed(outcome, e.to_string());
            }
        };

        debug!(
            "Sandbox {} finished in {:?} (exit={:?}, compile_exit={:?})",
            invocation.container_name, run.elapsed, run.exit_code, run.compile_exit
        );

        let outcome = classify(&Observation {
            timed_out: run.timed_out,
            cancelled: run.cancelled,
            launch_failed: false,
            compile_configured: profile.requires_compile(),
            compile_exit: run.compile_exit,
            exit_code: run.exit_code,
        });

        let message = match outcome {
            Outcome::Timeout => Some(format!(
                "Execution timed out after {} seconds",
                self.timeout.as_secs()
            )),
            Outcome::InfrastructureError => Some("Execution cancelled".to_string()),
            _ => None,
        };

        ExecutionResult {
            execution_id: None,
            stdout: run.stdout,
            stderr: run.stderr,
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            truncated: run.truncated,
            outcome,
            message,
        }
    }
}
