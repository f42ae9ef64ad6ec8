//! Docker container management
//!
//! Low-level wrapper around the container runtime for one execution.
//! Builds the `docker run` invocation for each step, checks that the runtime is
//! reachable, and force-removes containers that outlive their run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::SandboxConfig;

/// Working directory inside the container; the workspace is mounted here
pub const CONTAINER_WORK_DIR: &str = "/usr/src/app";

/// Exit status `docker run` reserves for its own failures
pub const RUNTIME_LAUNCH_FAILURE: i32 = 125;

/// Suffix of the compile container's name
const COMPILE_SUFFIX: &str = "-compile";

/// One container started for an invocation. Compile and run share the
/// workspace, never a process; the compile result is the compile
/// container's own exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Compile,
    Run,
}

/// Everything needed to start one sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxInvocation {
    /// Container image
    pub image: String,
    /// Unique container name, used to kill the container from outside
    pub container_name: String,
    /// Host workspace mounted read-write at `CONTAINER_WORK_DIR`
    pub workspace: PathBuf,
    /// Compile argv (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run argv
    pub run_command: Vec<String>,
    /// Wall-clock limit enforced both outside and inside the container
    pub timeout: Duration,
}

impl SandboxInvocation {
    /// Container name used for `step`
    pub fn step_name(&self, step: Step) -> String {
        match step {
            Step::Compile => format!("{}{}", self.container_name, COMPILE_SUFFIX),
            Step::Run => self.container_name.clone(),
        }
    }

    /// Argv of `step` (None when the language has no compile step)
    pub fn step_command(&self, step: Step) -> Option<&[String]> {
        match step {
            Step::Compile => self.compile_command.as_deref(),
            Step::Run => Some(&self.run_command),
        }
    }

    /// Arguments for the container runtime binary to run `step` with
    /// `timeout` left
    pub fn runtime_args(&self, config: &SandboxConfig, step: Step, timeout: Duration) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--interactive",
            "--pull=never",
            "--network",
            "none",
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend([
            "--name".to_string(),
            self.step_name(step),
            format!("--pids-limit={}", config.pids_limit),
            format!("--memory={}m", config.memory_mb),
            format!("--memory-swap={}m", config.memory_mb),
            "--tmpfs".to_string(),
            format!("/tmp:rw,size={}m", config.tmpfs_mb),
            "--env".to_string(),
            "HOME=/tmp".to_string(),
            "--volume".to_string(),
            format!("{}:{}", self.workspace.display(), CONTAINER_WORK_DIR),
            "--workdir".to_string(),
            CONTAINER_WORK_DIR.to_string(),
        ]);

        if let Some(user) = &config.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }

        args.push(self.image.clone());

        // Inner guard, in case the runtime ignores the outer kill
        let inner_timeout = timeout.as_secs_f64().ceil().max(1.0) as u64;
        args.extend([
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            format!("{}s", inner_timeout),
        ]);

        args.extend(self.step_command(step).unwrap_or(&[]).iter().cloned());
        args
    }
}

/// Force-removes a container unless disarmed.
///
/// Dropping an armed guard (e.g., when the owning future is cancelled)
/// schedules the removal in the background.
pub struct ContainerGuard {
    runtime: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(runtime: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            name: name.into(),
            armed: true,
        }
    }

    /// The container exited on its own and `--rm` cleaned it up
    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Remove the container now
    pub async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = force_remove(&self.runtime, &self.name).await {
            warn!("Failed to remove container {}: {:#}", self.name, e);
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let runtime = std::mem::take(&mut self.runtime);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = force_remove(&runtime, &name).await {
                        warn!("Failed to remove container {}: {:#}", name, e);
                    }
                });
            }
            Err(_) => {
                let _ = std::process::Command::new(&runtime)
                    .args(["rm", "--force", &name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
            }
        }
    }
}

/// Kill and remove a container by name
pub async fn force_remove(runtime: &str, name: &str) -> Result<()> {
    let status = Command::new(runtime)
        .args(["rm", "--force", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to run {} rm", runtime))?;

    if status.success() {
        debug!("Removed container {}", name);
    } else {
        // Usually "no such container": --rm already cleaned it up
        debug!("{} rm --force {} exited with {}", runtime, name, status);
    }
    Ok(())
}

/// Ensure the container runtime and its daemon are reachable
pub async fn ensure_runtime_available(runtime: &str) -> Result<()> {
    let output = Command::new(runtime)
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .await
        .with_context(|| format!("Failed to run container runtime {:?}", runtime))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Container runtime {} is not reachable: {}",
            runtime,
            stderr.trim()
        );
    }

    info!(
        "Container runtime {} ready (server {})",
        runtime,
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}
