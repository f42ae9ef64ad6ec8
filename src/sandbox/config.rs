//! Sandbox configuration
//!
//! Container limits and the location of the container runtime.

use nix::unistd::{getgid, getuid};

/// Bytes kept per captured stream unless configured otherwise
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime binary (default: "docker")
    pub runtime: String,
    /// Container memory limit in MB (default: 512MB, swap disabled)
    pub memory_mb: u32,
    /// Maximum number of processes inside the container
    pub pids_limit: u32,
    /// Size of the in-container /tmp in MB
    pub tmpfs_mb: u32,
    /// Bytes kept per captured stream; the rest is discarded
    pub max_output_bytes: usize,
    /// "uid:gid" the container runs as, so workspace files stay removable
    pub user: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            memory_mb: 512,
            pids_limit: 256,
            tmpfs_mb: 256,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            user: Some(format!("{}:{}", getuid(), getgid())),
        }
    }
}

impl SandboxConfig {
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}
