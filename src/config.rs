//! Worker configuration from the environment

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::sandbox::config::{SandboxConfig, DEFAULT_MAX_OUTPUT_BYTES};

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_SCRATCH_ROOT: &str = "/tmp/user_code";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_MAX_QUEUE: usize = 32;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Parent directory of all workspaces. Must be dedicated to one
    /// worker: stale workspaces under it are removed at startup.
    pub scratch_root: PathBuf,
    /// Concurrent sandbox runs
    pub pool_size: usize,
    /// Requests allowed to wait for a free slot
    pub max_queue: usize,
    /// Language profile override; the built-in table is used when unset
    pub languages_path: Option<PathBuf>,
    pub sandbox: SandboxConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_output_bytes = parse_or(&lookup, "SANDBOX_MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?;
        let mut sandbox = SandboxConfig::default().with_max_output_bytes(max_output_bytes);
        if let Some(runtime) = lookup("DOCKER_BIN").filter(|r| !r.trim().is_empty()) {
            sandbox.runtime = runtime.trim().to_string();
        }

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.into()),
            scratch_root: lookup("SCRATCH_ROOT")
                .unwrap_or_else(|| DEFAULT_SCRATCH_ROOT.into())
                .into(),
            pool_size: parse_or(&lookup, "SANDBOX_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            max_queue: parse_or(&lookup, "SANDBOX_MAX_QUEUE", DEFAULT_MAX_QUEUE)?,
            languages_path: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
            sandbox,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, value)),
        None => Ok(default),
    }
}
