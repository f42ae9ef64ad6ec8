use serde::{Deserialize, Serialize};
use std::fmt;

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    UnsupportedLanguage,
    InfrastructureError,
}

impl Outcome {
    /// Outcomes reported as `{error}` rather than `{output}`
    pub fn is_failure_response(&self) -> bool {
        matches!(
            self,
            Outcome::Timeout | Outcome::UnsupportedLanguage | Outcome::InfrastructureError
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::CompileError => "compile_error",
            Outcome::RuntimeError => "runtime_error",
            Outcome::Timeout => "timeout",
            Outcome::UnsupportedLanguage => "unsupported_language",
            Outcome::InfrastructureError => "infrastructure_error",
        };
        write!(f, "{}", s)
    }
}

/// What the executor observed about one sandbox run
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub timed_out: bool,
    pub cancelled: bool,
    /// The sandbox runtime could not be started at all
    pub launch_failed: bool,
    pub compile_configured: bool,
    /// Exit status of the compile container
    pub compile_exit: Option<i32>,
    /// Final exit status (None if the process was killed)
    pub exit_code: Option<i32>,
}

/// Map an observation to exactly one outcome. Rules apply in order.
pub fn classify(observation: &Observation) -> Outcome {
    if observation.timed_out {
        return Outcome::Timeout;
    }
    if observation.launch_failed || observation.cancelled {
        return Outcome::InfrastructureError;
    }
    if observation.compile_configured && matches!(observation.compile_exit, Some(code) if code != 0)
    {
        return Outcome::CompileError;
    }
    match observation.exit_code {
        Some(0) => Outcome::Success,
        _ => Outcome::RuntimeError,
    }
}
