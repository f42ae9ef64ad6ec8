//! Sandbox module - Low-level Docker wrapper
//!
//! This module provides a minimal abstraction over the container runtime.
//! It handles:
//! - Building the isolated `docker run` invocation for the compile and
//!   run steps
//! - Runtime availability checks and container removal
//!
//! The sandbox module does NOT:
//! - Supervise processes or enforce timeouts (that's the runner's job)
//! - Interpret outcomes
//! - Know about languages

pub mod config;
pub mod container;

// Re-exports for convenience
pub use config::SandboxConfig;
pub use container::{
    ensure_runtime_available, ContainerGuard, SandboxInvocation, Step, RUNTIME_LAUNCH_FAILURE,
};
