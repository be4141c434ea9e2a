//! SW-002: Compile and execution error taxonomy.
//!
//! Compile errors are detected before any remote-host interaction and are
//! never retried. Execution errors distinguish the one transient class
//! (`ConnectionFailed`) from fatal ones.

use super::types::DeployStep;
use thiserror::Error;

/// Failure to turn a template into a plan. Compilation is all-or-nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("no entry point in script '{0}'")]
    MissingEntryPoint(String),

    #[error("no value for parameter '{0}'")]
    MissingParameter(String),
}

impl CompileError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }
}

/// Failure to carry a plan to a target host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Connection-level failure; retried up to the configured bound
    #[error("connection to {host} failed after {attempts} attempt(s): {cause}")]
    ConnectionFailed {
        host: String,
        attempts: u32,
        cause: String,
    },

    #[error("authentication rejected by {0}")]
    AuthRejected(String),

    /// The execution backend cannot run this deployment
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("remote session timed out after {0}s")]
    Timeout(u64),

    #[error("{step} step exited with code {exit_code}: {stderr}")]
    StepFailed {
        step: DeployStep,
        exit_code: i32,
        stderr: String,
    },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("remote execution is disallowed by the engine configuration")]
    AgentDisabled,

    #[error("deployment worker aborted: {0}")]
    WorkerAborted(String),

    /// Plan problem found before connecting (dangling file id, missing parameter)
    #[error(transparent)]
    Plan(#[from] CompileError),
}

impl ExecutionError {
    /// Only connection-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}
