//! SW-010: Remote-shell transport abstraction.
//!
//! The executor talks to hosts through [`RemoteShell`], which pipes one shell
//! script to one session and reports its output. Failures are classified
//! here so the executor can decide what to retry.

pub mod ssh;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Output from executing a script on a target.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    /// Key-based; `None` leaves key selection to the ssh client
    Key(Option<PathBuf>),
    /// Password fallback
    Password(String),
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(path) => f.debug_tuple("Key").field(path).finish(),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Where and how to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
    pub connect_timeout_secs: u64,
}

impl SshEndpoint {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn uses_password(&self) -> bool {
        matches!(self.auth, SshAuth::Password(_))
    }

    /// Same endpoint, authenticating with `password` instead of a key.
    pub fn with_password(&self, password: &str) -> Self {
        Self {
            auth: SshAuth::Password(password.to_string()),
            ..self.clone()
        }
    }
}

/// Session-level failure, before the script's own exit status exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Refused, timed out, unreachable; worth retrying
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The transport itself cannot run here (client binary missing)
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A remote shell that runs one script per call.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, endpoint: &SshEndpoint, script: &str) -> Result<ExecOutput, TransportError>;
}
