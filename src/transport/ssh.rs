//! SW-011: SSH transport.
//!
//! Shells out to the system `ssh` client. Scripts go over stdin, never argv.
//! Password fallback goes through `sshpass -e`, which reads the password
//! from `SSHPASS` in the child environment.

use super::{ExecOutput, RemoteShell, SshAuth, SshEndpoint, TransportError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// ssh reserves exit status 255 for its own errors.
const SSH_ERROR_STATUS: i32 = 255;

/// sshpass: 5 = wrong password, 6 = host key unknown.
const SSHPASS_AUTH_STATUSES: [i32; 2] = [5, 6];

const AUTH_MARKERS: [&str; 4] = [
    "Permission denied",
    "Host key verification failed",
    "Too many authentication failures",
    "no matching host key type",
];

/// Lowercased stderr fragments ssh prints when the session never came up.
const CONNECTION_MARKERS: [&str; 9] = [
    "connection refused",
    "timed out",
    "no route to host",
    "could not resolve",
    "connection reset",
    "connection closed",
    "network is unreachable",
    "kex_exchange_identification",
    "broken pipe",
];

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    }
}

/// Classify a failed ssh invocation from its status and stderr.
///
/// A 255 that matches neither list is the remote command's own status and
/// is left to the caller.
pub fn classify_failure(exit_code: i32, stderr: &str, password_auth: bool) -> Option<TransportError> {
    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostic from ssh")
        .to_string();

    if password_auth && SSHPASS_AUTH_STATUSES.contains(&exit_code) {
        return Some(TransportError::Auth(detail));
    }
    if exit_code != SSH_ERROR_STATUS {
        return None;
    }
    if AUTH_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Some(TransportError::Auth(detail));
    }
    let lowered = stderr.to_lowercase();
    if CONNECTION_MARKERS.iter().any(|m| lowered.contains(m)) {
        Some(TransportError::Connection(detail))
    } else {
        None
    }
}

/// Build the client command line for `endpoint`.
pub fn build_command(endpoint: &SshEndpoint) -> Command {
    let mut cmd = match &endpoint.auth {
        SshAuth::Password(password) => {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e").arg("ssh").env("SSHPASS", password);
            cmd.args(["-o", "PubkeyAuthentication=no"])
                .args(["-o", "PreferredAuthentications=password,keyboard-interactive"]);
            cmd
        }
        SshAuth::Key(identity) => {
            let mut cmd = Command::new("ssh");
            cmd.args(["-o", "BatchMode=yes"]);
            if let Some(path) = identity {
                cmd.arg("-i").arg(expand_home(&path.to_string_lossy()));
                cmd.args(["-o", "IdentitiesOnly=yes"]);
            }
            cmd
        }
    };

    cmd.args(["-o", &format!("ConnectTimeout={}", endpoint.connect_timeout_secs)])
        .args(["-o", "StrictHostKeyChecking=accept-new"])
        .args(["-p", &endpoint.port.to_string()])
        .arg(endpoint.destination())
        .arg("bash -s")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Runs scripts through the system ssh client.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshTransport;

#[async_trait]
impl RemoteShell for SshTransport {
    async fn exec(&self, endpoint: &SshEndpoint, script: &str) -> Result<ExecOutput, TransportError> {
        let mut cmd = build_command(endpoint);
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                let program = if endpoint.uses_password() { "sshpass" } else { "ssh" };
                TransportError::Unavailable(format!("{} not found on PATH", program))
            } else {
                TransportError::Connection(format!("failed to spawn ssh to {}: {}", endpoint.host, e))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| TransportError::Connection(format!("stdin write error: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Connection(format!("ssh wait error: {}", e)))?;

        let out = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        match classify_failure(out.exit_code, &out.stderr, endpoint.uses_password()) {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }
}
