//! SW-007: Remote step generation.
//!
//! A deployment is two shell scripts piped to the remote shell in order:
//! 1. key: append the deployer's public key to `~/.ssh/authorized_keys`
//! 2. script: stage the script's files into a per-plan directory and
//!    invoke the entry point with positional arguments
//!
//! Inline bodies always travel base64-encoded inside a quoted heredoc, so
//! file content is never interpreted by the remote shell.

use super::error::CompileError;
use super::types::{FileDescriptor, FileId, ScriptDescriptor, StructuredPlan};
use base64::Engine as _;
use std::path::{Component, Path};

/// Heredoc terminator for staged file bodies.
pub const HEREDOC_MARKER: &str = "SHIPWRIGHT_EOF";

const BASE64_LINE_WIDTH: usize = 76;

/// Single-quote `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'\''"#))
}

/// Remote directory holding the staged files of one plan.
pub fn plan_workdir(remote_workdir: &str, plan_id: &str) -> String {
    format!(
        "{}/shipwright-{}",
        remote_workdir.trim_end_matches('/'),
        plan_id
    )
}

/// Generate the key-install step. Idempotent on the remote side.
pub fn key_install_script(public_key: &str) -> String {
    let key = shell_quote(public_key.trim());
    [
        "set -euo pipefail".to_string(),
        "umask 077".to_string(),
        "mkdir -p \"$HOME/.ssh\"".to_string(),
        "touch \"$HOME/.ssh/authorized_keys\"".to_string(),
        format!(
            "grep -qxF {key} \"$HOME/.ssh/authorized_keys\" || printf '%s\\n' {key} >> \"$HOME/.ssh/authorized_keys\""
        ),
    ]
    .join("\n")
}

/// Reject names that would land outside the staging directory.
fn staged_name(name: &str) -> Result<&str, CompileError> {
    let path = Path::new(name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(name)
    } else {
        Err(CompileError::invalid(format!(
            "file name '{}' cannot be staged",
            name
        )))
    }
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_WIDTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn stage_file(lines: &mut Vec<String>, descriptor: &FileDescriptor) -> Result<(), CompileError> {
    let name = staged_name(descriptor.name())?;
    if let Some(parent) = Path::new(name).parent() {
        if !parent.as_os_str().is_empty() {
            lines.push(format!("mkdir -p {}", shell_quote(&parent.to_string_lossy())));
        }
    }

    match descriptor {
        FileDescriptor::Downloadable { url, .. } => {
            let (url, dest) = (shell_quote(url), shell_quote(name));
            lines.push(format!(
                "curl -fsSL {url} -o {dest} || wget -q -O {dest} {url}"
            ));
        }
        FileDescriptor::Inline { .. } => {
            let content = descriptor
                .decoded_body()
                .map_err(|e| {
                    CompileError::invalid(format!("file '{}' has an invalid body: {}", name, e))
                })?
                .unwrap_or_default();
            lines.push(format!(
                "base64 -d > {} <<'{}'\n{}\n{}",
                shell_quote(name),
                HEREDOC_MARKER,
                wrap_base64(&content),
                HEREDOC_MARKER
            ));
        }
    }
    Ok(())
}

fn lookup<'p>(plan: &'p StructuredPlan, id: &FileId) -> Result<&'p FileDescriptor, CompileError> {
    plan.files
        .get(id)
        .ok_or_else(|| CompileError::invalid(format!("plan has no file '{}'", id)))
}

/// Generate the stage-and-invoke step for an application script.
pub fn stage_script(
    plan: &StructuredPlan,
    script: &ScriptDescriptor,
    args: &[String],
    remote_workdir: &str,
) -> Result<String, CompileError> {
    let entry = lookup(plan, &script.entry_point)?;
    let workdir = plan_workdir(remote_workdir, &plan.id);

    let mut lines = vec![
        "set -euo pipefail".to_string(),
        format!("mkdir -p {}", shell_quote(&workdir)),
        format!("cd {}", shell_quote(&workdir)),
    ];

    let mut staged: Vec<&FileId> = Vec::new();
    for id in std::iter::once(&script.entry_point).chain(script.files.iter()) {
        if staged.contains(&id) {
            continue;
        }
        stage_file(&mut lines, lookup(plan, id)?)?;
        staged.push(id);
    }

    let entry_path = format!("./{}", staged_name(entry.name())?);
    lines.push(format!("chmod +x {}", shell_quote(&entry_path)));

    let mut invoke = format!("exec {}", shell_quote(&entry_path));
    for arg in args {
        invoke.push(' ');
        invoke.push_str(&shell_quote(arg));
    }
    lines.push(invoke);

    Ok(lines.join("\n"))
}
