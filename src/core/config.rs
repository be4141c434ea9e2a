//! SW-009: Engine configuration: YAML loading, defaults and validation.
//!
//! Configuration is an explicit value injected into the compiler and executor
//! constructors. Every field has a default, so an empty document is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compiler: CompilerConfig,
    pub executor: ExecutorConfig,
}

/// Compiler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Resolver root under which script and file paths are looked up
    pub scripts_root: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            scripts_root: "scripts".to_string(),
        }
    }
}

/// Remote executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Refuse all remote execution
    pub disable_agent: bool,

    /// Whole-session deadline used when the caller passes none
    pub timeout_secs: u64,

    /// Connection attempts before giving up on a transient failure
    pub max_attempts: u32,

    /// Pause between connection attempts
    pub retry_delay_ms: u64,

    /// SSH port when the target does not override it
    pub ssh_port: u16,

    /// Per-connection handshake timeout passed to ssh
    pub connect_timeout_secs: u64,

    /// Remote parent directory for staged plan files
    pub remote_workdir: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            disable_agent: false,
            timeout_secs: 1800,
            max_attempts: 3,
            retry_delay_ms: 1000,
            ssh_port: 22,
            connect_timeout_secs: 5,
            remote_workdir: "/tmp".to_string(),
        }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Load a configuration file from disk.
pub fn load_config(path: &Path) -> Result<EngineConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse configuration from a YAML string. Empty input yields the defaults.
pub fn parse_config(yaml: &str) -> Result<EngineConfig, String> {
    if yaml.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("config parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &EngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let exec = &config.executor;

    if config.compiler.scripts_root.trim().is_empty() {
        errors.push(ValidationError {
            message: "compiler.scripts_root must not be empty".to_string(),
        });
    }
    if exec.max_attempts == 0 {
        errors.push(ValidationError {
            message: "executor.max_attempts must be at least 1".to_string(),
        });
    }
    if exec.timeout_secs == 0 {
        errors.push(ValidationError {
            message: "executor.timeout_secs must be positive".to_string(),
        });
    }
    if exec.ssh_port == 0 {
        errors.push(ValidationError {
            message: "executor.ssh_port must not be 0".to_string(),
        });
    }
    if !exec.remote_workdir.starts_with('/') {
        errors.push(ValidationError {
            message: format!(
                "executor.remote_workdir must be absolute, got \"{}\"",
                exec.remote_workdir
            ),
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sw009_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.compiler.scripts_root, "scripts");
        assert_eq!(cfg.executor.max_attempts, 3);
        assert_eq!(cfg.executor.ssh_port, 22);
        assert_eq!(cfg.executor.timeout_secs, 1800);
        assert!(!cfg.executor.disable_agent);
        assert!(validate_config(&cfg).is_empty());
    }

    #[test]
    fn test_sw009_partial_document() {
        let cfg = parse_config(
            r#"
executor:
  disable_agent: true
  max_attempts: 5
"#,
        )
        .unwrap();
        assert!(cfg.executor.disable_agent);
        assert_eq!(cfg.executor.max_attempts, 5);
        assert_eq!(cfg.executor.retry_delay_ms, 1000);
        assert_eq!(cfg.compiler.scripts_root, "scripts");
    }

    #[test]
    fn test_sw009_empty_document() {
        assert_eq!(parse_config("").unwrap(), EngineConfig::default());
        assert_eq!(parse_config("  \n").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_sw009_invalid_values() {
        let cfg = parse_config(
            r#"
compiler:
  scripts_root: ""
executor:
  max_attempts: 0
  timeout_secs: 0
  remote_workdir: relative/dir
"#,
        )
        .unwrap();
        let errors = validate_config(&cfg);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.message.contains("max_attempts")));
        assert!(errors.iter().any(|e| e.message.contains("remote_workdir")));
    }

    #[test]
    fn test_sw009_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipwright.yaml");
        std::fs::write(&path, "executor:\n  ssh_port: 2222\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.executor.ssh_port, 2222);
    }

    #[test]
    fn test_sw009_parse_invalid_yaml() {
        assert!(parse_config("executor: [not: a: map").is_err());
    }
}
