//! SW-001: Plan, template and target types.
//!
//! Templates are arbitrary JSON-like documents. Compilation turns them into an
//! [`ExecutionPlan`], whose field names match the wire layout consumed by the
//! remote executor and by anything that persists plans (`ID`, `FormatVersion`,
//! `Files`, `Scripts`, ...). Unknown template keys are carried through.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Raw deployment template as supplied by the caller.
pub type Template = Value;

/// Opaque identifier of a file inside a structured plan.
pub type FileId = String;

// ============================================================================
// File descriptors
// ============================================================================

/// Encoding of an inline file body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    Text,
    Base64,
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "Text"),
            Self::Base64 => write!(f, "Base64"),
        }
    }
}

/// Marker for the `Type` field of a downloadable descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Downloadable,
}

/// A file the plan needs on the target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileDescriptor {
    /// Fetched by the target host itself.
    Downloadable {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "URL")]
        url: String,
        #[serde(rename = "Type")]
        kind: FileKind,
    },
    /// Content embedded in the plan.
    Inline {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "BodyType")]
        body_type: BodyType,
        #[serde(rename = "Body")]
        body: String,
    },
}

impl FileDescriptor {
    pub fn name(&self) -> &str {
        match self {
            Self::Downloadable { name, .. } | Self::Inline { name, .. } => name,
        }
    }

    pub fn is_downloadable(&self) -> bool {
        matches!(self, Self::Downloadable { .. })
    }

    /// Decoded content of an inline descriptor; `None` for downloadable ones.
    pub fn decoded_body(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        use base64::Engine as _;
        match self {
            Self::Downloadable { .. } => Ok(None),
            Self::Inline {
                body_type: BodyType::Text,
                body,
                ..
            } => Ok(Some(body.as_bytes().to_vec())),
            Self::Inline {
                body_type: BodyType::Base64,
                body,
                ..
            } => base64::engine::general_purpose::STANDARD
                .decode(body.trim())
                .map(Some),
        }
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// A compiled script entry of a structured plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    /// Script type, e.g. `Application`
    #[serde(rename = "Type")]
    pub script_type: String,

    /// File id of the entry point (raw name for non-application scripts)
    #[serde(rename = "EntryPoint")]
    pub entry_point: String,

    /// Auxiliary file ids
    #[serde(rename = "Files", default)]
    pub files: Vec<FileId>,

    /// Per-script action override
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Keys this crate does not interpret (`Version`, `Options`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScriptDescriptor {
    /// Application scripts have their entry point compiled into the file table.
    pub fn is_application(&self) -> bool {
        is_application_type(&self.script_type)
    }
}

/// True if a declared script type names an application script.
pub fn is_application_type(script_type: &str) -> bool {
    script_type.contains("Application")
}

// ============================================================================
// Plans
// ============================================================================

/// Compiled plan, legacy (v1) or structured (v2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionPlan {
    Structured(StructuredPlan),
    Legacy(LegacyPlan),
}

impl ExecutionPlan {
    /// Plan id; legacy plans carry none.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Structured(p) => Some(&p.id),
            Self::Legacy(_) => None,
        }
    }

    pub fn format_version(&self) -> Option<&str> {
        match self {
            Self::Structured(p) => Some(&p.format_version),
            Self::Legacy(p) => p.format_version.as_deref(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    pub fn as_structured(&self) -> Option<&StructuredPlan> {
        match self {
            Self::Structured(p) => Some(p),
            Self::Legacy(_) => None,
        }
    }

    /// Serialize to a pretty JSON document.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a previously serialized plan.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Legacy plan: a flat list of base64-encoded scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyPlan {
    #[serde(rename = "FormatVersion", default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,

    #[serde(rename = "Scripts")]
    pub scripts: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured plan: file table plus scripts referencing it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredPlan {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FormatVersion")]
    pub format_version: String,

    #[serde(rename = "Action")]
    pub action: String,

    /// Invocation template the argument extractor reads placeholders from
    #[serde(rename = "Body", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Value>,

    #[serde(rename = "Files")]
    pub files: IndexMap<FileId, FileDescriptor>,

    #[serde(rename = "Scripts")]
    pub scripts: IndexMap<String, ScriptDescriptor>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StructuredPlan {
    /// File ids referenced by scripts that are missing from the file table,
    /// as `(script name, file id)` pairs.
    pub fn dangling_references(&self) -> Vec<(String, FileId)> {
        let mut dangling = Vec::new();
        for (name, script) in &self.scripts {
            if script.is_application() && !self.files.contains_key(&script.entry_point) {
                dangling.push((name.clone(), script.entry_point.clone()));
            }
            for id in &script.files {
                if !self.files.contains_key(id) {
                    dangling.push((name.clone(), id.clone()));
                }
            }
        }
        dangling
    }
}

// ============================================================================
// Remote targets
// ============================================================================

/// Private key used to authenticate against the target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMaterial {
    /// Path to a private key file (`~/` is expanded)
    Path(String),
    /// PEM/OpenSSH private key content
    Inline(String),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Inline(_) => f.write_str("Inline(<redacted>)"),
        }
    }
}

/// An already-reachable host to deploy to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Host address (IP or DNS)
    pub host: String,

    /// SSH port; the executor's configured port when absent
    #[serde(default)]
    pub port: Option<u16>,

    /// SSH user
    #[serde(default = "default_user")]
    pub username: String,

    #[serde(default)]
    pub private_key: Option<KeyMaterial>,

    /// Public key installed by the key step; read from `<key path>.pub` when absent
    #[serde(default)]
    pub public_key: Option<String>,

    /// Used only if key auth is rejected
    #[serde(default)]
    pub password: Option<String>,

    /// Discovered public addresses, preferred over `host`
    #[serde(default)]
    pub public_ips: Vec<String>,
}

fn default_user() -> String {
    "root".to_string()
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: default_user(),
            private_key: None,
            public_key: None,
            password: None,
            public_ips: Vec::new(),
        }
    }

    /// First known public address, else the host itself.
    pub fn address(&self) -> Option<&str> {
        self.public_ips
            .iter()
            .map(|ip| ip.trim())
            .find(|ip| !ip.is_empty())
            .or_else(|| Some(self.host.trim()).filter(|h| !h.is_empty()))
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &self.private_key)
            .field("public_key", &self.public_key.as_ref().map(|_| "<set>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("public_ips", &self.public_ips)
            .finish()
    }
}

// ============================================================================
// Execution
// ============================================================================

/// One of the two strictly ordered remote steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    InstallKey,
    RunScript,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallKey => write!(f, "key install"),
            Self::RunScript => write!(f, "script"),
        }
    }
}

/// Lifecycle of one remote execution.
///
/// `Idle → Connecting → KeyStaged → ScriptRunning → {Succeeded, Failed}`.
/// `Connecting` may repeat itself while retrying; any non-terminal state may
/// fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Connecting,
    KeyStaged,
    ScriptRunning,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Succeeded | Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (Self::Idle, Self::Connecting) => true,
            (Self::Connecting, Self::Connecting) => true,
            (Self::Connecting, Self::KeyStaged) => true,
            (Self::KeyStaged, Self::ScriptRunning) => true,
            (Self::ScriptRunning, Self::Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::KeyStaged => write!(f, "KEY-STAGED"),
            Self::ScriptRunning => write!(f, "SCRIPT-RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of a successful remote execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub script: String,
    pub host: String,
    pub port: u16,
    /// Connection attempts used to get past `Connecting`
    pub attempts: u32,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Every state entered, starting with `Idle`
    pub transitions: Vec<ExecutionState>,
    pub duration: Duration,
}

// ============================================================================
// Execution events
// ============================================================================

/// Execution event for the JSONL audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        host: String,
        plan_id: String,
        plan_digest: String,
        script: String,
    },
    StateChanged {
        host: String,
        from: ExecutionState,
        to: ExecutionState,
    },
    AttemptFailed {
        host: String,
        attempt: u32,
        error: String,
    },
    ExecutionSucceeded {
        host: String,
        plan_id: String,
        attempts: u32,
        total_seconds: f64,
    },
    ExecutionFailed {
        host: String,
        plan_id: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

/// Render a template value as a positional argument or log field.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sw001_inline_descriptor_wire_names() {
        let d = FileDescriptor::Inline {
            name: "run.sh".into(),
            body_type: BodyType::Text,
            body: "echo hi".into(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v, json!({"Name": "run.sh", "BodyType": "Text", "Body": "echo hi"}));
    }

    #[test]
    fn test_sw001_downloadable_descriptor_wire_names() {
        let v = json!({"Name": "x.tgz", "URL": "http://h/x.tgz", "Type": "Downloadable"});
        let d: FileDescriptor = serde_json::from_value(v).unwrap();
        assert!(d.is_downloadable());
        assert_eq!(d.name(), "x.tgz");
        assert_eq!(d.decoded_body().unwrap(), None);
    }

    #[test]
    fn test_sw001_decoded_body_base64() {
        let d = FileDescriptor::Inline {
            name: "bin".into(),
            body_type: BodyType::Base64,
            body: "ZWNobyBoaQ==".into(),
        };
        assert_eq!(d.decoded_body().unwrap(), Some(b"echo hi".to_vec()));
    }

    #[test]
    fn test_sw001_descriptor_rejects_unknown_shape() {
        let v = json!({"Name": "x"});
        assert!(serde_json::from_value::<FileDescriptor>(v).is_err());
    }

    #[test]
    fn test_sw001_plan_untagged_dispatch() {
        let legacy = json!({"FormatVersion": "1.0.0", "Scripts": ["ZWNobw=="], "Name": "Deploy"});
        let plan: ExecutionPlan = serde_json::from_value(legacy).unwrap();
        assert!(plan.is_legacy());
        assert_eq!(plan.format_version(), Some("1.0.0"));
        assert_eq!(plan.id(), None);

        let structured = json!({
            "ID": "abc",
            "FormatVersion": "2.0.0",
            "Action": "Execute",
            "Files": {},
            "Scripts": {}
        });
        let plan: ExecutionPlan = serde_json::from_value(structured).unwrap();
        assert_eq!(plan.id(), Some("abc"));
        assert!(plan.as_structured().is_some());
    }

    #[test]
    fn test_sw001_script_extra_keys_survive() {
        let v = json!({
            "Type": "Application",
            "EntryPoint": "id1",
            "Files": ["id2"],
            "Version": "1.0.0",
            "Options": {"captureStdout": true}
        });
        let s: ScriptDescriptor = serde_json::from_value(v.clone()).unwrap();
        assert!(s.is_application());
        assert_eq!(s.extra["Version"], json!("1.0.0"));
        assert_eq!(serde_json::to_value(&s).unwrap(), v);
    }

    #[test]
    fn test_sw001_dangling_references() {
        let mut plan = StructuredPlan {
            id: "p".into(),
            format_version: "2.0.0".into(),
            action: "Execute".into(),
            body: None,
            parameters: IndexMap::new(),
            files: IndexMap::new(),
            scripts: IndexMap::new(),
            extra: Map::new(),
        };
        plan.scripts.insert(
            "deploy".into(),
            ScriptDescriptor {
                script_type: "Application".into(),
                entry_point: "missing".into(),
                files: vec![],
                action: None,
                extra: Map::new(),
            },
        );
        plan.scripts.insert(
            "chef".into(),
            ScriptDescriptor {
                script_type: "Chef".into(),
                entry_point: "recipe::default".into(),
                files: vec![],
                action: None,
                extra: Map::new(),
            },
        );
        assert_eq!(
            plan.dangling_references(),
            vec![("deploy".to_string(), "missing".to_string())]
        );
    }

    #[test]
    fn test_sw001_target_defaults_and_address() {
        let t: RemoteTarget = serde_yaml_ng::from_str("host: 10.0.0.5\n").unwrap();
        assert_eq!(t.username, "root");
        assert_eq!(t.port, None);
        assert_eq!(t.address(), Some("10.0.0.5"));

        let t = RemoteTarget {
            public_ips: vec!["".into(), "203.0.113.9".into()],
            ..RemoteTarget::new("10.0.0.5")
        };
        assert_eq!(t.address(), Some("203.0.113.9"));
        assert_eq!(RemoteTarget::new("  ").address(), None);
    }

    #[test]
    fn test_sw001_target_debug_redacts_secrets() {
        let t = RemoteTarget {
            password: Some("hunter2".into()),
            private_key: Some(KeyMaterial::Inline("-----BEGIN KEY-----".into())),
            ..RemoteTarget::new("h")
        };
        let dbg = format!("{:?}", t);
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("BEGIN KEY"));
    }

    #[test]
    fn test_sw001_state_transitions() {
        use ExecutionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(KeyStaged));
        assert!(KeyStaged.can_transition_to(ScriptRunning));
        assert!(ScriptRunning.can_transition_to(Succeeded));
        assert!(ScriptRunning.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(ScriptRunning));
        assert!(!KeyStaged.can_transition_to(Connecting));
        assert!(!ScriptRunning.can_transition_to(KeyStaged));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(Succeeded.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_sw001_event_serde() {
        let event = ExecutionEvent::StateChanged {
            host: "h".into(),
            from: ExecutionState::Idle,
            to: ExecutionState::Connecting,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"state_changed\""));
        assert!(json.contains("\"to\":\"connecting\""));
    }

    #[test]
    fn test_sw001_value_to_string() {
        assert_eq!(value_to_string(&json!("x")), "x");
        assert_eq!(value_to_string(&json!(8080)), "8080");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!(["a", 1])), "[\"a\",1]");
    }
}
