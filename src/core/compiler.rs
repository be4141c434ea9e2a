//! SW-005: Execution plan compiler.
//!
//! `FormatVersion` is read once and selects one of two independent paths:
//! - legacy (absent, empty or `1.*`): each name in `Scripts` is read from the
//!   scripts root and base64-encoded into a flat list
//! - structured (anything else): scripts reference a file table by id; every
//!   logical file name is placed once and shared
//!
//! The caller's template is never modified. Either a complete plan is
//! returned or nothing is.

use super::config::CompilerConfig;
use super::error::CompileError;
use super::files::{FilePlacer, FileRef};
use super::resolver::{join_resource_path, ResourceResolver};
use super::types::*;
use base64::Engine as _;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Major-version prefix that selects the legacy path.
pub const LEGACY_VERSION_PREFIX: &str = "1.";

/// Action assigned to structured plans that declare none.
pub const DEFAULT_ACTION: &str = "Execute";

/// Plan format, resolved once from `FormatVersion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanFormat {
    Legacy(Option<String>),
    Structured(String),
}

impl PlanFormat {
    /// Prefix match on the major component only; no semver parsing.
    pub fn detect(template: &Map<String, Value>) -> Result<Self, CompileError> {
        let version = match template.get("FormatVersion") {
            None | Some(Value::Null) => return Ok(Self::Legacy(None)),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(CompileError::invalid(format!(
                    "FormatVersion must be a string, got {}",
                    other
                )))
            }
        };

        if version.is_empty() {
            Ok(Self::Legacy(None))
        } else if version.starts_with(LEGACY_VERSION_PREFIX) {
            Ok(Self::Legacy(Some(version)))
        } else {
            Ok(Self::Structured(version))
        }
    }
}

/// Compiles templates into execution plans.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `template`, reading referenced content through `resolver`.
    pub fn compile<R: ResourceResolver + ?Sized>(
        &self,
        template: &Template,
        resolver: &R,
    ) -> Result<ExecutionPlan, CompileError> {
        let Value::Object(map) = template else {
            return Err(CompileError::invalid(format!(
                "template must be a mapping, got {}",
                value_kind(template)
            )));
        };
        let map = map.clone();
        let root = self.config.scripts_root.as_str();

        match PlanFormat::detect(&map)? {
            PlanFormat::Legacy(version) => {
                compile_legacy(map, version, resolver, root).map(ExecutionPlan::Legacy)
            }
            PlanFormat::Structured(version) => {
                compile_structured(map, version, resolver, root).map(ExecutionPlan::Structured)
            }
        }
    }
}

/// Compile with the default configuration.
pub fn compile<R: ResourceResolver + ?Sized>(
    template: &Template,
    resolver: &R,
) -> Result<ExecutionPlan, CompileError> {
    Compiler::default().compile(template, resolver)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

// ============================================================================
// Legacy (v1)
// ============================================================================

fn compile_legacy<R: ResourceResolver + ?Sized>(
    mut template: Map<String, Value>,
    format_version: Option<String>,
    resolver: &R,
    root: &str,
) -> Result<LegacyPlan, CompileError> {
    template.remove("FormatVersion");
    let names = legacy_script_names(template.remove("Scripts"))?;

    let mut scripts = Vec::with_capacity(names.len());
    for name in &names {
        let content = resolver.get(&join_resource_path(root, name))?;
        scripts.push(base64::engine::general_purpose::STANDARD.encode(content));
    }

    info!(scripts = scripts.len(), "compiled legacy execution plan");
    Ok(LegacyPlan {
        format_version,
        scripts,
        extra: template,
    })
}

fn legacy_script_names(scripts: Option<Value>) -> Result<Vec<String>, CompileError> {
    match scripts {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(CompileError::invalid(format!(
                    "legacy script names must be strings, got {}",
                    other
                ))),
            })
            .collect(),
        Some(Value::Object(map)) => Ok(map.into_iter().map(|(name, _)| name).collect()),
        Some(other) => Err(CompileError::invalid(format!(
            "Scripts must be a list or mapping, got {}",
            value_kind(&other)
        ))),
    }
}

// ============================================================================
// Structured (v2)
// ============================================================================

/// A script entry after shape validation, before any resolver access.
struct PendingScript {
    name: String,
    script_type: String,
    entry_point: FileRef,
    files: Vec<FileRef>,
    action: Option<String>,
    extra: Map<String, Value>,
}

fn compile_structured<R: ResourceResolver + ?Sized>(
    mut template: Map<String, Value>,
    format_version: String,
    resolver: &R,
    root: &str,
) -> Result<StructuredPlan, CompileError> {
    template.remove("FormatVersion");
    template.remove("ID");

    let action = optional_string(template.remove("Action"), "Action")?
        .unwrap_or_else(|| DEFAULT_ACTION.to_string());
    let body = optional_string(template.remove("Body"), "Body")?;
    let parameters = parameters(template.remove("Parameters"))?;
    let existing = existing_files(template.remove("Files"))?;
    let pending = pending_scripts(template.remove("Scripts"))?;

    let mut placer = FilePlacer::new(resolver, root, existing);
    let mut scripts = IndexMap::with_capacity(pending.len());
    for script in pending {
        let entry_point = if is_application_type(&script.script_type) {
            placer.place(&script.entry_point)?
        } else {
            script.entry_point.location().to_string()
        };
        let files = script
            .files
            .iter()
            .map(|f| placer.place(f))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(script = %script.name, files = files.len(), "compiled script");

        scripts.insert(
            script.name,
            ScriptDescriptor {
                script_type: script.script_type,
                entry_point,
                files,
                action: script.action,
                extra: script.extra,
            },
        );
    }

    let plan = StructuredPlan {
        id: new_plan_id(),
        format_version,
        action,
        body,
        parameters,
        files: placer.into_files(),
        scripts,
        extra: template,
    };

    if let Some((script, id)) = plan.dangling_references().into_iter().next() {
        return Err(CompileError::invalid(format!(
            "script '{}' references unknown file '{}'",
            script, id
        )));
    }

    info!(
        plan_id = %plan.id,
        files = plan.files.len(),
        scripts = plan.scripts.len(),
        "compiled structured execution plan"
    );
    Ok(plan)
}

/// Fresh plan identifier (32 lowercase hex chars).
pub fn new_plan_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn optional_string(value: Option<Value>, key: &str) -> Result<Option<String>, CompileError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(CompileError::invalid(format!(
            "{} must be a string, got {}",
            key,
            value_kind(&other)
        ))),
    }
}

fn parameters(value: Option<Value>) -> Result<IndexMap<String, Value>, CompileError> {
    match value {
        None | Some(Value::Null) => Ok(IndexMap::new()),
        Some(Value::Object(map)) => Ok(map.into_iter().collect()),
        Some(other) => Err(CompileError::invalid(format!(
            "Parameters must be a mapping, got {}",
            value_kind(&other)
        ))),
    }
}

fn existing_files(
    value: Option<Value>,
) -> Result<IndexMap<FileId, FileDescriptor>, CompileError> {
    let map = match value {
        None | Some(Value::Null) => return Ok(IndexMap::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(CompileError::invalid(format!(
                "Files must be a mapping of id to descriptor, got {}",
                value_kind(&other)
            )))
        }
    };

    map.into_iter()
        .map(|(id, descriptor)| {
            serde_json::from_value::<FileDescriptor>(descriptor)
                .map(|d| (id.clone(), d))
                .map_err(|e| CompileError::invalid(format!("file '{}': {}", id, e)))
        })
        .collect()
}

/// Validate every script's shape before the resolver is consulted for any.
fn pending_scripts(value: Option<Value>) -> Result<Vec<PendingScript>, CompileError> {
    let map = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(CompileError::invalid(format!(
                "Scripts must be a mapping, got {}",
                value_kind(&other)
            )))
        }
    };

    let mut pending = Vec::with_capacity(map.len());
    for (name, script) in map {
        let Value::Object(mut script) = script else {
            return Err(CompileError::invalid(format!(
                "script '{}' must be a mapping",
                name
            )));
        };

        let entry_point = match script.remove("EntryPoint") {
            None | Some(Value::Null) => return Err(CompileError::MissingEntryPoint(name)),
            Some(v) => FileRef::from_value(&v)?,
        };
        let script_type = optional_string(script.remove("Type"), "Type")?
            .ok_or_else(|| CompileError::invalid(format!("script '{}' has no Type", name)))?;
        if !is_application_type(&script_type) && !matches!(entry_point, FileRef::Plain(_)) {
            return Err(CompileError::invalid(format!(
                "script '{}' entry point must be a plain name for type {}",
                name, script_type
            )));
        }

        let files = match script.remove("Files") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(FileRef::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(CompileError::invalid(format!(
                    "script '{}' Files must be a list, got {}",
                    name,
                    value_kind(&other)
                )))
            }
        };
        let action = optional_string(script.remove("Action"), "Action")?;

        pending.push(PendingScript {
            name,
            script_type,
            entry_point,
            files,
            action,
            extra: script,
        });
    }
    Ok(pending)
}
