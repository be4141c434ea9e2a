//! SW-004: File descriptor builder.
//!
//! A file reference in a template is one of:
//! - a relative path (`lib/util.sh`), embedded as text
//! - an angle-bracketed path (`<tool.bin>`), embedded base64-encoded
//! - an absolute URL (`https://host/pkg.tgz`), fetched by the target host
//! - a single-entry mapping `{stored-name: location}` of any of the above
//!
//! A location is downloadable only if it parses as a URL with both a scheme
//! and a host. Everything else is read through the resolver, so untrusted
//! strings never cause network access on the compiling side.

use super::error::CompileError;
use super::resolver::{join_resource_path, ResourceResolver};
use super::types::{BodyType, FileDescriptor, FileId, FileKind};
use base64::Engine as _;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// A file reference as written in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Plain(String),
    Named { name: String, location: String },
}

impl FileRef {
    /// Parse a template value: a string or a single-entry string mapping.
    pub fn from_value(value: &Value) -> Result<Self, CompileError> {
        match value {
            Value::String(s) => Ok(Self::Plain(s.clone())),
            Value::Object(map) if map.len() == 1 => {
                let (name, location) = map
                    .iter()
                    .next()
                    .ok_or_else(|| CompileError::invalid("empty file mapping"))?;
                match location {
                    Value::String(location) => Ok(Self::Named {
                        name: name.clone(),
                        location: location.clone(),
                    }),
                    other => Err(CompileError::invalid(format!(
                        "file '{}' location must be a string, got {}",
                        name, other
                    ))),
                }
            }
            other => Err(CompileError::invalid(format!(
                "file reference must be a string or a single-entry mapping, got {}",
                other
            ))),
        }
    }

    /// Where the content lives: a resolver path, a bracketed path or a URL.
    pub fn location(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Named { location, .. } => location,
        }
    }

    /// Name the file is stored under on the target and deduplicated by.
    pub fn logical_name(&self) -> String {
        let raw = match self {
            Self::Plain(s) => s.as_str(),
            Self::Named { name, .. } => name.as_str(),
        };
        if is_url(raw) {
            raw.rsplit('/').next().unwrap_or(raw).to_string()
        } else {
            strip_brackets(raw).unwrap_or(raw).to_string()
        }
    }
}

/// True iff `location` is an absolute URL with a non-empty scheme and host.
///
/// The authority must be spelled out as `scheme://host`. WHATWG parsing
/// alone would accept `http:host/x`, `http:/host/x` and backslash
/// separators, inventing a host the string never states.
pub fn is_url(location: &str) -> bool {
    if location.contains('\\') {
        return false;
    }
    match url::Url::parse(location) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            !scheme.is_empty()
                && location
                    .get(scheme.len()..)
                    .is_some_and(|rest| rest.starts_with("://"))
                && parsed.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// `<path>` marks content to embed base64-encoded.
pub fn is_base64_wrapped(location: &str) -> bool {
    strip_brackets(location).is_some()
}

fn strip_brackets(s: &str) -> Option<&str> {
    s.strip_prefix('<').and_then(|rest| rest.strip_suffix('>'))
}

/// Generate a fresh opaque identifier (32 lowercase hex chars).
pub fn new_file_id() -> FileId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Logical name of `file`; a reference that yields no name cannot be staged.
fn checked_name(file: &FileRef) -> Result<String, CompileError> {
    let name = file.logical_name();
    if name.is_empty() {
        return Err(CompileError::invalid(format!(
            "file reference '{}' has no file name",
            file.location()
        )));
    }
    Ok(name)
}

/// Build the descriptor for a single reference, reading inline content from
/// `resolver` under `scripts_root`.
pub fn describe_file<R: ResourceResolver + ?Sized>(
    file: &FileRef,
    resolver: &R,
    scripts_root: &str,
) -> Result<FileDescriptor, CompileError> {
    let name = checked_name(file)?;
    let location = file.location();

    if is_url(location) {
        return Ok(FileDescriptor::Downloadable {
            name,
            url: location.to_string(),
            kind: FileKind::Downloadable,
        });
    }

    let (path, body_type) = match strip_brackets(location) {
        Some(inner) => (inner, BodyType::Base64),
        None => (location, BodyType::Text),
    };
    let content = resolver.get(&join_resource_path(scripts_root, path))?;
    let body = match body_type {
        BodyType::Base64 => base64::engine::general_purpose::STANDARD.encode(&content),
        BodyType::Text => String::from_utf8(content).map_err(|_| {
            CompileError::invalid(format!(
                "file '{}' is not UTF-8 text; wrap it as <{}> for base64",
                name, path
            ))
        })?,
    };

    Ok(FileDescriptor::Inline {
        name,
        body_type,
        body,
    })
}

/// Describe a reference and give it a fresh id.
pub fn place<R: ResourceResolver + ?Sized>(
    file: &FileRef,
    resolver: &R,
    scripts_root: &str,
) -> Result<(FileId, FileDescriptor), CompileError> {
    let descriptor = describe_file(file, resolver, scripts_root)?;
    Ok((new_file_id(), descriptor))
}

/// Per-compilation file table. Identical logical names map to one id.
pub struct FilePlacer<'a, R: ResourceResolver + ?Sized> {
    resolver: &'a R,
    scripts_root: &'a str,
    files: IndexMap<FileId, FileDescriptor>,
    by_name: HashMap<String, FileId>,
}

impl<'a, R: ResourceResolver + ?Sized> FilePlacer<'a, R> {
    /// Start from an existing file table (e.g. a previously compiled plan).
    pub fn new(
        resolver: &'a R,
        scripts_root: &'a str,
        existing: IndexMap<FileId, FileDescriptor>,
    ) -> Self {
        let by_name = existing
            .iter()
            .map(|(id, descriptor)| (descriptor.name().to_string(), id.clone()))
            .collect();
        Self {
            resolver,
            scripts_root,
            files: existing,
            by_name,
        }
    }

    /// Id for `file`, placing it on first sight of its logical name.
    pub fn place(&mut self, file: &FileRef) -> Result<FileId, CompileError> {
        let name = checked_name(file)?;
        if let Some(id) = self.by_name.get(&name) {
            debug!(file = %name, id = %id, "reusing placed file");
            return Ok(id.clone());
        }

        let (id, descriptor) = place(file, self.resolver, self.scripts_root)?;
        debug!(
            file = %name,
            id = %id,
            downloadable = descriptor.is_downloadable(),
            "placed file"
        );
        self.by_name.insert(name, id.clone());
        self.files.insert(id.clone(), descriptor);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> IndexMap<FileId, FileDescriptor> {
        self.files
    }
}
