//! SW-003: Resource resolution from relative paths to byte content.
//!
//! The compiler never touches the filesystem directly; every script and file
//! body comes through a [`ResourceResolver`]. Resolvers are read-only lookups.

use super::error::CompileError;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Byte-content lookup for relative resource paths.
pub trait ResourceResolver {
    /// Fetch the content stored at `path`, or `ResourceNotFound`.
    fn get(&self, path: &str) -> Result<Vec<u8>, CompileError>;
}

impl<R: ResourceResolver + ?Sized> ResourceResolver for &R {
    fn get(&self, path: &str) -> Result<Vec<u8>, CompileError> {
        (**self).get(path)
    }
}

/// Join a resolver root and a relative path with `/`.
pub fn join_resource_path(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if root.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", root, relative)
    }
}

/// Resolver over a directory on disk. Paths may not escape the root.
#[derive(Debug, Clone)]
pub struct DirResolver {
    root: PathBuf,
}

impl DirResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceResolver for DirResolver {
    fn get(&self, path: &str) -> Result<Vec<u8>, CompileError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(CompileError::ResourceNotFound(path.to_string()));
        }

        let full = self.root.join(relative);
        std::fs::read(&full).map_err(|e| {
            tracing::debug!(path = %full.display(), error = %e, "resource lookup failed");
            CompileError::ResourceNotFound(path.to_string())
        })
    }
}

/// In-memory resolver, for embedded bundles and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.entries.insert(path.into(), content.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceResolver for MemoryResolver {
    fn get(&self, path: &str) -> Result<Vec<u8>, CompileError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| CompileError::ResourceNotFound(path.to_string()))
    }
}
