//! SW-012: BLAKE3 digests for plans and file bodies.
//!
//! Digests are rendered as `"blake3:{hex}"`. A plan digest covers the plan's
//! serialized form, so the same plan always hashes the same way and any edit
//! to a file body or script entry changes it.

use crate::core::types::ExecutionPlan;
use std::path::Path;

/// Hash raw bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Hash a string.
pub fn hash_string(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let data =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(hash_bytes(&data))
}

/// Digest of a compiled plan.
pub fn hash_plan(plan: &ExecutionPlan) -> Result<String, String> {
    let bytes =
        serde_json::to_vec(plan).map_err(|e| format!("cannot serialize plan: {}", e))?;
    Ok(hash_bytes(&bytes))
}
