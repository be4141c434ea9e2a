//! Provenance: BLAKE3 plan digests and the JSONL execution audit trail.

pub mod eventlog;
pub mod hasher;
