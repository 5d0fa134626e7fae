//! Canonical JSON serialization.
//!
//! Witness and bundle files are committed to by hash, so two
//! independent implementations must serialize the same logical record
//! to the same bytes. Canonical form here is compact JSON with
//! lexicographically sorted object keys and no floating-point fields
//! in committed records (diagnostics carry fixed-point integers).

use crate::ProofError;
use serde::Serialize;

/// Serialize a value to canonical JSON bytes.
///
/// The value is first lowered to a `serde_json::Value`; object maps in
/// `serde_json` are `BTreeMap`-backed, which yields sorted keys on
/// output. Compact separators, UTF-8, no trailing newline.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ProofError> {
    let tree = serde_json::to_value(value).map_err(|e| ProofError::Canon(e.to_string()))?;
    serde_json::to_vec(&tree).map_err(|e| ProofError::Canon(e.to_string()))
}

/// Serialize to a canonical JSON string.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, ProofError> {
    let bytes = to_canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| ProofError::Canon(e.to_string()))
}
