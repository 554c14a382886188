// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content addressing — SHA-256 fingerprints over raw bytes and over
// canonicalised structured payloads.

use notarium_core::error::{NotariumError, Result};
use notarium_core::types::Fingerprint;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of `data`.
///
/// Pure and deterministic: only the byte sequence matters.
pub fn digest(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Fingerprint::from_bytes(hasher.finalize().into())
}

/// Fingerprint of a structured value, independent of map key order.
///
/// The value is converted to JSON, every object is rebuilt with its keys in
/// lexicographic order, and the compact encoding is hashed. Two payloads that
/// differ only in the order their fields were inserted hash identically.
/// Sequence order is preserved and is significant.
pub fn digest_of<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint> {
    Ok(digest(canonical_json(value)?.as_bytes()))
}

/// The canonical compact JSON encoding used by [`digest_of`].
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value =
        serde_json::to_value(value).map_err(|e| NotariumError::Canonicalization(e.to_string()))?;
    serde_json::to_string(&canonicalize(value))
        .map_err(|e| NotariumError::Canonicalization(e.to_string()))
}

// serde_json's map may preserve insertion order when another crate in the
// graph enables `preserve_order`, so ordering is enforced here explicitly.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// SHA-256 of `data` as a lowercase hex string.
pub fn hash_hex(data: &[u8]) -> String {
    digest(data).to_hex()
}

/// Verify that `data` matches the expected SHA-256 hex digest.
///
/// Returns `Err(NotariumError::IntegrityMismatch)` with the expected and
/// actual values when it does not.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_hex(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(NotariumError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}
