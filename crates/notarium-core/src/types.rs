// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Notarium trust layer.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::NotariumError;

/// Length in bytes of a SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest of a byte sequence. The sole integrity anchor for a
/// document, a request payload, or an audit pack.
///
/// Displayed and serialised as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; FINGERPRINT_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Parse 64 hex characters (either case).
    pub fn from_hex(s: &str) -> Result<Self, NotariumError> {
        let raw = hex::decode(s).map_err(|e| NotariumError::IntegrityMismatch {
            expected: "64 hex characters".into(),
            actual: format!("{s:?} ({e})"),
        })?;
        Self::from_slice(&raw).ok_or_else(|| NotariumError::IntegrityMismatch {
            expected: format!("{FINGERPRINT_LEN} bytes"),
            actual: format!("{} bytes", raw.len()),
        })
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = NotariumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifies one published version of a regulated document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: String,
    pub version: String,
}

impl DocumentVersion {
    pub fn new(document_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.document_id, self.version)
    }
}

/// An attestation record supplied by the external review workflow.
///
/// Notarium only aggregates and fingerprints these; status transitions are
/// the workflow's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    /// Role or entry type (e.g. "author", "qa-review", "approval").
    pub role: String,
    /// Identifier of the attestation in the external workflow.
    pub external_id: String,
    /// Workflow status at the time of submission.
    pub status: String,
    pub date: NaiveDate,
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip, timeout or busy TSA. Safe to retry automatically.
    Transient,
    /// Bad response content or caller mistake. Retrying cannot help.
    Permanent,
}
