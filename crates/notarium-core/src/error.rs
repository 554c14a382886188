// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Notarium.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ErrorClass, Fingerprint};

/// Reason codes carried by [`NotariumError::Protocol`].
///
/// These are stable identifiers suitable for audit logging; the free-form
/// `detail` string next to them is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolReason {
    /// Bytes are not a well-formed DER structure of the expected shape.
    MalformedDer,
    /// A version field holds a value we do not speak.
    UnsupportedVersion,
    /// Message imprint uses a hash algorithm other than SHA-256.
    UnsupportedAlgorithm,
    /// ContentInfo / encapsulated content type is not the TSTInfo chain.
    UnexpectedContentType,
    /// Status says granted but no token was attached.
    MissingToken,
    /// Token attests to a different fingerprint than the one requested.
    ImprintMismatch,
    /// A nonce was sent but the token does not carry one.
    NonceMissing,
    /// The token carries a different nonce than the one sent.
    NonceMismatch,
    /// The token was issued under a different policy than requested.
    PolicyMismatch,
    /// PKI status 2 (rejection).
    StatusRejected,
    /// PKI status 3 (waiting): the TSA is busy, try again later.
    StatusWaiting,
    /// PKI status 1 while policy demands an exact grant.
    GrantedWithModifications,
    /// PKI status 4 or 5 (revocation warning / notification).
    RevocationWarning,
    /// PKI status outside the range defined by the protocol.
    UnknownStatus,
    /// The TSA endpoint answered with a non-retryable HTTP status.
    HttpStatus,
}

impl ProtocolReason {
    /// Stable snake_case code for audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedDer => "malformed_der",
            Self::UnsupportedVersion => "unsupported_version",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::UnexpectedContentType => "unexpected_content_type",
            Self::MissingToken => "missing_token",
            Self::ImprintMismatch => "imprint_mismatch",
            Self::NonceMissing => "nonce_missing",
            Self::NonceMismatch => "nonce_mismatch",
            Self::PolicyMismatch => "policy_mismatch",
            Self::StatusRejected => "status_rejected",
            Self::StatusWaiting => "status_waiting",
            Self::GrantedWithModifications => "granted_with_modifications",
            Self::RevocationWarning => "revocation_warning",
            Self::UnknownStatus => "unknown_status",
            Self::HttpStatus => "http_status",
        }
    }
}

impl fmt::Display for ProtocolReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Top-level error type for all Notarium operations.
#[derive(Debug, Error)]
pub enum NotariumError {
    // -- Timestamping --
    #[error("timestamp protocol error ({reason}): {detail}")]
    Protocol {
        reason: ProtocolReason,
        detail: String,
    },

    #[error("time-stamp authority unavailable after {attempts} attempt(s): {last_error}")]
    TimestampUnavailable { attempts: u32, last_error: String },

    #[error("timestamp request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("TSA transport failed: {0}")]
    Transport(String),

    #[error("system random number generator failed: {0}")]
    Randomness(String),

    // -- Idempotency --
    #[error("idempotency key '{key}' reused with a different payload (stored {stored}, presented {presented})")]
    IdempotencyConflict {
        key: String,
        stored: Fingerprint,
        presented: Fingerprint,
    },

    #[error("idempotency key '{key}' already has a live entry")]
    DuplicateEntry { key: String },

    // -- Integrity --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("cannot canonicalize payload: {0}")]
    Canonicalization(String),

    #[error("audit pack already exists for {0}")]
    PackExists(String),

    // -- Storage / persistence --
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NotariumError {
    /// Shorthand for a protocol error.
    pub fn protocol(reason: ProtocolReason, detail: impl Into<String>) -> Self {
        Self::Protocol {
            reason,
            detail: detail.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only transport failures and a TSA "waiting" status are transient.
    /// Everything else describes the content of a response or a caller
    /// mistake and will fail the same way again.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transient,
            Self::Protocol {
                reason: ProtocolReason::StatusWaiting,
                ..
            } => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Stable code for audit records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Protocol { reason, .. } => reason.code(),
            Self::TimestampUnavailable { .. } => "timestamp_unavailable",
            Self::Cancelled { .. } => "cancelled",
            Self::Transport(_) => "transport",
            Self::Randomness(_) => "randomness",
            Self::IdempotencyConflict { .. } => "idempotency_conflict",
            Self::DuplicateEntry { .. } => "duplicate_entry",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::Canonicalization(_) => "canonicalization",
            Self::PackExists(_) => "pack_exists",
            Self::NotFound(_) => "not_found",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NotariumError>;
