// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document verification against an expected fingerprint and a timestamp
// token. Checks run in a fixed order: content, token structure, imprint.

use notarium_core::error::{NotariumError, ProtocolReason, Result};
use notarium_core::types::Fingerprint;
use notarium_security::integrity::digest;
use notarium_timestamp::codec::parse_token;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::builder::AuditPack;

/// Outcome of verifying a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    /// The document bytes do not hash to the expected fingerprint.
    ContentMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
    /// The token attests a different fingerprint than the document's.
    TimestampMismatch {
        attested: Fingerprint,
        actual: Fingerprint,
    },
    /// The token bytes are not a well-formed timestamp token.
    TokenInvalid { reason: String },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Valid => Ok(()),
            Verdict::ContentMismatch { expected, actual } => Err(NotariumError::IntegrityMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            }),
            Verdict::TimestampMismatch { attested, actual } => Err(NotariumError::protocol(
                ProtocolReason::ImprintMismatch,
                format!("token attests {attested}, document is {actual}"),
            )),
            Verdict::TokenInvalid { reason } => Err(NotariumError::protocol(
                ProtocolReason::MalformedDer,
                reason,
            )),
        }
    }
}

/// Verify `document` against `expected` and the DER token `token_der`.
#[instrument(skip_all, fields(expected = %expected, len = document.len()))]
pub fn verify(document: &[u8], expected: &Fingerprint, token_der: &[u8]) -> Verdict {
    let actual = digest(document);
    if &actual != expected {
        warn!(actual = %actual, "document content does not match expected fingerprint");
        return Verdict::ContentMismatch {
            expected: *expected,
            actual,
        };
    }

    let token = match parse_token(token_der) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "timestamp token rejected");
            return Verdict::TokenInvalid {
                reason: e.to_string(),
            };
        }
    };

    if token.imprint() != &actual {
        warn!(attested = %token.imprint(), "token attests a different fingerprint");
        return Verdict::TimestampMismatch {
            attested: *token.imprint(),
            actual,
        };
    }

    debug!(serial = token.serial(), "document verified");
    Verdict::Valid
}

/// Verify `document` against the fingerprint and token recorded in `pack`.
pub fn verify_pack(pack: &AuditPack, document: &[u8]) -> Verdict {
    verify(
        document,
        pack.document_fingerprint(),
        pack.timestamp_token().as_der(),
    )
}
