// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit-pack assembly.
//
// A pack is only ever built from a token whose imprint equals the
// fingerprint of the document bytes presented at build time. The token is
// re-parsed from its DER here rather than trusting the caller's parse.

use chrono::{DateTime, Utc};
use notarium_core::error::{NotariumError, Result};
use notarium_core::types::{ChecklistEntry, DocumentVersion, Fingerprint};
use notarium_security::integrity::{digest, digest_of};
use notarium_timestamp::codec::parse_token;
use notarium_timestamp::token::TimestampToken;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Immutable evidence bundle for one document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPack {
    document_version: DocumentVersion,
    document_fingerprint: Fingerprint,
    checklist_entries: Vec<ChecklistEntry>,
    timestamp_token: TimestampToken,
    built_at: DateTime<Utc>,
}

/// Everything the pack fingerprint covers (all fields but `built_at`).
#[derive(Serialize)]
struct FingerprintedFields<'a> {
    document_version: &'a DocumentVersion,
    document_fingerprint: &'a Fingerprint,
    checklist_entries: &'a [ChecklistEntry],
    timestamp_token: &'a TimestampToken,
}

impl AuditPack {
    pub fn document_version(&self) -> &DocumentVersion {
        &self.document_version
    }

    pub fn document_fingerprint(&self) -> &Fingerprint {
        &self.document_fingerprint
    }

    pub fn checklist_entries(&self) -> &[ChecklistEntry] {
        &self.checklist_entries
    }

    pub fn timestamp_token(&self) -> &TimestampToken {
        &self.timestamp_token
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Canonical fingerprint of the pack's content.
    ///
    /// Two builds from the same inputs share a fingerprint even when built
    /// at different times.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        digest_of(&FingerprintedFields {
            document_version: &self.document_version,
            document_fingerprint: &self.document_fingerprint,
            checklist_entries: &self.checklist_entries,
            timestamp_token: &self.timestamp_token,
        })
    }

    pub fn verify_fingerprint(&self, expected: &Fingerprint) -> Result<()> {
        let actual = self.fingerprint()?;
        if &actual == expected {
            Ok(())
        } else {
            Err(NotariumError::IntegrityMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            })
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a pack and re-check that its token attests its document
    /// fingerprint.
    pub fn from_json(json: &str) -> Result<Self> {
        let pack: Self = serde_json::from_str(json)?;
        check_binding(pack.timestamp_token.imprint(), &pack.document_fingerprint)?;
        Ok(pack)
    }
}

fn check_binding(attested: &Fingerprint, document: &Fingerprint) -> Result<()> {
    if attested == document {
        Ok(())
    } else {
        Err(NotariumError::IntegrityMismatch {
            expected: attested.to_hex(),
            actual: document.to_hex(),
        })
    }
}

/// Assembles [`AuditPack`]s.
#[derive(Debug, Clone, Default)]
pub struct AuditPackBuilder {
    built_at: Option<DateTime<Utc>>,
}

impl AuditPackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the build time instead of reading the clock.
    pub fn at(mut self, built_at: DateTime<Utc>) -> Self {
        self.built_at = Some(built_at);
        self
    }

    /// Build a pack, failing with `IntegrityMismatch` if `token` does not
    /// attest the fingerprint of `document`.
    ///
    /// Entry order is preserved.
    #[instrument(skip_all, fields(version = %version, entries = entries.len()))]
    pub fn build(
        &self,
        version: DocumentVersion,
        document: &[u8],
        entries: Vec<ChecklistEntry>,
        token: &TimestampToken,
    ) -> Result<AuditPack> {
        let document_fingerprint = digest(document);
        let reparsed = parse_token(token.as_der())?;
        check_binding(reparsed.imprint(), &document_fingerprint)?;

        let pack = AuditPack {
            document_version: version,
            document_fingerprint,
            checklist_entries: entries,
            timestamp_token: reparsed,
            built_at: self.built_at.unwrap_or_else(Utc::now),
        };
        info!(
            fingerprint = %document_fingerprint,
            serial = pack.timestamp_token.serial(),
            "audit pack built"
        );
        Ok(pack)
    }
}
