// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — at-most-once write operations over the trust layer.
//
// Every write operation follows the same shape: fingerprint the payload,
// ask the idempotency store for admission, run the side effect only when
// admitted to execute, and record the response only when it succeeded. The
// store is consulted before and after the TSA exchange and never locked
// during it.
//
// The audit trail (rusqlite) is `Send` but not `Sync`, so it is wrapped in
// `Arc<Mutex<>>`; its lock is never held across an await point.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use notarium_core::blob::BlobStore;
use notarium_core::config::NotariumConfig;
use notarium_core::error::{NotariumError, Result};
use notarium_core::types::{ChecklistEntry, DocumentVersion, Fingerprint};
use notarium_pack::builder::AuditPackBuilder;
use notarium_pack::verify::{Verdict, verify};
use notarium_security::audit::{AuditEntry, AuditTrail};
use notarium_security::idempotency::{Admission, IdempotencyStore};
use notarium_security::integrity::{digest, digest_of};
use notarium_timestamp::client::TimestampClient;
use notarium_timestamp::token::TimestampToken;
use notarium_timestamp::transport::{HttpTransport, TsaTransport};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::layout;
use crate::locks::KeyedLocks;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Result of a successful stamping operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampReceipt {
    pub fingerprint: Fingerprint,
    pub token: TimestampToken,
    /// Blob path the DER token was written to.
    pub token_path: String,
}

/// Result of a successful checklist submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistReceipt {
    pub version: DocumentVersion,
    pub entries_fingerprint: Fingerprint,
    pub entry_count: usize,
    pub path: String,
}

/// Result of a successful audit-pack generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReceipt {
    pub version: DocumentVersion,
    pub pack_fingerprint: Fingerprint,
    pub path: String,
    pub built_at: DateTime<Utc>,
}

/// Response snapshot kept by the idempotency store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    Stamped(StampReceipt),
    ChecklistAccepted(ChecklistReceipt),
    PackGenerated(PackReceipt),
}

// Payloads are fingerprinted together with the operation name so one key
// cannot replay a response of another kind.

#[derive(Serialize)]
struct StampPayload {
    operation: &'static str,
    document: Fingerprint,
}

#[derive(Serialize)]
struct ChecklistPayload<'a> {
    operation: &'static str,
    version: &'a DocumentVersion,
    entries: &'a [ChecklistEntry],
}

#[derive(Serialize)]
struct PackPayload<'a> {
    operation: &'static str,
    version: &'a DocumentVersion,
    document: Fingerprint,
    entries: &'a [ChecklistEntry],
    token: &'a TimestampToken,
}

const STAMP: &str = "stamp";
const SUBMIT_CHECKLIST: &str = "submit_checklist";
const AUDIT_PACK: &str = "audit_pack";
const VERIFY: &str = "verify";

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The Notarium trust layer as one shareable service object.
pub struct NotaryService<T> {
    store: IdempotencyStore<ServiceResponse>,
    client: TimestampClient<T>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<Mutex<AuditTrail>>,
    builder: AuditPackBuilder,
    /// Serialises pack generation per document version across keys.
    pack_locks: KeyedLocks,
    use_nonce: bool,
}

impl NotaryService<HttpTransport> {
    /// Build the production service: HTTP TSA client, audit trail at the
    /// configured path (in memory when unset).
    pub fn from_config(config: &NotariumConfig, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let client = TimestampClient::from_config(&config.timestamp)?;
        let audit = match &config.audit_db_path {
            Some(path) => AuditTrail::open(path)?,
            None => AuditTrail::open_in_memory()?,
        };
        info!(tsa = %config.timestamp.tsa_url, "notary service initialised");
        Ok(Self::new(client, blobs, audit, config))
    }
}

impl<T: TsaTransport> NotaryService<T> {
    pub fn new(
        client: TimestampClient<T>,
        blobs: Arc<dyn BlobStore>,
        audit: AuditTrail,
        config: &NotariumConfig,
    ) -> Self {
        Self {
            store: IdempotencyStore::new(config.idempotency.ttl()),
            client,
            blobs,
            audit: Arc::new(Mutex::new(audit)),
            builder: AuditPackBuilder::new(),
            pack_locks: KeyedLocks::new(),
            use_nonce: config.timestamp.use_nonce,
        }
    }

    /// The idempotency store, for the sweeper and diagnostics.
    pub fn store(&self) -> &IdempotencyStore<ServiceResponse> {
        &self.store
    }

    pub fn client(&self) -> &TimestampClient<T> {
        &self.client
    }

    // -- Write operations ----------------------------------------------------

    /// Obtain a timestamp token for `document` and store it.
    ///
    /// Retrying with the same key and document replays the first token; a
    /// cancelled or failed attempt records nothing.
    #[instrument(skip(self, document, cancel), fields(len = document.len()))]
    pub async fn stamp(
        &self,
        key: &str,
        document: &[u8],
        cancel: &CancellationToken,
    ) -> Result<StampReceipt> {
        let fingerprint = digest(document);
        let payload = digest_of(&StampPayload {
            operation: STAMP,
            document: fingerprint,
        })?;

        let execute = async {
            let token = self
                .client
                .request_timestamp_cancellable(fingerprint, self.use_nonce, cancel)
                .await?;
            let token_path = layout::token_path(&fingerprint, token.serial());
            self.blobs.write(&token_path, token.as_der())?;
            Ok::<_, NotariumError>(ServiceResponse::Stamped(StampReceipt {
                fingerprint,
                token,
                token_path,
            }))
        };

        match self.admit(STAMP, key, fingerprint, payload, execute).await? {
            ServiceResponse::Stamped(receipt) => Ok(receipt),
            _ => Err(kind_mismatch(key, payload)),
        }
    }

    /// Store the checklist entries attesting to `version`.
    #[instrument(skip(self, entries), fields(version = %version, entries = entries.len()))]
    pub async fn submit_checklist(
        &self,
        key: &str,
        version: &DocumentVersion,
        entries: &[ChecklistEntry],
    ) -> Result<ChecklistReceipt> {
        let entries_fingerprint = digest_of(entries)?;
        let payload = digest_of(&ChecklistPayload {
            operation: SUBMIT_CHECKLIST,
            version,
            entries,
        })?;

        let execute = async {
            let path = layout::checklist_path(version);
            self.blobs.write(&path, serde_json::to_string(entries)?.as_bytes())?;
            Ok::<_, NotariumError>(ServiceResponse::ChecklistAccepted(ChecklistReceipt {
                version: version.clone(),
                entries_fingerprint,
                entry_count: entries.len(),
                path,
            }))
        };

        match self
            .admit(SUBMIT_CHECKLIST, key, entries_fingerprint, payload, execute)
            .await?
        {
            ServiceResponse::ChecklistAccepted(receipt) => Ok(receipt),
            _ => Err(kind_mismatch(key, payload)),
        }
    }

    /// Build and store the audit pack for `version`.
    ///
    /// Fails with `PackExists` if a pack for this version is already stored
    /// (unless this is a replay of the request that stored it), and with
    /// `IntegrityMismatch` if `token` does not attest `document`.
    #[instrument(skip(self, document, entries, token), fields(version = %version))]
    pub async fn generate_audit_pack(
        &self,
        key: &str,
        version: &DocumentVersion,
        document: &[u8],
        entries: &[ChecklistEntry],
        token: &TimestampToken,
    ) -> Result<PackReceipt> {
        let document_fingerprint = digest(document);
        let payload = digest_of(&PackPayload {
            operation: AUDIT_PACK,
            version,
            document: document_fingerprint,
            entries,
            token,
        })?;

        let execute = async {
            let path = layout::pack_path(version);
            // Held until the pack is written: requests for one version under
            // different keys must not both pass the existence check.
            let _version_guard = self.pack_locks.lock(&path).await;
            if self.blobs.exists(&path)? {
                return Err(NotariumError::PackExists(version.to_string()));
            }
            let pack = self
                .builder
                .build(version.clone(), document, entries.to_vec(), token)?;
            let pack_fingerprint = pack.fingerprint()?;
            self.blobs.write(&path, pack.to_json()?.as_bytes())?;
            Ok::<_, NotariumError>(ServiceResponse::PackGenerated(PackReceipt {
                version: version.clone(),
                pack_fingerprint,
                path,
                built_at: pack.built_at(),
            }))
        };

        match self
            .admit(AUDIT_PACK, key, document_fingerprint, payload, execute)
            .await?
        {
            ServiceResponse::PackGenerated(receipt) => Ok(receipt),
            _ => Err(kind_mismatch(key, payload)),
        }
    }

    // -- Read operations -----------------------------------------------------

    /// Verify `document` against `expected` and a DER token. Read-only, so
    /// not subject to idempotency; the verdict is audited.
    pub fn verify(&self, document: &[u8], expected: &Fingerprint, token_der: &[u8]) -> Verdict {
        let verdict = verify(document, expected, token_der);
        match verdict.clone().into_result() {
            Ok(()) => self.audit(VERIFY, expected, None, Some("valid")),
            Err(e) => self.audit(VERIFY, expected, Some(&e), None),
        }
        verdict
    }

    /// Audit entries recorded for `fingerprint`, oldest first.
    pub fn audit_entries_for(&self, fingerprint: &Fingerprint) -> Result<Vec<AuditEntry>> {
        self.trail().entries_for(&fingerprint.to_hex())
    }

    /// The most recent audit entries, newest first.
    pub fn recent_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.trail().recent(limit)
    }

    // -- Internals -----------------------------------------------------------

    /// Run `execute` at most once per (`key`, `payload`).
    ///
    /// `execute` is only polled when this caller is admitted to run it; the
    /// reservation is completed on success and dropped (releasing the key)
    /// on failure.
    async fn admit<F>(
        &self,
        action: &str,
        key: &str,
        subject: Fingerprint,
        payload: Fingerprint,
        execute: F,
    ) -> Result<ServiceResponse>
    where
        F: Future<Output = Result<ServiceResponse>>,
    {
        let admission = match self.store.begin(key, payload).await {
            Ok(admission) => admission,
            Err(e) => {
                self.audit(action, &subject, Some(&e), None);
                return Err(e);
            }
        };

        match admission {
            Admission::Replay(response) => {
                info!(action, key, "replaying recorded response");
                self.audit(action, &subject, None, Some("replayed"));
                Ok(response)
            }
            Admission::Execute(reservation) => match execute.await {
                Ok(response) => {
                    reservation.complete(response.clone())?;
                    self.audit(action, &subject, None, None);
                    Ok(response)
                }
                Err(e) => {
                    drop(reservation);
                    self.audit(action, &subject, Some(&e), None);
                    Err(e)
                }
            },
        }
    }

    fn trail(&self) -> std::sync::MutexGuard<'_, AuditTrail> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(
        &self,
        action: &str,
        subject: &Fingerprint,
        failure: Option<&NotariumError>,
        details: Option<&str>,
    ) {
        if let Err(e) = self
            .trail()
            .record(action, &subject.to_hex(), failure, details)
        {
            error!(error = %e, "failed to record audit entry");
        }
    }
}

// Only reachable if two operations' payloads collide under SHA-256.
fn kind_mismatch(key: &str, payload: Fingerprint) -> NotariumError {
    NotariumError::IdempotencyConflict {
        key: key.to_owned(),
        stored: payload,
        presented: payload,
    }
}
