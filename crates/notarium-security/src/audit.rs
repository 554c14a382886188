// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only SQLite log of every trust operation.
//
// Schema:
//   audit_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp   TEXT    NOT NULL,   -- RFC 3339
//     action      TEXT    NOT NULL,   -- e.g. "stamp", "audit_pack", "verify"
//     fingerprint TEXT    NOT NULL,   -- SHA-256 hex digest of the subject
//     success     INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     reason      TEXT,               -- stable error code on failure
//     details     TEXT                -- optional free-form context
//   )

use std::path::Path;

use chrono::Utc;
use notarium_core::error::{NotariumError, Result};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   TEXT    NOT NULL,
        action      TEXT    NOT NULL,
        fingerprint TEXT    NOT NULL,
        success     INTEGER NOT NULL,
        reason      TEXT,
        details     TEXT
    );
    CREATE INDEX IF NOT EXISTS audit_log_fingerprint ON audit_log (fingerprint);
";

const SELECT_COLUMNS: &str = "id, timestamp, action, fingerprint, success, reason, details";

/// Convert a `rusqlite::Error` into a `NotariumError::Database`.
fn db_err(e: rusqlite::Error) -> NotariumError {
    NotariumError::Database(e.to_string())
}

/// A single entry in the audit trail, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub fingerprint: String,
    pub success: bool,
    pub reason: Option<String>,
    pub details: Option<String>,
}

impl AuditEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            action: row.get(2)?,
            fingerprint: row.get(3)?,
            success: row.get::<_, i32>(4)? != 0,
            reason: row.get(5)?,
            details: row.get(6)?,
        })
    }
}

/// Append-only audit trail backed by a SQLite database.
///
/// Every stamping attempt, checklist submission, audit-pack build and
/// verification is recorded with the fingerprint of its subject and, for
/// failures, the stable reason code of the error.
pub struct AuditTrail {
    conn: Connection,
}

impl AuditTrail {
    /// Open (or create) the audit database at `path` with WAL enabled.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;
        debug!("audit trail opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;
        debug!("in-memory audit trail opened");
        Ok(Self { conn })
    }

    /// Record one operation.
    ///
    /// `failure` is `None` for a successful operation; otherwise its reason
    /// code is stored alongside the entry.
    #[instrument(skip(self, failure, details), fields(success = failure.is_none()))]
    pub fn record(
        &self,
        action: &str,
        fingerprint: &str,
        failure: Option<&NotariumError>,
        details: Option<&str>,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        let success: i32 = if failure.is_none() { 1 } else { 0 };
        let reason = failure.map(NotariumError::reason_code);
        let details = match (details, failure) {
            (Some(d), _) => Some(d.to_owned()),
            (None, Some(err)) => Some(err.to_string()),
            (None, None) => None,
        };

        self.conn
            .execute(
                "INSERT INTO audit_log (timestamp, action, fingerprint, success, reason, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![timestamp, action, fingerprint, success, reason, details],
            )
            .map_err(db_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// All entries for one fingerprint, oldest first.
    pub fn entries_for(&self, fingerprint: &str) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_log WHERE fingerprint = ?1 ORDER BY id ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![fingerprint], AuditEntry::from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_log ORDER BY id DESC LIMIT ?1"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], AuditEntry::from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }
}
