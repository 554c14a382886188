// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! notarium-security — integrity primitives for the Notarium trust layer.
//!
//! Content fingerprinting (SHA-256 over raw bytes or canonicalised
//! structured payloads), the idempotency store that gives retried write
//! requests at-most-once semantics, and the append-only audit trail.

pub mod audit;
pub mod idempotency;
pub mod integrity;

// PUBLIC API: Re-export core security primitives
pub use audit::AuditTrail;
pub use idempotency::{Admission, CheckOutcome, IdempotencyStore, Reservation};
pub use integrity::{canonical_json, digest, digest_of, hash_hex, verify_hash};
