// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// notarium-pack — Audit packs and verification.
//
// An audit pack binds a document version, its fingerprint, the checklist
// entries attesting to it, and the timestamp token proving when the
// fingerprint existed. Verification checks a document against an expected
// fingerprint and a token without trusting any cached state.

pub mod builder;
pub mod verify;

pub use builder::{AuditPack, AuditPackBuilder};
pub use verify::{Verdict, verify, verify_pack};
