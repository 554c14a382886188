// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// notarium-service — Orchestration of the Notarium trust layer.
//
// Ties the idempotency store, the timestamp client, the audit-pack builder
// and the blob store together into at-most-once write operations, and runs
// the background sweeper that expires old idempotency entries.

pub mod layout;
pub mod locks;
pub mod service;
pub mod sweeper;

pub use service::{ChecklistReceipt, NotaryService, PackReceipt, ServiceResponse, StampReceipt};
pub use sweeper::spawn_sweeper;
