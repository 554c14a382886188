// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Notarium — Core types and error definitions shared across all crates.

pub mod blob;
pub mod config;
pub mod error;
pub mod types;

pub use blob::{BlobStore, MemoryBlobStore};
pub use config::NotariumConfig;
pub use error::{NotariumError, ProtocolReason};
pub use types::*;
