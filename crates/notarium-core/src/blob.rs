// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Byte-addressable storage collaborator.
//
// Notarium never decides where or how bytes are stored; persistence lives
// behind this trait and is assumed reliable.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::{NotariumError, Result};

/// Blob storage consumed by the service layer (object store, file system).
pub trait BlobStore: Send + Sync {
    /// Read the bytes stored under `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Store `bytes` under `path`, replacing anything already there.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Whether anything is stored under `path`.
    fn exists(&self, path: &str) -> Result<bool>;
}

/// In-process blob store for tests and dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| NotariumError::NotFound(path.to_owned()))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        tracing::debug!(path, len = bytes.len(), "blob written");
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }
}
