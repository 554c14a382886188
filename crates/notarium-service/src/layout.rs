// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob-store paths for the artifacts the service writes.

use notarium_core::types::{DocumentVersion, Fingerprint};

/// Where the DER token obtained for `fingerprint` is kept.
pub fn token_path(fingerprint: &Fingerprint, serial: &str) -> String {
    format!("tokens/{fingerprint}/{serial}.tsr")
}

/// Where the checklist entries submitted for `version` are kept.
pub fn checklist_path(version: &DocumentVersion) -> String {
    format!("checklists/{}/{}.json", version.document_id, version.version)
}

/// Where the single audit pack for `version` is kept.
pub fn pack_path(version: &DocumentVersion) -> String {
    format!("audit-packs/{}/{}.json", version.document_id, version.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_per_version() {
        let v3 = DocumentVersion::new("SOP-104", "3");
        let v4 = DocumentVersion::new("SOP-104", "4");
        assert_eq!(pack_path(&v3), "audit-packs/SOP-104/3.json");
        assert_ne!(pack_path(&v3), pack_path(&v4));
        assert_eq!(checklist_path(&v3), "checklists/SOP-104/3.json");
    }

    #[test]
    fn token_path_uses_hex_fingerprint() {
        let fp = Fingerprint::from_bytes([0xAB; 32]);
        assert_eq!(token_path(&fp, "01"), format!("tokens/{}/01.tsr", "ab".repeat(32)));
    }
}
