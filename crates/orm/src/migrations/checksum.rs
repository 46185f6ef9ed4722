//! Checksum calculation for migration files

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::definitions::{ChecksumMismatch, LedgerEntry, MigrationScript};
use crate::error::{OrmError, OrmResult};

/// SHA-256 of `content` as 64 lowercase hex characters
pub fn compute_checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Checksum of a file's raw bytes
pub fn checksum_file(path: &Path) -> OrmResult<String> {
    let bytes = fs::read(path).map_err(|e| OrmError::io(path, e))?;
    Ok(compute_checksum(&bytes))
}

/// Applied scripts whose current checksum differs from the recorded one.
///
/// Ledger entries without a script on disk are not drift.
pub fn find_drift(scripts: &[MigrationScript], ledger: &[LedgerEntry]) -> Vec<ChecksumMismatch> {
    let current: HashMap<&str, &str> = scripts
        .iter()
        .map(|s| (s.name.as_str(), s.checksum.as_str()))
        .collect();

    ledger
        .iter()
        .filter_map(|entry| {
            let checksum = current.get(entry.name.as_str())?;
            (*checksum != entry.checksum).then(|| ChecksumMismatch {
                name: entry.name.clone(),
                recorded: entry.checksum.clone(),
                current: checksum.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn script(name: &str, content: &str) -> MigrationScript {
        MigrationScript {
            version: name[..3].to_string(),
            name: name.to_string(),
            forward_body: content.to_string(),
            backward_body: String::new(),
            checksum: compute_checksum(content.as_bytes()),
            path: PathBuf::from(format!("{}.sql", name)),
        }
    }

    fn entry(id: i32, name: &str, checksum: &str) -> LedgerEntry {
        LedgerEntry {
            id,
            name: name.to_string(),
            executed_at: None,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(compute_checksum(b"").len(), 64);
    }

    #[test]
    fn test_single_byte_change_is_detected() {
        assert_ne!(
            compute_checksum(b"CREATE TABLE users(id serial primary key)"),
            compute_checksum(b"CREATE TABLE users(id serial primary key) ")
        );
    }

    #[test]
    fn test_find_drift_reports_only_changed_scripts() {
        let first = script("001-create-users", "CREATE TABLE users(id serial primary key)");
        let second = script("002-add-email", "ALTER TABLE users ADD COLUMN email text");
        let ledger = vec![
            entry(1, "001-create-users", &first.checksum),
            entry(2, "002-add-email", "0000"),
            entry(3, "003-gone", "ffff"),
        ];

        let drift = find_drift(&[first, second.clone()], &ledger);
        assert_eq!(
            drift,
            vec![ChecksumMismatch {
                name: "002-add-email".to_string(),
                recorded: "0000".to_string(),
                current: second.checksum,
            }]
        );
    }

    #[test]
    fn test_checksum_file_covers_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001-a.sql");
        let content = "-- UP\nSELECT 1;\n-- DOWN\nSELECT 2;\n";
        fs::write(&path, content).unwrap();

        assert_eq!(checksum_file(&path).unwrap(), compute_checksum(content.as_bytes()));
        assert!(checksum_file(&dir.path().join("missing.sql")).is_err());
    }
}
