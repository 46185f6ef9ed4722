//! Migration Loader - discovers and parses migration files
//!
//! Files are named `NNN-slug.sql` or `NNN_slug.sql` with at least three
//! version digits. Anything else in the directory is ignored.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use super::checksum::{compute_checksum, find_drift};
use super::definitions::{ChecksumMismatch, LedgerEntry, MigrationScript};
use crate::error::{OrmError, OrmResult};

const FILE_PATTERN: &str = r"^(\d{3,})[-_](.+)\.sql$";
// The keyword must be followed by whitespace or the end of the line.
const UP_MARKER: &str = r"(?mi)^[ \t]*--[ \t]*up(?:[ \t\r][^\n]*)?$\n?";
const DOWN_MARKER: &str = r"(?mi)^[ \t]*--[ \t]*down(?:[ \t\r][^\n]*)?$\n?";

/// Delta between the scripts on disk and the ledger
#[derive(Debug, Default)]
pub struct LedgerDiff {
    /// Scripts absent from the ledger, ascending by version
    pub pending: Vec<MigrationScript>,
    pub drift: Vec<ChecksumMismatch>,
    /// Ledger names with no script on disk, in ledger order
    pub missing: Vec<String>,
}

/// Loads migration scripts from one directory
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    dir: PathBuf,
    file_pattern: Regex,
    up_marker: Regex,
    down_marker: Regex,
}

impl MigrationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> OrmResult<Self> {
        Ok(Self {
            dir: dir.into(),
            file_pattern: Regex::new(FILE_PATTERN)?,
            up_marker: Regex::new(UP_MARKER)?,
            down_marker: Regex::new(DOWN_MARKER)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Split a migration file name into `(version, slug)`
    pub fn parse_file_name(&self, file_name: &str) -> Option<(String, String)> {
        let captures = self.file_pattern.captures(file_name)?;
        Some((captures[1].to_string(), captures[2].to_string()))
    }

    /// Load every migration script, sorted ascending by version.
    ///
    /// A missing directory yields no scripts. Two files whose versions are
    /// numerically equal are rejected.
    pub fn load_all(&self) -> OrmResult<Vec<MigrationScript>> {
        if !self.dir.exists() {
            debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| OrmError::io(&self.dir, e))?;
        let mut scripts = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| OrmError::io(&self.dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, _slug)) = self.parse_file_name(file_name) else {
                debug!("Skipping non-migration file {}", file_name);
                continue;
            };

            scripts.push(self.load_file(&path, version)?);
        }

        sort_scripts(&mut scripts);
        ensure_unique_versions(&scripts)?;
        debug!("Loaded {} migration scripts from {}", scripts.len(), self.dir.display());
        Ok(scripts)
    }

    fn load_file(&self, path: &Path, version: String) -> OrmResult<MigrationScript> {
        let bytes = fs::read(path).map_err(|e| OrmError::io(path, e))?;
        let checksum = compute_checksum(&bytes);
        let content = std::str::from_utf8(&bytes)
            .map_err(|e| OrmError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let (forward_body, backward_body) = self.parse_sections(content);

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(MigrationScript {
            version,
            name,
            forward_body,
            backward_body,
            checksum,
            path: path.to_path_buf(),
        })
    }

    /// Split file content into trimmed `(forward, backward)` bodies.
    ///
    /// Each section runs from its marker to the other marker or the end of
    /// the file, so UP and DOWN may come in either order. Text before the
    /// first marker is ignored, as is the rest of each marker line. Without
    /// an UP marker the whole file is the forward body.
    pub fn parse_sections(&self, content: &str) -> (String, String) {
        let Some(up) = self.up_marker.find(content) else {
            return (content.trim().to_string(), String::new());
        };
        let Some(down) = self.down_marker.find(content) else {
            return (content[up.end()..].trim().to_string(), String::new());
        };

        let (forward, backward) = if down.start() >= up.end() {
            (&content[up.end()..down.start()], &content[down.end()..])
        } else {
            (&content[up.end()..], &content[down.end()..up.start()])
        };
        (forward.trim().to_string(), backward.trim().to_string())
    }

    /// Write the next `NNN-slug.sql` file with empty UP and DOWN sections
    pub fn create_migration(&self, slug: &str) -> OrmResult<PathBuf> {
        let slug = normalize_slug(slug).ok_or_else(|| OrmError::InvalidIdentifier {
            field: "migration name".to_string(),
            value: slug.to_string(),
        })?;

        fs::create_dir_all(&self.dir).map_err(|e| OrmError::io(&self.dir, e))?;

        let next = self
            .load_all()?
            .iter()
            .filter_map(|s| s.version.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let path = self.dir.join(format!("{:03}-{}.sql", next, slug));

        let template = format!(
            "-- Migration: {}\n-- Created: {}\n\n-- UP\n\n\n-- DOWN\n\n",
            slug,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| OrmError::io(&path, e))?;
        file.write_all(template.as_bytes())
            .map_err(|e| OrmError::io(&path, e))?;

        Ok(path)
    }
}

/// Lowercase, with runs of anything but `[a-z0-9]` collapsed to `-`
fn normalize_slug(raw: &str) -> Option<String> {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    (!slug.is_empty()).then_some(slug)
}

/// Order by numeric version, then the version string, then name
pub(crate) fn sort_scripts(scripts: &mut [MigrationScript]) {
    scripts.sort_by(|a, b| {
        compare_versions(&a.version, &b.version)
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn ensure_unique_versions(sorted: &[MigrationScript]) -> OrmResult<()> {
    for pair in sorted.windows(2) {
        if compare_versions(&pair[0].version, &pair[1].version) == Ordering::Equal {
            return Err(OrmError::DuplicateVersion {
                version: pair[1].version.clone(),
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }
    }
    Ok(())
}

/// Compare digit strings numerically without parsing them
fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare loaded scripts against ledger rows
pub fn diff_against_ledger(scripts: &[MigrationScript], ledger: &[LedgerEntry]) -> LedgerDiff {
    let applied: HashSet<&str> = ledger.iter().map(|e| e.name.as_str()).collect();
    let on_disk: HashSet<&str> = scripts.iter().map(|s| s.name.as_str()).collect();

    LedgerDiff {
        pending: scripts
            .iter()
            .filter(|s| !applied.contains(s.name.as_str()))
            .cloned()
            .collect(),
        drift: find_drift(scripts, ledger),
        missing: ledger
            .iter()
            .filter(|e| !on_disk.contains(e.name.as_str()))
            .map(|e| e.name.clone())
            .collect(),
    }
}
