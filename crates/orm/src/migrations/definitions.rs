//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the script, ledger and report types shared by the loader, runner
//! and rollback code.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Serialize;
use strata_core::config::MigrationsConfig;

/// A versioned SQL script loaded from the migrations directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Zero-padded numeric prefix of the file name
    pub version: String,
    /// File stem, e.g. `003_add_refresh_tokens`; the ledger key
    pub name: String,
    /// SQL run by `up`
    pub forward_body: String,
    /// SQL run by `down`; empty when the script is irreversible
    pub backward_body: String,
    /// SHA-256 hex digest of the whole file
    pub checksum: String,
    pub path: PathBuf,
}

impl MigrationScript {
    pub fn is_reversible(&self) -> bool {
        !self.backward_body.trim().is_empty()
    }
}

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i32,
    pub name: String,
    pub executed_at: Option<NaiveDateTime>,
    pub checksum: String,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::from(&MigrationsConfig::default())
    }
}

impl From<&MigrationsConfig> for MigrationConfig {
    fn from(config: &MigrationsConfig) -> Self {
        Self {
            migrations_dir: config.dir.clone(),
            migrations_table: config.table.clone(),
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// Result of running migrations
#[derive(Debug, Default, Serialize)]
pub struct MigrationRunResult {
    /// Names of migrations applied by this run, in order
    pub applied: Vec<String>,
    /// Number of migrations that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Default, Serialize)]
pub struct RollbackResult {
    /// Names of migrations reverted, newest first
    pub rolled_back: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// A script whose file changed after it was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    pub name: String,
    pub recorded: String,
    pub current: String,
}

/// Snapshot of applied and pending migrations
#[derive(Debug, Default, Serialize)]
pub struct MigrationStatusReport {
    /// Ledger names in ledger order
    pub applied: Vec<String>,
    /// Script names not yet applied, ascending by version
    pub pending: Vec<String>,
    /// Number of scripts on disk
    pub total: usize,
    pub drift: Vec<ChecksumMismatch>,
    /// Ledger names with no file on disk
    pub missing: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_display() {
        assert_eq!(MigrationDirection::Up.to_string(), "up");
        assert_eq!(
            serde_json::to_string(&MigrationDirection::Down).unwrap(),
            "\"down\""
        );
    }

    #[test]
    fn test_config_from_core() {
        let config = MigrationConfig::default();
        assert_eq!(config.migrations_table, "schema_migrations");
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
    }
}
