//! Error types for the ORM system
//!
//! Connectivity, integrity, execution and transaction-protocol failures are
//! kept as distinct variants so callers can decide what is fatal.

use std::path::PathBuf;

use strata_core::ConfigError;
use thiserror::Error;

use crate::migrations::MigrationDirection;

/// ORM result type alias
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for pool, transaction and migration operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// The pool could not reach the database
    #[error("Could not connect to database at {target}: {source}")]
    Connection {
        /// `host:port/database`, never credentials
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Timed out after {timeout_ms}ms waiting for a database connection")]
    ConnectionTimeout { timeout_ms: u64 },

    #[error("Database pool is closed")]
    PoolClosed,

    #[error("Database pool is not initialized")]
    NotInitialized,

    /// The ledger references a script that no longer exists on disk
    #[error("Migration file not found for applied migration '{name}'")]
    MissingScript { name: String },

    #[error("Migration '{name}' has no DOWN section and cannot be reverted")]
    IrreversibleScript { name: String },

    #[error("Migration '{name}' has an empty UP section")]
    EmptyScript { name: String },

    #[error("Migrations '{first}' and '{second}' share version {version}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("Invalid identifier for {field}: '{value}'")]
    InvalidIdentifier { field: String, value: String },

    /// A script body failed; its transaction has been rolled back
    #[error("Migration '{name}' failed while running {direction}: {source}")]
    Execution {
        name: String,
        direction: MigrationDirection,
        #[source]
        source: Box<OrmError>,
    },

    /// The ledger row was already written or removed by another run
    #[error("Ledger row for migration '{name}' was changed by another run")]
    LedgerConflict { name: String },

    #[error("A transaction is already active on this coordinator")]
    AlreadyActive,

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Savepoint '{name}' does not exist in the current transaction")]
    SavepointNotFound { name: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl OrmError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OrmError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a failure that happened while running a migration step
    pub(crate) fn execution(name: &str, direction: MigrationDirection, source: OrmError) -> Self {
        OrmError::Execution {
            name: name.to_string(),
            direction,
            source: Box::new(source),
        }
    }

    /// Connectivity errors mean the database could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            OrmError::Connection { .. }
                | OrmError::ConnectionTimeout { .. }
                | OrmError::PoolClosed
                | OrmError::NotInitialized
        )
    }

    /// Integrity errors abort a command before any script runs
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            OrmError::MissingScript { .. }
                | OrmError::IrreversibleScript { .. }
                | OrmError::EmptyScript { .. }
                | OrmError::DuplicateVersion { .. }
                | OrmError::InvalidIdentifier { .. }
        )
    }
}

/// Check that `value` can be interpolated into SQL as a bare identifier
pub(crate) fn ensure_identifier(field: &str, value: &str) -> OrmResult<()> {
    strata_core::config::validate_identifier(field, value).map_err(|_| {
        OrmError::InvalidIdentifier {
            field: field.to_string(),
            value: value.to_string(),
        }
    })
}
