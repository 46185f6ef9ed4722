//! # strata-orm
//!
//! Schema migrations and transactional execution for PostgreSQL.
//!
//! - [`database::ManagedPool`]: bounded connection pool with health checks and statistics
//! - [`transaction`]: transactions with isolation modes and savepoints
//! - [`migrations`]: versioned SQL scripts, checksum drift detection, apply and revert
//! - [`seeds::SeedRunner`]: baseline data scripts
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::config::{DatabaseConfig, MigrationsConfig};
//! use strata_orm::{ManagedPool, MigrationConfig, MigrationRunner};
//!
//! # async fn run() -> strata_orm::OrmResult<()> {
//! let pool = Arc::new(ManagedPool::connect(&DatabaseConfig::default()).await?);
//! let runner = MigrationRunner::new(
//!     pool.clone(),
//!     MigrationConfig::from(&MigrationsConfig::default()),
//! )?;
//! let result = runner.up().await?;
//! println!("applied {:?}", result.applied);
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod error;
pub mod migrations;
pub mod seeds;
pub mod transaction;
pub mod value;

pub use database::{HealthStatus, ManagedPool, PoolStats};
pub use error::{OrmError, OrmResult};
pub use migrations::{
    ChecksumMismatch, LedgerEntry, MigrationConfig, MigrationDirection, MigrationLoader,
    MigrationRunResult, MigrationRunner, MigrationScript, MigrationStatusReport, RollbackResult,
};
pub use seeds::SeedRunner;
pub use transaction::{
    with_transaction, IsolationLevel, TransactionBuilder, TransactionConfig,
    TransactionCoordinator, TransactionHandle, UnitOfWork,
};
pub use value::DatabaseValue;
