//! Migration Runner - Executes migrations against the database
//!
//! Every script runs in its own transaction together with its ledger write,
//! so a script and its ledger row are committed or discarded as one unit.

use std::sync::Arc;
use std::time::Instant;

use sqlx::Row;
use tracing::{error, info, warn};

use super::definitions::{
    ChecksumMismatch, LedgerEntry, MigrationConfig, MigrationDirection, MigrationRunResult,
    MigrationStatusReport,
};
use super::loader::{diff_against_ledger, MigrationLoader};
use crate::database::ManagedPool;
use crate::error::{ensure_identifier, OrmError, OrmResult};
use crate::transaction::{TransactionConfig, TransactionHandle};
use crate::value::DatabaseValue;

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    pool: Arc<ManagedPool>,
    loader: MigrationLoader,
    config: MigrationConfig,
}

impl MigrationRunner {
    /// Create a runner; fails if the ledger table name is not a plain identifier
    pub fn new(pool: Arc<ManagedPool>, config: MigrationConfig) -> OrmResult<Self> {
        ensure_identifier("migrations table", &config.migrations_table)?;
        let loader = MigrationLoader::new(&config.migrations_dir)?;
        Ok(Self {
            pool,
            loader,
            config,
        })
    }

    pub fn pool(&self) -> &Arc<ManagedPool> {
        &self.pool
    }

    pub fn loader(&self) -> &MigrationLoader {
        &self.loader
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Apply every pending script in ascending version order.
    ///
    /// Empty forward bodies are rejected before anything runs. On the first
    /// failing script that script is rolled back and earlier ones stay applied.
    pub async fn up(&self) -> OrmResult<MigrationRunResult> {
        let start_time = Instant::now();

        let scripts = self.loader.load_all()?;
        let ledger = self.applied_entries().await?;
        let diff = diff_against_ledger(&scripts, &ledger);
        self.warn_drift(&diff.drift);

        let skipped_count = ledger.len();
        if diff.pending.is_empty() {
            info!("No pending migrations");
            return Ok(MigrationRunResult {
                applied: Vec::new(),
                skipped_count,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        if let Some(empty) = diff
            .pending
            .iter()
            .find(|s| s.forward_body.trim().is_empty())
        {
            error!("Migration {} has an empty UP section", empty.name);
            return Err(OrmError::EmptyScript {
                name: empty.name.clone(),
            });
        }

        let insert_sql = self.record_migration_sql();
        let mut applied = Vec::with_capacity(diff.pending.len());

        for script in &diff.pending {
            info!("Applying migration: {}", script.name);
            self.run_step(
                &script.name,
                MigrationDirection::Up,
                &script.forward_body,
                &insert_sql,
                &[
                    DatabaseValue::from(script.name.as_str()),
                    DatabaseValue::from(script.checksum.as_str()),
                ],
            )
            .await?;
            info!("Applied migration: {}", script.name);
            applied.push(script.name.clone());
        }

        Ok(MigrationRunResult {
            applied,
            skipped_count,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Applied and pending scripts plus drift; only creates the ledger table if absent
    pub async fn status(&self) -> OrmResult<MigrationStatusReport> {
        let scripts = self.loader.load_all()?;
        let ledger = self.applied_entries().await?;
        let diff = diff_against_ledger(&scripts, &ledger);

        Ok(MigrationStatusReport {
            applied: ledger.into_iter().map(|e| e.name).collect(),
            pending: diff.pending.into_iter().map(|s| s.name).collect(),
            total: scripts.len(),
            drift: diff.drift,
            missing: diff.missing,
        })
    }

    /// Checksum mismatches between applied scripts and their current files
    pub async fn validate_checksums(&self) -> OrmResult<Vec<ChecksumMismatch>> {
        let scripts = self.loader.load_all()?;
        let ledger = self.applied_entries().await?;
        let drift = diff_against_ledger(&scripts, &ledger).drift;
        self.warn_drift(&drift);
        Ok(drift)
    }

    fn warn_drift(&self, drift: &[ChecksumMismatch]) {
        for mismatch in drift {
            warn!(
                "Migration {} changed after it was applied (recorded {}, current {})",
                mismatch.name, mismatch.recorded, mismatch.current
            );
        }
    }

    /// Ledger rows in insertion order
    pub async fn applied_entries(&self) -> OrmResult<Vec<LedgerEntry>> {
        self.ensure_migrations_table().await?;

        let rows = self
            .pool
            .fetch_all(&self.get_applied_migrations_sql(), &[])
            .await?;

        rows.iter()
            .map(|row| -> OrmResult<LedgerEntry> {
                Ok(LedgerEntry {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    executed_at: row.try_get("executed_at")?,
                    checksum: row.try_get("checksum")?,
                })
            })
            .collect()
    }

    /// Run `body` and the ledger statement in one transaction.
    ///
    /// Failures to reach the database propagate as they are; anything after
    /// BEGIN is rolled back, logged and wrapped in [`OrmError::Execution`].
    pub(super) async fn run_step(
        &self,
        name: &str,
        direction: MigrationDirection,
        body: &str,
        ledger_sql: &str,
        ledger_params: &[DatabaseValue],
    ) -> OrmResult<()> {
        let mut tx = TransactionHandle::begin(&self.pool, TransactionConfig::default()).await?;

        let outcome = async {
            tx.execute_script(body).await?;
            if tx.execute(ledger_sql, ledger_params).await? != 1 {
                return Err(OrmError::LedgerConflict {
                    name: name.to_string(),
                });
            }
            Ok::<(), OrmError>(())
        }
        .await;

        let outcome = match outcome {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback of migration {} failed: {}", name, rollback_error);
                }
                Err(e)
            }
        };

        outcome.map_err(|source| {
            error!("Migration {} failed ({}): {}", name, direction, source);
            OrmError::execution(name, direction, source)
        })
    }

    /// Ensure migrations table exists
    async fn ensure_migrations_table(&self) -> OrmResult<()> {
        self.pool
            .execute(&self.create_migrations_table_sql(), &[])
            .await?;
        Ok(())
    }

    /// SQL to create the migrations tracking table
    fn create_migrations_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id SERIAL PRIMARY KEY,\n    \
                name VARCHAR(255) NOT NULL UNIQUE,\n    \
                executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,\n    \
                checksum VARCHAR(64) NOT NULL\n\
            )",
            self.config.migrations_table
        )
    }

    fn record_migration_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name, checksum) VALUES ($1, $2)",
            self.config.migrations_table
        )
    }

    pub(super) fn remove_migration_sql(&self) -> String {
        format!("DELETE FROM {} WHERE name = $1", self.config.migrations_table)
    }

    fn get_applied_migrations_sql(&self) -> String {
        format!(
            "SELECT id, name, executed_at, checksum FROM {} ORDER BY id",
            self.config.migrations_table
        )
    }
}
