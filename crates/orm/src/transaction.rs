//! Transaction Management
//!
//! A [`TransactionHandle`] owns one pooled connection for the lifetime of a
//! transaction. Dropping a handle without committing rolls back and returns
//! the connection to the pool.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Transaction};
use tracing::{debug, warn};

use crate::database::ManagedPool;
use crate::error::{ensure_identifier, OrmError, OrmResult};
use crate::value::{bind_all, DatabaseValue};

/// Transaction isolation levels supported by PostgreSQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read Uncommitted - lowest isolation level
    ReadUncommitted,
    /// Read Committed - default PostgreSQL isolation level
    #[default]
    ReadCommitted,
    /// Repeatable Read - stronger consistency guarantees
    RepeatableRead,
    /// Serializable - highest isolation level
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction configuration options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Transaction isolation level, server default when `None`
    pub isolation_level: Option<IsolationLevel>,
    /// Whether the transaction is read-only
    pub read_only: bool,
    /// Only honoured for SERIALIZABLE READ ONLY transactions
    pub deferrable: bool,
}

impl TransactionConfig {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn serializable() -> Self {
        Self {
            isolation_level: Some(IsolationLevel::Serializable),
            ..Default::default()
        }
    }

    /// Render the mode list for `SET TRANSACTION`, or `None` when nothing is set.
    ///
    /// `DEFERRABLE` is dropped unless the transaction is also SERIALIZABLE and READ ONLY.
    pub fn transaction_modes(&self) -> Option<String> {
        let mut modes = Vec::new();

        if let Some(level) = self.isolation_level {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        if self.deferrable
            && self.read_only
            && self.isolation_level == Some(IsolationLevel::Serializable)
        {
            modes.push("DEFERRABLE".to_string());
        }

        if modes.is_empty() {
            None
        } else {
            Some(modes.join(", "))
        }
    }
}

/// Builder for [`TransactionConfig`]
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    config: TransactionConfig,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.config.read_only = true;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.config.deferrable = true;
        self
    }

    pub fn build(self) -> TransactionConfig {
        self.config
    }
}

/// An open transaction on one pooled connection
pub struct TransactionHandle {
    tx: Transaction<'static, Postgres>,
    config: TransactionConfig,
    savepoints: Vec<String>,
}

impl TransactionHandle {
    /// Acquire a connection, begin and apply the configured modes
    pub async fn begin(pool: &ManagedPool, config: TransactionConfig) -> OrmResult<Self> {
        debug!("Beginning transaction with config: {:?}", config);
        let mut tx = pool.begin().await?;

        if let Some(modes) = config.transaction_modes() {
            let sql = format!("SET TRANSACTION {}", modes);
            sqlx::query(&sql).execute(&mut *tx).await?;
            debug!("Transaction modes set: {}", modes);
        }

        Ok(Self {
            tx,
            config,
            savepoints: Vec::new(),
        })
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Savepoints currently open, oldest first
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!("Executing in transaction: {}", sql);
        let result = bind_all(sql, params).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<PgRow>> {
        debug!("Fetching in transaction: {}", sql);
        Ok(bind_all(sql, params).fetch_all(&mut *self.tx).await?)
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<PgRow>> {
        debug!("Fetching in transaction: {}", sql);
        Ok(bind_all(sql, params).fetch_optional(&mut *self.tx).await?)
    }

    /// Run unparameterized SQL text that may hold several statements
    pub async fn execute_script(&mut self, body: &str) -> OrmResult<u64> {
        debug!("Executing script ({} bytes)", body.len());
        let result = sqlx::Executor::execute(&mut *self.tx, body).await?;
        Ok(result.rows_affected())
    }

    pub async fn create_savepoint(&mut self, name: &str) -> OrmResult<()> {
        ensure_identifier("savepoint", name)?;
        sqlx::query(&format!("SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints.push(name.to_string());
        debug!("Savepoint {} created", name);
        Ok(())
    }

    /// Undo work since `name`; the savepoint itself stays open
    pub async fn rollback_to_savepoint(&mut self, name: &str) -> OrmResult<()> {
        let position = self.find_savepoint(name)?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints.truncate(position + 1);
        debug!("Rolled back to savepoint {}", name);
        Ok(())
    }

    /// Release `name` and every savepoint created after it
    pub async fn release_savepoint(&mut self, name: &str) -> OrmResult<()> {
        let position = self.find_savepoint(name)?;
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints.truncate(position);
        debug!("Savepoint {} released", name);
        Ok(())
    }

    fn find_savepoint(&self, name: &str) -> OrmResult<usize> {
        ensure_identifier("savepoint", name)?;
        self.savepoints
            .iter()
            .rposition(|existing| existing == name)
            .ok_or_else(|| OrmError::SavepointNotFound {
                name: name.to_string(),
            })
    }

    /// Commit; the connection goes back to the pool even if COMMIT fails
    pub async fn commit(self) -> OrmResult<()> {
        debug!("Committing transaction");
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back; the connection goes back to the pool even if ROLLBACK fails
    pub async fn rollback(self) -> OrmResult<()> {
        debug!("Rolling back transaction");
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Unit of work run inside [`with_transaction`] and [`TransactionCoordinator::run`]
pub type UnitOfWork<'a, R> = BoxFuture<'a, OrmResult<R>>;

/// Begin, run `f`, commit on success and roll back on failure.
///
/// The error returned by `f` is passed through unchanged; a failing
/// ROLLBACK is only logged.
pub async fn with_transaction<F, R>(
    pool: &ManagedPool,
    config: TransactionConfig,
    f: F,
) -> OrmResult<R>
where
    F: for<'a> FnOnce(&'a mut TransactionHandle) -> UnitOfWork<'a, R>,
{
    let mut handle = TransactionHandle::begin(pool, config).await?;
    let outcome = f(&mut handle).await;
    finish(handle, outcome).await
}

async fn finish<R>(handle: TransactionHandle, outcome: OrmResult<R>) -> OrmResult<R> {
    match outcome {
        Ok(value) => {
            handle.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = handle.rollback().await {
                warn!("Rollback after failed unit of work also failed: {}", rollback_error);
            }
            Err(e)
        }
    }
}

/// Tracks the single transaction a component may have open at a time
pub struct TransactionCoordinator {
    pool: Arc<ManagedPool>,
    active: Option<TransactionHandle>,
}

impl TransactionCoordinator {
    pub fn new(pool: Arc<ManagedPool>) -> Self {
        Self { pool, active: None }
    }

    pub fn pool(&self) -> &Arc<ManagedPool> {
        &self.pool
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub async fn begin(&mut self, config: TransactionConfig) -> OrmResult<&mut TransactionHandle> {
        if self.active.is_some() {
            return Err(OrmError::AlreadyActive);
        }
        let handle = TransactionHandle::begin(&self.pool, config).await?;
        Ok(self.active.insert(handle))
    }

    /// The open transaction
    pub fn handle(&mut self) -> OrmResult<&mut TransactionHandle> {
        self.active.as_mut().ok_or(OrmError::NoActiveTransaction)
    }

    pub async fn commit(&mut self) -> OrmResult<()> {
        let handle = self.active.take().ok_or(OrmError::NoActiveTransaction)?;
        handle.commit().await
    }

    pub async fn rollback(&mut self) -> OrmResult<()> {
        let handle = self.active.take().ok_or(OrmError::NoActiveTransaction)?;
        handle.rollback().await
    }

    /// Same as [`with_transaction`], tracked as this coordinator's active transaction
    pub async fn run<F, R>(&mut self, config: TransactionConfig, f: F) -> OrmResult<R>
    where
        F: for<'a> FnOnce(&'a mut TransactionHandle) -> UnitOfWork<'a, R>,
    {
        let outcome = {
            let handle = self.begin(config).await?;
            f(handle).await
        };
        let handle = self.active.take().ok_or(OrmError::NoActiveTransaction)?;
        finish(handle, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_sets_no_modes() {
        assert_eq!(TransactionConfig::default().transaction_modes(), None);
    }

    #[test]
    fn test_isolation_and_read_only() {
        let config = TransactionBuilder::new()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only()
            .build();
        assert_eq!(
            config.transaction_modes().as_deref(),
            Some("ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        );

        assert_eq!(
            TransactionConfig::read_only().transaction_modes().as_deref(),
            Some("READ ONLY")
        );
    }

    #[test]
    fn test_deferrable_requires_serializable_read_only() {
        let full = TransactionBuilder::new()
            .isolation_level(IsolationLevel::Serializable)
            .read_only()
            .deferrable()
            .build();
        assert_eq!(
            full.transaction_modes().as_deref(),
            Some("ISOLATION LEVEL SERIALIZABLE, READ ONLY, DEFERRABLE")
        );

        // Malformed combinations drop DEFERRABLE rather than failing.
        let writable = TransactionBuilder::new()
            .isolation_level(IsolationLevel::Serializable)
            .deferrable()
            .build();
        assert_eq!(
            writable.transaction_modes().as_deref(),
            Some("ISOLATION LEVEL SERIALIZABLE")
        );

        let weaker = TransactionBuilder::new()
            .isolation_level(IsolationLevel::ReadCommitted)
            .read_only()
            .deferrable()
            .build();
        assert_eq!(
            weaker.transaction_modes().as_deref(),
            Some("ISOLATION LEVEL READ COMMITTED, READ ONLY")
        );

        let only_deferrable = TransactionBuilder::new().deferrable().build();
        assert_eq!(only_deferrable.transaction_modes(), None);
    }

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(TransactionConfig::serializable().isolation_level, Some(IsolationLevel::Serializable));
    }

    #[tokio::test]
    async fn test_coordinator_requires_active_transaction() {
        let mut coordinator = TransactionCoordinator::new(Arc::new(ManagedPool::new()));

        assert!(!coordinator.is_active());
        assert!(matches!(coordinator.handle(), Err(OrmError::NoActiveTransaction)));
        assert!(matches!(coordinator.commit().await, Err(OrmError::NoActiveTransaction)));
        assert!(matches!(coordinator.rollback().await, Err(OrmError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_begin_on_uninitialized_pool() {
        let mut coordinator = TransactionCoordinator::new(Arc::new(ManagedPool::new()));

        let err = coordinator.begin(TransactionConfig::default()).await.err();
        assert!(matches!(err, Some(OrmError::NotInitialized)));
        assert!(!coordinator.is_active());

        let result = with_transaction(coordinator.pool(), TransactionConfig::default(), |tx| {
            Box::pin(async move { tx.execute("SELECT 1", &[]).await })
        })
        .await;
        assert!(matches!(result, Err(OrmError::NotInitialized)));
    }
}
