//! Connection Pool Manager
//!
//! [`ManagedPool`] owns the bounded PostgreSQL pool shared by every
//! component. It is constructed once, passed around by `Arc`, and can be
//! closed and re-initialized by test harnesses through [`ManagedPool::reset`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Connection, PgPool, Postgres, Transaction};
use strata_core::config::{AppConfigTrait, DatabaseConfig};
use tracing::{debug, error, info, warn};

use crate::error::{OrmError, OrmResult};
use crate::value::{bind_all, DatabaseValue};

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
    /// Callers currently suspended in `acquire`
    pub waiting: usize,
    pub acquire_count: u64,
    pub acquire_errors: u64,
}

/// Result of [`ManagedPool::health_check`]
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub latency: Option<Duration>,
}

struct PoolState {
    pool: PgPool,
    target: String,
    connect_timeout_ms: u64,
    created_at: Instant,
}

/// Managed connection pool wrapper with statistics and health monitoring
pub struct ManagedPool {
    state: RwLock<Option<PoolState>>,
    acquire_count: AtomicU64,
    acquire_errors: AtomicU64,
    waiting: AtomicUsize,
}

/// Counts a caller as waiting for as long as it is alive
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        WaitingGuard(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for ManagedPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedPool {
    /// Create an uninitialized pool; call [`ManagedPool::initialize`] before use
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            acquire_count: AtomicU64::new(0),
            acquire_errors: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Create and initialize a pool in one step
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let pool = Self::new();
        pool.initialize(config).await?;
        Ok(pool)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<PoolState>> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<PoolState>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `initialize` has succeeded and the pool has not been closed since
    pub fn is_initialized(&self) -> bool {
        self.read_state().is_some()
    }

    /// Establish the pool and probe it with `SELECT 1`.
    ///
    /// Calling this on an initialized pool logs a warning and does nothing.
    pub async fn initialize(&self, config: &DatabaseConfig) -> OrmResult<()> {
        if self.is_initialized() {
            warn!("Database pool already initialized, ignoring second initialize call");
            return Ok(());
        }

        config.validate()?;
        let target = config.display_target();

        let connect_options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(if config.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Disable
            });

        let ping_target = target.clone();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Some(config.idle_timeout()))
            .acquire_timeout(config.connect_timeout())
            .test_before_acquire(false)
            .before_acquire(move |conn, meta| {
                let target = ping_target.clone();
                Box::pin(async move {
                    match conn.ping().await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            // Idle faults are not attributable to a caller; drop the connection.
                            warn!(
                                "Discarding idle connection to {} (idle for {:?}): {}",
                                target, meta.idle_for, e
                            );
                            Ok(false)
                        }
                    }
                })
            })
            .connect_with(connect_options)
            .await
            .map_err(|source| {
                error!("Failed to connect to database at {}: {}", target, source);
                OrmError::Connection {
                    target: target.clone(),
                    source,
                }
            })?;

        if let Err(source) = sqlx::query("SELECT 1").execute(&pool).await {
            error!("Database liveness probe failed at {}: {}", target, source);
            pool.close().await;
            return Err(OrmError::Connection { target, source });
        }

        let duplicate = {
            let mut state = self.write_state();
            if state.is_some() {
                Some(pool)
            } else {
                info!(
                    "Database pool initialized for {} (max {} connections)",
                    target, config.max_connections
                );
                *state = Some(PoolState {
                    pool,
                    target,
                    connect_timeout_ms: config.connect_timeout_ms,
                    created_at: Instant::now(),
                });
                None
            }
        };

        // Lost a race against a concurrent initialize.
        if let Some(pool) = duplicate {
            warn!("Database pool already initialized, discarding duplicate pool");
            pool.close().await;
        }
        Ok(())
    }

    /// Get a handle to the underlying pool
    pub fn pool(&self) -> OrmResult<PgPool> {
        match self.read_state().as_ref() {
            Some(state) if state.pool.is_closed() => Err(OrmError::PoolClosed),
            Some(state) => Ok(state.pool.clone()),
            None => Err(OrmError::NotInitialized),
        }
    }

    /// Time since the pool was initialized
    pub fn uptime(&self) -> Option<Duration> {
        self.read_state().as_ref().map(|state| state.created_at.elapsed())
    }

    /// Classify sqlx errors into connectivity errors where they are
    fn classify_error(&self, error: sqlx::Error) -> OrmError {
        let state = self.read_state();
        match error {
            sqlx::Error::PoolTimedOut => OrmError::ConnectionTimeout {
                timeout_ms: state.as_ref().map_or(0, |s| s.connect_timeout_ms),
            },
            sqlx::Error::PoolClosed => OrmError::PoolClosed,
            source @ (sqlx::Error::Io(_) | sqlx::Error::Tls(_)) => OrmError::Connection {
                target: state
                    .as_ref()
                    .map_or_else(String::new, |s| s.target.clone()),
                source,
            },
            other => OrmError::Database(other),
        }
    }

    fn record_failure(&self, error: sqlx::Error, action: &str) -> OrmError {
        self.acquire_errors.fetch_add(1, Ordering::Relaxed);
        let error = self.classify_error(error);
        error!("Failed to {}: {}", action, error);
        error
    }

    /// Wait for a connection; it returns to the pool when the handle is dropped
    pub async fn acquire(&self) -> OrmResult<PoolConnection<Postgres>> {
        let pool = self.pool()?;
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        let _waiting = WaitingGuard::enter(&self.waiting);
        match pool.acquire().await {
            Ok(conn) => {
                debug!(
                    "Database connection acquired (total: {}, idle: {})",
                    pool.size(),
                    pool.num_idle()
                );
                Ok(conn)
            }
            Err(e) => Err(self.record_failure(e, "acquire database connection")),
        }
    }

    /// Acquire a connection and open a transaction on it
    pub async fn begin(&self) -> OrmResult<Transaction<'static, Postgres>> {
        let pool = self.pool()?;
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        let _waiting = WaitingGuard::enter(&self.waiting);
        match pool.begin().await {
            Ok(tx) => {
                debug!("Database transaction started");
                Ok(tx)
            }
            Err(e) => Err(self.record_failure(e, "begin database transaction")),
        }
    }

    /// Run a single statement outside of any explicit transaction
    pub async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let mut conn = self.acquire().await?;
        debug!("Executing: {}", sql);
        let result = bind_all(sql, params).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<PgRow>> {
        let mut conn = self.acquire().await?;
        debug!("Fetching: {}", sql);
        Ok(bind_all(sql, params).fetch_all(&mut *conn).await?)
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<PgRow>> {
        let mut conn = self.acquire().await?;
        debug!("Fetching: {}", sql);
        Ok(bind_all(sql, params).fetch_optional(&mut *conn).await?)
    }

    /// Probe the database; failures are reported in the status, never raised
    pub async fn health_check(&self) -> HealthStatus {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => {
                return HealthStatus {
                    healthy: false,
                    message: e.to_string(),
                    latency: None,
                }
            }
        };

        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => {
                let latency = start.elapsed();
                debug!("Database health check passed in {:?}", latency);
                HealthStatus {
                    healthy: true,
                    message: "ok".to_string(),
                    latency: Some(latency),
                }
            }
            Err(e) => {
                let error = self.classify_error(e);
                warn!("Database health check failed: {}", error);
                HealthStatus {
                    healthy: false,
                    message: error.to_string(),
                    latency: None,
                }
            }
        }
    }

    /// Point-in-time statistics, `None` before initialization
    pub fn stats(&self) -> Option<PoolStats> {
        let state = self.read_state();
        let pool = &state.as_ref()?.pool;

        let total = pool.size();
        let idle = pool.num_idle() as u32;
        Some(PoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            waiting: self.waiting.load(Ordering::Relaxed),
            acquire_count: self.acquire_count.load(Ordering::Relaxed),
            acquire_errors: self.acquire_errors.load(Ordering::Relaxed),
        })
    }

    /// Drain the pool, waiting for checked-out connections to come back.
    ///
    /// Later operations fail with [`OrmError::NotInitialized`].
    pub async fn close(&self) {
        let state = self.write_state().take();
        if let Some(state) = state {
            state.pool.close().await;
            info!("Database pool for {} closed", state.target);
        }
    }

    /// Close the pool and clear its counters so it can be initialized again
    pub async fn reset(&self) {
        self.close().await;
        self.acquire_count.store(0, Ordering::Relaxed);
        self.acquire_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_pool() {
        let pool = ManagedPool::new();

        assert!(!pool.is_initialized());
        assert!(pool.stats().is_none());
        assert!(pool.uptime().is_none());
        assert!(matches!(pool.acquire().await, Err(OrmError::NotInitialized)));
        assert!(matches!(
            pool.execute("SELECT 1", &[]).await,
            Err(OrmError::NotInitialized)
        ));

        let health = pool.health_check().await;
        assert!(!health.healthy);
        assert!(health.latency.is_none());
        assert!(health.message.contains("not initialized"));

        // Closing an uninitialized pool is a no-op.
        pool.close().await;
        assert!(!pool.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let pool = ManagedPool::new();
        let config = DatabaseConfig {
            max_connections: 0,
            ..Default::default()
        };

        let err = pool.initialize(&config).await.unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
        assert!(!pool.is_initialized());
    }

    #[test]
    fn test_waiting_guard_balances_counter() {
        let counter = AtomicUsize::new(0);
        {
            let _a = WaitingGuard::enter(&counter);
            let _b = WaitingGuard::enter(&counter);
            assert_eq!(counter.load(Ordering::Relaxed), 2);
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_timeout_classification() {
        let pool = ManagedPool::new();
        assert!(matches!(
            pool.classify_error(sqlx::Error::PoolTimedOut),
            OrmError::ConnectionTimeout { .. }
        ));
        assert!(matches!(
            pool.classify_error(sqlx::Error::PoolClosed),
            OrmError::PoolClosed
        ));
        assert!(matches!(
            pool.classify_error(sqlx::Error::RowNotFound),
            OrmError::Database(_)
        ));
    }
}
