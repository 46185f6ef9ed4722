//! Database Seeding
//!
//! Runs every `*.sql` file in the seeds directory in file-name order, one
//! transaction per file. Seeds are not recorded anywhere and should be safe
//! to run repeatedly (`ON CONFLICT DO NOTHING` and the like).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::database::ManagedPool;
use crate::error::{OrmError, OrmResult};
use crate::transaction::{with_transaction, TransactionConfig};

/// Seed runner bound to one directory
pub struct SeedRunner {
    pool: Arc<ManagedPool>,
    dir: PathBuf,
}

impl SeedRunner {
    pub fn new(pool: Arc<ManagedPool>, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Seed files sorted by file name; empty if the directory does not exist
    pub fn seed_files(&self) -> OrmResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| OrmError::io(&self.dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| OrmError::io(&self.dir, e))?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Execute every seed file; stops at the first failure
    pub async fn run(&self) -> OrmResult<Vec<String>> {
        let files = self.seed_files()?;
        if files.is_empty() {
            info!("No seed files in {}", self.dir.display());
            return Ok(Vec::new());
        }

        let mut executed = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let body = fs::read_to_string(&path).map_err(|e| OrmError::io(&path, e))?;
            if body.trim().is_empty() {
                debug!("Skipping empty seed file {}", name);
                continue;
            }

            info!("Running seed: {}", name);
            with_transaction(&self.pool, TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.execute_script(&body).await })
            })
            .await
            .map_err(|e| {
                error!("Seed {} failed: {}", name, e);
                e
            })?;
            executed.push(name);
        }

        Ok(executed)
    }
}
