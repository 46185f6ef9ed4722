//! Migration Rollback - Handles reverting applied migrations
//!
//! Reversal follows ledger order (newest row first), not version order, so a
//! hand-edited ledger is reverted the way it was recorded.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{error, info};

use super::definitions::{LedgerEntry, MigrationDirection, MigrationScript, RollbackResult};
use super::runner::MigrationRunner;
use crate::error::{OrmError, OrmResult};
use crate::value::DatabaseValue;

/// Pick the scripts that revert the last `steps` ledger entries, newest first.
///
/// Fails without side effects if any of them has no file or no DOWN section.
pub fn plan_rollback(
    ledger: &[LedgerEntry],
    scripts: &[MigrationScript],
    steps: usize,
) -> OrmResult<Vec<MigrationScript>> {
    let by_name: HashMap<&str, &MigrationScript> =
        scripts.iter().map(|s| (s.name.as_str(), s)).collect();

    ledger
        .iter()
        .rev()
        .take(steps)
        .map(|entry| -> OrmResult<MigrationScript> {
            let script = by_name
                .get(entry.name.as_str())
                .ok_or_else(|| OrmError::MissingScript {
                    name: entry.name.clone(),
                })?;
            if !script.is_reversible() {
                return Err(OrmError::IrreversibleScript {
                    name: entry.name.clone(),
                });
            }
            Ok((*script).clone())
        })
        .collect()
}

impl MigrationRunner {
    /// Revert the `steps` most recently applied migrations
    pub async fn down(&self, steps: usize) -> OrmResult<RollbackResult> {
        let start_time = Instant::now();

        let ledger = self.applied_entries().await?;
        if ledger.is_empty() || steps == 0 {
            info!("No migrations to roll back");
            return Ok(RollbackResult {
                rolled_back: Vec::new(),
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let scripts = self.loader().load_all()?;
        let plan = plan_rollback(&ledger, &scripts, steps).map_err(|e| {
            error!("Rollback aborted before any change: {}", e);
            e
        })?;

        let remove_sql = self.remove_migration_sql();
        let mut rolled_back = Vec::with_capacity(plan.len());

        for script in &plan {
            info!("Rolling back migration: {}", script.name);
            self.run_step(
                &script.name,
                MigrationDirection::Down,
                &script.backward_body,
                &remove_sql,
                &[DatabaseValue::from(script.name.as_str())],
            )
            .await?;
            info!("Rolled back migration: {}", script.name);
            rolled_back.push(script.name.clone());
        }

        Ok(RollbackResult {
            rolled_back,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Revert every applied migration
    pub async fn reset(&self) -> OrmResult<RollbackResult> {
        let applied = self.applied_entries().await?.len();
        self.down(applied).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn script(name: &str, down: &str) -> MigrationScript {
        MigrationScript {
            version: name[..3].to_string(),
            name: name.to_string(),
            forward_body: "SELECT 1;".to_string(),
            backward_body: down.to_string(),
            checksum: String::new(),
            path: PathBuf::from(format!("{}.sql", name)),
        }
    }

    fn ledger(names: &[&str]) -> Vec<LedgerEntry> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| LedgerEntry {
                id: i as i32 + 1,
                name: name.to_string(),
                executed_at: None,
                checksum: String::new(),
            })
            .collect()
    }

    fn names(plan: &[MigrationScript]) -> Vec<&str> {
        plan.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_plan_reverts_newest_first() {
        let scripts = vec![
            script("001-a", "DROP TABLE a;"),
            script("002-b", "DROP TABLE b;"),
            script("003-c", "DROP TABLE c;"),
        ];
        let ledger = ledger(&["001-a", "002-b", "003-c"]);

        assert_eq!(names(&plan_rollback(&ledger, &scripts, 1).unwrap()), vec!["003-c"]);
        assert_eq!(
            names(&plan_rollback(&ledger, &scripts, 2).unwrap()),
            vec!["003-c", "002-b"]
        );
        assert_eq!(
            names(&plan_rollback(&ledger, &scripts, 10).unwrap()),
            vec!["003-c", "002-b", "001-a"]
        );
    }

    #[test]
    fn test_plan_follows_ledger_order_not_version() {
        let scripts = vec![script("001-a", "DROP TABLE a;"), script("002-b", "DROP TABLE b;")];
        let ledger = ledger(&["002-b", "001-a"]);

        assert_eq!(names(&plan_rollback(&ledger, &scripts, 1).unwrap()), vec!["001-a"]);
    }

    #[test]
    fn test_plan_rejects_irreversible_anywhere_in_range() {
        let scripts = vec![script("001-a", ""), script("002-b", "DROP TABLE b;")];
        let ledger = ledger(&["001-a", "002-b"]);

        assert!(plan_rollback(&ledger, &scripts, 1).is_ok());
        let err = plan_rollback(&ledger, &scripts, 2).unwrap_err();
        assert!(matches!(err, OrmError::IrreversibleScript { ref name } if name == "001-a"));
    }

    #[test]
    fn test_plan_rejects_missing_file() {
        let scripts = vec![script("001-a", "DROP TABLE a;")];
        let ledger = ledger(&["001-a", "002-deleted"]);

        let err = plan_rollback(&ledger, &scripts, 1).unwrap_err();
        assert!(matches!(err, OrmError::MissingScript { ref name } if name == "002-deleted"));
    }
}
