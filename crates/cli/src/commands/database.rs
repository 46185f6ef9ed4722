use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use strata_core::config::DatabaseConfig;
use strata_orm::{ManagedPool, SeedRunner};

/// Initialize the shared pool; the error names the target but never the password
pub async fn connect(pool: &ManagedPool, config: &DatabaseConfig) -> anyhow::Result<()> {
    pool.initialize(config)
        .await
        .with_context(|| format!("Database unreachable at {}", config.display_target()))?;
    tracing::debug!(target: "strata::cli", "Connected to {}", config.display_target());
    Ok(())
}

pub async fn seed(pool: &Arc<ManagedPool>, dir: &Path) -> anyhow::Result<()> {
    let runner = SeedRunner::new(pool.clone(), dir);
    let executed = runner.run().await.context("Seeding failed")?;

    if executed.is_empty() {
        println!("No seed files found in {}", dir.display());
    } else {
        for name in &executed {
            println!("  🌱 {}", name);
        }
        println!("✅ Ran {} seed file(s)", executed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_error_hides_password() {
        let config = DatabaseConfig {
            password: "hunter2".to_string(),
            max_connections: 0,
            ..Default::default()
        };

        let err = connect(&ManagedPool::new(), &config).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("localhost:5432/app"));
        assert!(!message.contains("hunter2"));
    }
}
