use std::sync::Arc;

use anyhow::Context;
use strata_core::config::MigrationsConfig;
use strata_orm::{
    ManagedPool, MigrationConfig, MigrationLoader, MigrationRunner, MigrationStatusReport,
};

pub fn runner(pool: &Arc<ManagedPool>, config: &MigrationsConfig) -> anyhow::Result<MigrationRunner> {
    MigrationRunner::new(pool.clone(), MigrationConfig::from(config))
        .context("Failed to set up migration runner")
}

pub async fn migrate(runner: &MigrationRunner) -> anyhow::Result<()> {
    let result = runner.up().await.context("Migration failed")?;

    if result.applied.is_empty() {
        println!("Nothing to migrate ({} already applied)", result.skipped_count);
    } else {
        for name in &result.applied {
            println!("  ✅ {}", name);
        }
        println!(
            "Applied {} migration(s) in {}ms",
            result.applied.len(),
            result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn rollback(runner: &MigrationRunner, steps: usize) -> anyhow::Result<()> {
    let result = runner.down(steps).await.context("Rollback failed")?;
    print_rolled_back(&result.rolled_back, result.execution_time_ms);
    Ok(())
}

pub async fn reset(runner: &MigrationRunner) -> anyhow::Result<()> {
    let result = runner.reset().await.context("Reset failed")?;
    print_rolled_back(&result.rolled_back, result.execution_time_ms);
    Ok(())
}

fn print_rolled_back(names: &[String], elapsed_ms: u128) {
    if names.is_empty() {
        println!("Nothing to roll back");
        return;
    }
    for name in names {
        println!("  ↩️  {}", name);
    }
    println!("Rolled back {} migration(s) in {}ms", names.len(), elapsed_ms);
}

pub async fn status(runner: &MigrationRunner, json: bool) -> anyhow::Result<()> {
    let report = runner
        .status()
        .await
        .context("Failed to read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

/// Human-readable status listing
fn render_status(report: &MigrationStatusReport) -> String {
    let mut out = String::new();
    out.push_str("Migration Status:\n");
    out.push_str("=================\n");

    if report.applied.is_empty() && report.pending.is_empty() {
        out.push_str("No migrations found\n");
    }
    for name in &report.applied {
        out.push_str(&format!("  ✅ {}\n", name));
    }
    for name in &report.pending {
        out.push_str(&format!("  ⏳ {}\n", name));
    }

    out.push_str(&format!(
        "\n{} applied, {} pending, {} total\n",
        report.applied.len(),
        report.pending.len(),
        report.total
    ));

    for mismatch in &report.drift {
        out.push_str(&format!(
            "⚠️  {} changed since it was applied (recorded {}, now {})\n",
            mismatch.name,
            short_checksum(&mismatch.recorded),
            short_checksum(&mismatch.current)
        ));
    }
    for name in &report.missing {
        out.push_str(&format!("⚠️  {} is applied but its file is missing\n", name));
    }
    out
}

fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

pub fn make(config: &MigrationsConfig, slug: &str) -> anyhow::Result<()> {
    let loader = MigrationLoader::new(&config.dir)?;
    let path = loader
        .create_migration(slug)
        .context("Failed to create migration")?;
    println!("Created migration: {}", path.display());
    Ok(())
}
