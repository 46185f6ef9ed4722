//! Migration System
//!
//! Versioned `NNN-slug.sql` scripts, a ledger table recording which ones
//! have been applied, and checksum-based drift detection.

pub mod checksum;
pub mod definitions;
pub mod loader;
pub mod rollback;
pub mod runner;

pub use checksum::{checksum_file, compute_checksum, find_drift};
pub use definitions::*;
pub use loader::{diff_against_ledger, LedgerDiff, MigrationLoader};
pub use rollback::plan_rollback;
pub use runner::MigrationRunner;
