//! # strata-core
//!
//! Environment-driven configuration and logging bootstrap shared by the
//! strata crates.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, AppConfigTrait, ConfigError, ConfigSource, DatabaseConfig, LoggingConfig,
    MigrationsConfig,
};
pub use logging::init_logging;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get toolkit version
pub fn version() -> &'static str {
    VERSION
}
