use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::sources::{
    get_env_optional, get_env_or_default, parse_bool, parse_bool_env_or_default,
    parse_env_or_default, ConfigSource,
};
use super::validation::{validate_identifier, ConfigError};

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Top-level configuration consumed by the `strata` binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub logging: LoggingConfig,
}

/// Connection pool settings
///
/// `Debug` never prints the password; use [`DatabaseConfig::display_target`] in log lines.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Require TLS when true, plain TCP otherwise
    pub ssl: bool,
    pub max_connections: u32,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Locations of migration and seed scripts, and the ledger table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
    pub table: String,
    pub seeds_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "app".to_string(),
            ssl: false,
            max_connections: 10,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 2_000,
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
            table: "schema_migrations".to_string(),
            seeds_dir: PathBuf::from("seeds"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// `host:port/database`, safe to log
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Override connection coordinates from a `postgres://` URL.
    ///
    /// Pool sizing and timeouts are not part of the URL and stay untouched.
    pub fn apply_database_url(&mut self, raw: &str) -> Result<(), ConfigError> {
        let url = Url::parse(raw).map_err(|e| ConfigError::ParsingError {
            message: format!("DATABASE_URL is not a valid URL: {}", e),
        })?;

        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::invalid_value(
                "DATABASE_URL",
                url.scheme(),
                "postgres:// or postgresql:// scheme",
            ));
        }

        if let Some(host) = url.host_str() {
            self.host = host.to_string();
        }
        if let Some(port) = url.port() {
            self.port = port;
        }
        if !url.username().is_empty() {
            self.user = decode_url_part("user", url.username())?;
        }
        if let Some(password) = url.password() {
            self.password = decode_url_part("password", password)?;
        }
        let database = url.path().trim_start_matches('/');
        if !database.is_empty() {
            self.database = decode_url_part("database", database)?;
        }
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => self.ssl = matches!(value.as_ref(), "require" | "verify-ca" | "verify-full"),
                "ssl" => self.ssl = parse_bool("DATABASE_URL?ssl", &value)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Userinfo and path come back percent-encoded from `Url`
fn decode_url_part(part: &str, raw: &str) -> Result<String, ConfigError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ConfigError::ParsingError {
            message: format!("DATABASE_URL {} is not valid UTF-8 once decoded", part),
        })
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl AppConfigTrait for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(AppConfig {
            database: DatabaseConfig::from_env()?,
            migrations: MigrationsConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.migrations.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("database".to_string(), ConfigSource::Nested);
        sources.insert("migrations".to_string(), ConfigSource::Nested);
        sources.insert("logging".to_string(), ConfigSource::Nested);
        sources
    }
}

impl AppConfigTrait for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = DatabaseConfig::default();

        let mut config = DatabaseConfig {
            host: get_env_or_default("DB_HOST", &defaults.host),
            port: parse_env_or_default("DB_PORT", defaults.port, "valid port number (1-65535)")?,
            user: get_env_or_default("DB_USER", &defaults.user),
            password: get_env_or_default("DB_PASSWORD", &defaults.password),
            database: get_env_or_default("DB_NAME", &defaults.database),
            ssl: parse_bool_env_or_default("DB_SSL", defaults.ssl)?,
            max_connections: parse_env_or_default(
                "DB_POOL_MAX",
                defaults.max_connections,
                "positive integer",
            )?,
            idle_timeout_ms: parse_env_or_default(
                "DB_IDLE_TIMEOUT_MS",
                defaults.idle_timeout_ms,
                "milliseconds as integer",
            )?,
            connect_timeout_ms: parse_env_or_default(
                "DB_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
                "milliseconds as integer",
            )?,
        };

        if let Some(url) = get_env_optional("DATABASE_URL") {
            config.apply_database_url(&url)?;
        }

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::validation_failed("host", "Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::validation_failed("port", "Port cannot be 0"));
        }
        if self.database.is_empty() {
            return Err(ConfigError::validation_failed(
                "database",
                "Database name cannot be empty",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::validation_failed(
                "max_connections",
                "Pool must allow at least one connection",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation_failed(
                "connect_timeout_ms",
                "Connect timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let from_url = get_env_optional("DATABASE_URL").is_some();
        let defaults = DatabaseConfig::default();
        let mut sources = HashMap::new();

        let url_backed = [
            ("host", "DB_HOST", defaults.host.clone()),
            ("port", "DB_PORT", defaults.port.to_string()),
            ("user", "DB_USER", defaults.user.clone()),
            ("database", "DB_NAME", defaults.database.clone()),
        ];
        for (field, key, default) in url_backed {
            let source = if from_url {
                ConfigSource::DatabaseUrl
            } else {
                ConfigSource::for_env(key, &default)
            };
            sources.insert(field.to_string(), source);
        }

        sources.insert("ssl".to_string(), ConfigSource::for_env("DB_SSL", "false"));
        sources.insert(
            "max_connections".to_string(),
            ConfigSource::for_env("DB_POOL_MAX", &defaults.max_connections.to_string()),
        );
        sources.insert(
            "idle_timeout_ms".to_string(),
            ConfigSource::for_env("DB_IDLE_TIMEOUT_MS", &defaults.idle_timeout_ms.to_string()),
        );
        sources.insert(
            "connect_timeout_ms".to_string(),
            ConfigSource::for_env(
                "DB_CONNECT_TIMEOUT_MS",
                &defaults.connect_timeout_ms.to_string(),
            ),
        );
        sources
    }
}

impl AppConfigTrait for MigrationsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = MigrationsConfig::default();
        Ok(MigrationsConfig {
            dir: get_env_optional("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            table: get_env_or_default("MIGRATIONS_TABLE", &defaults.table),
            seeds_dir: get_env_optional("SEEDS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.seeds_dir),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("MIGRATIONS_TABLE", &self.table)
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("dir".to_string(), ConfigSource::for_env("MIGRATIONS_DIR", "migrations"));
        sources.insert(
            "table".to_string(),
            ConfigSource::for_env("MIGRATIONS_TABLE", "schema_migrations"),
        );
        sources.insert("seeds_dir".to_string(), ConfigSource::for_env("SEEDS_DIR", "seeds"));
        sources
    }
}

impl AppConfigTrait for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("LOG_LEVEL", "info");
        let format = get_env_or_default("LOG_FORMAT", "compact");

        Ok(LoggingConfig { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "level",
                self.level.clone(),
                "trace, debug, info, warn, or error",
            ));
        }

        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "format",
                self.format.clone(),
                "compact, pretty, or json",
            ));
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("level".to_string(), ConfigSource::for_env("LOG_LEVEL", "info"));
        sources.insert("format".to_string(), ConfigSource::for_env("LOG_FORMAT", "compact"));
        sources
    }
}
