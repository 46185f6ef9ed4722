use std::env;
use std::str::FromStr;

use super::validation::ConfigError;

/// Where a configuration value came from, for `status` output and debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default(String),
    /// Value derived from `DATABASE_URL`
    DatabaseUrl,
    /// Value loaded from nested configuration
    Nested,
}

impl ConfigSource {
    /// Resolve the source for an environment-backed field
    pub fn for_env(key: &str, default: &str) -> Self {
        if env::var(key).is_ok() {
            ConfigSource::EnvVar(key.to_string())
        } else {
            ConfigSource::Default(default.to_string())
        }
    }

    /// Get source description
    pub fn description(&self) -> String {
        match self {
            ConfigSource::EnvVar(var) => format!("Environment variable: {}", var),
            ConfigSource::Default(value) => format!("Default value: {}", value),
            ConfigSource::DatabaseUrl => "DATABASE_URL".to_string(),
            ConfigSource::Nested => "Nested configuration".to_string(),
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// Helper functions for environment variable handling

pub(crate) fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub(crate) fn get_env_or_default(key: &str, default: &str) -> String {
    get_env_optional(key).unwrap_or_else(|| default.to_string())
}

/// Read `key` and parse it, falling back to `default` when unset.
pub(crate) fn parse_env_or_default<T: FromStr>(
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match get_env_optional(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::invalid_value(key, raw, expected)),
        None => Ok(default),
    }
}

pub(crate) fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(key, raw, "true or false")),
    }
}

pub(crate) fn parse_bool_env_or_default(key: &str, default: bool) -> Result<bool, ConfigError> {
    match get_env_optional(key) {
        Some(raw) => parse_bool(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        for raw in ["true", "TRUE", "1", "yes", "on", " true "] {
            assert!(parse_bool("DB_SSL", raw).unwrap(), "{raw}");
        }
        for raw in ["false", "0", "no", "OFF"] {
            assert!(!parse_bool("DB_SSL", raw).unwrap(), "{raw}");
        }
        assert!(parse_bool("DB_SSL", "maybe").is_err());
    }

    #[test]
    fn test_source_description() {
        assert_eq!(
            ConfigSource::EnvVar("DB_HOST".to_string()).to_string(),
            "Environment variable: DB_HOST"
        );
        assert_eq!(
            ConfigSource::Default("localhost".to_string()).to_string(),
            "Default value: localhost"
        );
    }
}
