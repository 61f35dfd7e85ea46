// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use chrono::FixedOffset;

use crate::persistence::DEFAULT_ANONYMOUS_NAME;

/// Storage backend selected by the database URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

/// Givers core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Connection pool size
    pub max_connections: u32,
    /// Platform timezone; calendar months are evaluated in this offset
    pub platform_offset: FixedOffset,
    /// Feed display name for actors with an empty stored name
    pub anonymous_display_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GIVERS_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `GIVERS_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `GIVERS_PLATFORM_UTC_OFFSET`: `±HH:MM` (default: +09:00)
    /// - `GIVERS_ANONYMOUS_DISPLAY_NAME`: feed placeholder (default: anonymous)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("GIVERS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("GIVERS_DATABASE_URL"))?;
        if backend_of(&database_url).is_none() {
            return Err(ConfigError::Invalid(
                "GIVERS_DATABASE_URL",
                "must start with postgres://, postgresql:// or sqlite:",
            ));
        }

        let max_connections: u32 = std::env::var("GIVERS_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "GIVERS_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let platform_offset = std::env::var("GIVERS_PLATFORM_UTC_OFFSET")
            .unwrap_or_else(|_| "+09:00".to_string())
            .parse::<FixedOffset>()
            .map_err(|_| {
                ConfigError::Invalid("GIVERS_PLATFORM_UTC_OFFSET", "must be a ±HH:MM offset")
            })?;

        let anonymous_display_name = std::env::var("GIVERS_ANONYMOUS_DISPLAY_NAME")
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_ANONYMOUS_NAME.to_string());

        Ok(Self {
            database_url,
            max_connections,
            platform_offset,
            anonymous_display_name,
        })
    }

    /// Backend implied by the database URL.
    pub fn backend(&self) -> Backend {
        backend_of(&self.database_url).unwrap_or(Backend::Postgres)
    }
}

fn backend_of(url: &str) -> Option<Backend> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Some(Backend::Postgres)
    } else if url.starts_with("sqlite:") {
        Some(Backend::Sqlite)
    } else {
        None
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: [&str; 3] = [
        "GIVERS_MAX_CONNECTIONS",
        "GIVERS_PLATFORM_UTC_OFFSET",
        "GIVERS_ANONYMOUS_DISPLAY_NAME",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for key in OPTIONAL_VARS {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "postgres://localhost/givers");
        guard.clear_optional();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/givers");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.platform_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(config.anonymous_display_name, "anonymous");
        assert_eq!(config.backend(), Backend::Postgres);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "sqlite:givers.db");
        guard.set("GIVERS_MAX_CONNECTIONS", "4");
        guard.set("GIVERS_PLATFORM_UTC_OFFSET", "-05:30");
        guard.set("GIVERS_ANONYMOUS_DISPLAY_NAME", "匿名");

        let config = Config::from_env().unwrap();

        assert_eq!(config.backend(), Backend::Sqlite);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.platform_offset.local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(config.anonymous_display_name, "匿名");
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("GIVERS_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GIVERS_DATABASE_URL")));
        assert!(err.to_string().contains("GIVERS_DATABASE_URL"));
    }

    #[test]
    fn test_config_unknown_scheme() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "mysql://localhost/givers");
        guard.clear_optional();

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("GIVERS_DATABASE_URL", _)
        ));
    }

    #[test]
    fn test_config_invalid_max_connections() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "postgres://localhost/givers");
        guard.clear_optional();

        for value in ["abc", "0", "-5"] {
            guard.set("GIVERS_MAX_CONNECTIONS", value);
            assert!(
                matches!(
                    Config::from_env().unwrap_err(),
                    ConfigError::Invalid("GIVERS_MAX_CONNECTIONS", _)
                ),
                "value {value:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_invalid_offset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "postgres://localhost/givers");
        guard.clear_optional();
        guard.set("GIVERS_PLATFORM_UTC_OFFSET", "Asia/Tokyo");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("GIVERS_PLATFORM_UTC_OFFSET", _)
        ));
    }

    #[test]
    fn test_empty_display_name_falls_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("GIVERS_DATABASE_URL", "sqlite::memory:");
        guard.clear_optional();
        guard.set("GIVERS_ANONYMOUS_DISPLAY_NAME", "");

        let config = Config::from_env().unwrap();
        assert_eq!(config.anonymous_display_name, "anonymous");
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
