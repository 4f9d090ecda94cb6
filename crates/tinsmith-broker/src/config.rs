// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use tinsmith_core::ddl::Identifier;
use tinsmith_core::schema::DEFAULT_CONTROL_DATABASE;

/// Default catalog service and plan id.
pub const DEFAULT_SERVICE_ID: &str = "postgres-c504319a-61e7-459e-83ac-01243787689b";

/// What the broker advertises in its catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Service id
    pub service_id: String,
    /// Service name
    pub service_name: String,
    /// Plan id
    pub plan_id: String,
    /// Plan name
    pub plan_name: String,
    /// Description shared by the service and its plan
    pub description: String,
    /// Service tags
    pub tags: Vec<String>,
}

/// Tinsmith broker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Catalog entry
    pub catalog: CatalogConfig,
    /// Metadata service instance to use, by name, instead of tag lookup
    pub use_service: Option<String>,
    /// Name of the broker's own database
    pub control_database: Identifier,
    /// Limit on asynchronous provision/deprovision work
    pub operation_timeout: Option<Duration>,
    /// Wait for a free server connection, overriding the connection manager's default
    pub acquire_timeout: Option<Duration>,
    /// Raw `VCAP_SERVICES` document
    pub vcap_services: String,
    /// Raw `VCAP_APPLICATION` document
    pub vcap_application: Option<String>,
}

/// Read `key`, treating an empty value as unset.
fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

/// Read `key` as a positive number of seconds.
fn secs_var(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::Invalid(key, "must be a positive integer")),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VCAP_SERVICES`: platform service metadata
    ///
    /// Optional (with defaults):
    /// - `SERVICE_ID` / `PLAN_ID`: catalog ids (default: `postgres-c504319a-...`)
    /// - `SERVICE_NAME`: catalog service name (default: postgres)
    /// - `PLAN_NAME`: catalog plan name (default: shared)
    /// - `DESCRIPTION`: catalog description (default: A shared PostgreSQL database)
    /// - `TAGS`: comma-separated tags (default: shared,postgres,postgresql,tinsmith)
    /// - `USE_SERVICE`: metadata service instance name (default: tag lookup)
    /// - `TINSMITH_CONTROL_DATABASE`: control database name (default: broker)
    /// - `TINSMITH_OPERATION_TIMEOUT_SECS`: async operation timeout (default: none)
    /// - `TINSMITH_ACQUIRE_TIMEOUT_SECS`: wait for a free server connection (default: 30)
    /// - `VCAP_APPLICATION`: platform application metadata
    pub fn from_env() -> Result<Self, ConfigError> {
        let catalog = CatalogConfig {
            service_id: var_or("SERVICE_ID", DEFAULT_SERVICE_ID),
            service_name: var_or("SERVICE_NAME", "postgres"),
            plan_id: var_or("PLAN_ID", DEFAULT_SERVICE_ID),
            plan_name: var_or("PLAN_NAME", "shared"),
            description: var_or("DESCRIPTION", "A shared PostgreSQL database"),
            tags: var_or("TAGS", "shared,postgres,postgresql,tinsmith")
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        };

        let control_database =
            Identifier::new(var_or("TINSMITH_CONTROL_DATABASE", DEFAULT_CONTROL_DATABASE))
                .map_err(|_| {
                    ConfigError::Invalid(
                        "TINSMITH_CONTROL_DATABASE",
                        "must be a lowercase identifier of at most 63 characters",
                    )
                })?;

        let operation_timeout = secs_var("TINSMITH_OPERATION_TIMEOUT_SECS")?;
        let acquire_timeout = secs_var("TINSMITH_ACQUIRE_TIMEOUT_SECS")?;

        let vcap_services = var("VCAP_SERVICES").ok_or(ConfigError::Missing("VCAP_SERVICES"))?;

        Ok(Self {
            catalog,
            use_service: var("USE_SERVICE"),
            control_database,
            operation_timeout,
            acquire_timeout,
            vcap_services,
            vcap_application: var("VCAP_APPLICATION"),
        })
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

    const ALL_VARS: [&str; 12] = [
        "SERVICE_ID",
        "SERVICE_NAME",
        "PLAN_ID",
        "PLAN_NAME",
        "DESCRIPTION",
        "TAGS",
        "USE_SERVICE",
        "TINSMITH_CONTROL_DATABASE",
        "TINSMITH_OPERATION_TIMEOUT_SECS",
        "TINSMITH_ACQUIRE_TIMEOUT_SECS",
        "VCAP_SERVICES",
        "VCAP_APPLICATION",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        /// Start from an environment with none of the broker's variables set.
        fn clean() -> Self {
            let mut guard = Self::new();
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
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
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");

        let config = Config::from_env().unwrap();

        assert_eq!(config.catalog.service_id, DEFAULT_SERVICE_ID);
        assert_eq!(config.catalog.plan_id, DEFAULT_SERVICE_ID);
        assert_eq!(config.catalog.service_name, "postgres");
        assert_eq!(config.catalog.plan_name, "shared");
        assert_eq!(config.catalog.description, "A shared PostgreSQL database");
        assert_eq!(
            config.catalog.tags,
            vec!["shared", "postgres", "postgresql", "tinsmith"]
        );
        assert_eq!(config.control_database.as_str(), "broker");
        assert!(config.use_service.is_none());
        assert!(config.operation_timeout.is_none());
        assert!(config.acquire_timeout.is_none());
        assert!(config.vcap_application.is_none());
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");
        guard.set("VCAP_APPLICATION", "{\"name\":\"tinsmith\"}");
        guard.set("SERVICE_ID", "svc-1");
        guard.set("SERVICE_NAME", "pg");
        guard.set("PLAN_ID", "plan-1");
        guard.set("PLAN_NAME", "tiny");
        guard.set("DESCRIPTION", "Tiny databases");
        guard.set("TAGS", "a, b,,c");
        guard.set("USE_SERVICE", "my-pg");
        guard.set("TINSMITH_CONTROL_DATABASE", "tinsmith_ctl");
        guard.set("TINSMITH_OPERATION_TIMEOUT_SECS", "120");
        guard.set("TINSMITH_ACQUIRE_TIMEOUT_SECS", "300");

        let config = Config::from_env().unwrap();

        assert_eq!(config.catalog.service_id, "svc-1");
        assert_eq!(config.catalog.service_name, "pg");
        assert_eq!(config.catalog.plan_id, "plan-1");
        assert_eq!(config.catalog.plan_name, "tiny");
        assert_eq!(config.catalog.description, "Tiny databases");
        assert_eq!(config.catalog.tags, vec!["a", "b", "c"]);
        assert_eq!(config.use_service.as_deref(), Some("my-pg"));
        assert_eq!(config.control_database.as_str(), "tinsmith_ctl");
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(300)));
        assert!(config.vcap_application.is_some());
    }

    #[test]
    fn test_config_empty_value_uses_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");
        guard.set("SERVICE_NAME", "");
        guard.set("USE_SERVICE", "");

        let config = Config::from_env().unwrap();

        assert_eq!(config.catalog.service_name, "postgres");
        assert!(config.use_service.is_none());
    }

    #[test]
    fn test_config_missing_vcap_services() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VCAP_SERVICES")));
        assert!(err.to_string().contains("VCAP_SERVICES"));
    }

    #[test]
    fn test_config_invalid_control_database() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");
        guard.set("TINSMITH_CONTROL_DATABASE", "Broker; DROP");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("TINSMITH_CONTROL_DATABASE", _)
        ));
    }

    #[test]
    fn test_config_invalid_operation_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");

        for bad in ["abc", "-5", "0"] {
            guard.set("TINSMITH_OPERATION_TIMEOUT_SECS", bad);
            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid("TINSMITH_OPERATION_TIMEOUT_SECS", _)
            ));
        }
    }

    #[test]
    fn test_config_invalid_acquire_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("VCAP_SERVICES", "{}");
        guard.set("TINSMITH_ACQUIRE_TIMEOUT_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("TINSMITH_ACQUIRE_TIMEOUT_SECS", _)
        ));
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
