// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform metadata parsing.
//!
//! `VCAP_SERVICES` maps a service label to the instances bound to the
//! broker's own application:
//!
//! ```json
//! {
//!   "postgres": [
//!     {
//!       "name": "broker-db",
//!       "label": "postgres",
//!       "tags": ["postgres"],
//!       "credentials": { "host": "10.0.0.5", "port": 5432, "username": "admin", ... }
//!     }
//!   ]
//! }
//! ```
//!
//! The selected instance supplies the server address and administrative
//! login the broker provisions with.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tinsmith_core::connection::{ConnectionSettings, DEFAULT_PORT};
use tracing::warn;

/// Tags that mark a usable PostgreSQL service.
pub const POSTGRES_TAGS: [&str; 2] = ["postgres", "postgresql"];

/// Credential keys consulted, in order, for the bootstrap database name.
pub const DATABASE_NAME_KEYS: [&str; 3] = ["db_name", "name", "database"];

/// Errors in platform metadata. Each maps to a process exit code.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// A metadata document is not valid JSON of the expected shape.
    #[error("{var}: {source}")]
    Parse {
        /// Environment variable holding the document.
        var: &'static str,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// `USE_SERVICE` names an instance that is not bound.
    #[error("VCAP_SERVICES: no service named '{0}' found")]
    ServiceNotFound(String),

    /// No bound instance carries a PostgreSQL tag.
    #[error("VCAP_SERVICES: no 'postgres' service found")]
    NoPostgresService,

    /// The selected instance lacks a required credential.
    #[error("VCAP_SERVICES: '{label}' service has no '{key}' credential")]
    MissingCredential {
        /// Service label.
        label: String,
        /// Credential key.
        key: &'static str,
    },

    /// A credential is present but unusable.
    #[error("VCAP_SERVICES: '{label}' service has an invalid '{key}' credential")]
    InvalidCredential {
        /// Service label.
        label: String,
        /// Credential key.
        key: &'static str,
    },
}

impl MetadataError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse { .. } => 1,
            Self::ServiceNotFound(_) | Self::NoPostgresService => 2,
            Self::MissingCredential { .. } | Self::InvalidCredential { .. } => 3,
        }
    }
}

/// One bound service instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInstance {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Service label.
    #[serde(default)]
    pub label: String,
    /// Service tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Plan name.
    #[serde(default)]
    pub plan: Option<String>,
    /// Credential block.
    #[serde(default)]
    pub credentials: Map<String, Value>,
}

impl ServiceInstance {
    /// A credential as a string. Numbers are rendered in decimal.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.credentials.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The bootstrap database name, under the first of [`DATABASE_NAME_KEYS`] present.
    pub fn database_name(&self) -> Option<String> {
        DATABASE_NAME_KEYS
            .iter()
            .find_map(|key| self.get_string(key))
    }

    fn has_tag(&self, tags: &[&str]) -> bool {
        self.tags.iter().any(|t| tags.contains(&t.as_str()))
    }
}

/// Parsed `VCAP_SERVICES`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Services(BTreeMap<String, Vec<ServiceInstance>>);

impl Services {
    /// Parse a `VCAP_SERVICES` document.
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        serde_json::from_str(raw).map_err(|source| MetadataError::Parse {
            var: "VCAP_SERVICES",
            source,
        })
    }

    fn instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.0.values().flatten()
    }

    /// The instance with the given name.
    pub fn named(&self, name: &str) -> Option<&ServiceInstance> {
        self.instances().find(|i| i.name == name)
    }

    /// The first instance carrying any of `tags`.
    pub fn tagged(&self, tags: &[&str]) -> Option<&ServiceInstance> {
        self.instances().find(|i| i.has_tag(tags))
    }

    /// Select the broker's backing instance, by name if given, else by PostgreSQL tag.
    pub fn select(&self, use_service: Option<&str>) -> Result<&ServiceInstance, MetadataError> {
        match use_service {
            Some(name) => self
                .named(name)
                .ok_or_else(|| MetadataError::ServiceNotFound(name.to_string())),
            None => self
                .tagged(&POSTGRES_TAGS)
                .ok_or(MetadataError::NoPostgresService),
        }
    }
}

/// Parsed `VCAP_APPLICATION`. Only used for the startup log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Application {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Routes to the application.
    pub uris: Vec<String>,
}

// The platform sends both the short and the `application_` prefixed keys.
#[derive(Deserialize)]
struct RawApplication {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    application_name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    application_version: Option<String>,
    #[serde(default)]
    uris: Option<Vec<String>>,
    #[serde(default)]
    application_uris: Option<Vec<String>>,
}

impl Application {
    /// Parse a `VCAP_APPLICATION` document.
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let raw: RawApplication =
            serde_json::from_str(raw).map_err(|source| MetadataError::Parse {
                var: "VCAP_APPLICATION",
                source,
            })?;
        Ok(Self {
            name: raw.application_name.or(raw.name).unwrap_or_default(),
            version: raw.application_version.or(raw.version).unwrap_or_default(),
            uris: raw.application_uris.or(raw.uris).unwrap_or_default(),
        })
    }
}

/// Server address and administrative login taken from the selected instance.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    /// Administrative role.
    pub username: String,
    /// Password for the administrative role.
    pub password: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database to connect to before the control database exists.
    pub database: String,
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl DatabaseCredentials {
    /// Read credentials from a service instance.
    ///
    /// A missing port falls back to 5432 with a warning.
    pub fn from_instance(instance: &ServiceInstance) -> Result<Self, MetadataError> {
        let required = |key: &'static str| {
            instance
                .get_string(key)
                .ok_or_else(|| MetadataError::MissingCredential {
                    label: instance.label.clone(),
                    key,
                })
        };

        let username = required("username")?;
        let password = required("password")?;
        let host = required("host")?;
        let database = instance
            .database_name()
            .ok_or_else(|| MetadataError::MissingCredential {
                label: instance.label.clone(),
                key: "db_name",
            })?;

        let port = match instance.get_string("port") {
            Some(raw) => raw
                .parse()
                .map_err(|_| MetadataError::InvalidCredential {
                    label: instance.label.clone(),
                    key: "port",
                })?,
            None => {
                warn!(
                    label = %instance.label,
                    "Service has no 'port' credential; using default of {}",
                    DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        };

        Ok(Self {
            username,
            password,
            host,
            port,
            database,
        })
    }

    /// Connection settings for the connection manager.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}
