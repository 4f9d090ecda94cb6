// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection manager.
//!
//! Holds at most one live handle. Startup opens the bootstrap database,
//! switches to the control database, and hands the resulting pool to the
//! registry and provisioner.

use std::fmt;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, info};

use crate::error::Result;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Connections per handle unless overridden.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Wait for a free connection unless overridden.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Server address and administrative login.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Administrative role.
    pub username: String,
    /// Password for the administrative role.
    pub password: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl ConnectionSettings {
    /// Connect options for `database`.
    ///
    /// Built field by field, so credentials containing URL metacharacters
    /// need no escaping.
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(database)
    }
}

/// Owner of the single live database handle.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    max_connections: u32,
    acquire_timeout: Duration,
    pool: Option<PgPool>,
    database: Option<String>,
}

impl ConnectionManager {
    /// Create a manager with no open handle.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            pool: None,
            database: None,
        }
    }

    /// Set the number of connections per handle.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Set how long any statement on the handle may wait for a free connection.
    ///
    /// This also bounds the initial connect in [`open`](Self::open). With a
    /// single connection, statements queue behind whatever is running, so a
    /// `CREATE DATABASE` slower than the timeout makes concurrent registry
    /// reads fail and polls report `failed`. Raise the timeout or the
    /// connection count for servers with slow DDL.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Open a handle to `database`, replacing and closing the current one.
    ///
    /// The previous handle is kept if the new one cannot be opened.
    pub async fn open(&mut self, database: &str) -> Result<&PgPool> {
        debug!(
            host = %self.settings.host,
            port = self.settings.port,
            database = %database,
            "Opening database handle"
        );

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.settings.connect_options(database))
            .await?;

        if let Some(previous) = self.pool.take() {
            previous.close().await;
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            database = %database,
            "Connected to database"
        );

        self.database = Some(database.to_string());
        Ok(self.pool.insert(pool))
    }

    /// The live handle, if one is open.
    pub fn current(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Database the live handle points at.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Close the live handle, if any.
    pub async fn close(&mut self) {
        self.database = None;
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            host: "db.internal".to_string(),
            port: 6432,
            username: "admin".to_string(),
            password: "p@ss/word:#?".to_string(),
        }
    }

    #[test]
    fn test_connect_options_target_database() {
        let options = settings().connect_options("broker");
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_username(), "admin");
        assert_eq!(options.get_database(), Some("broker"));
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let debug = format!("{:?}", settings());
        assert!(debug.contains("admin"));
        assert!(!debug.contains("p@ss"));
    }

    #[test]
    fn test_new_manager_has_no_handle() {
        let manager = ConnectionManager::new(settings()).with_max_connections(0);
        assert!(manager.current().is_none());
        assert!(manager.database().is_none());
        assert_eq!(manager.max_connections, 1);
        assert_eq!(manager.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn test_acquire_timeout_override() {
        let manager = ConnectionManager::new(settings())
            .with_max_connections(4)
            .with_acquire_timeout(Duration::from_secs(600));
        assert_eq!(manager.max_connections, 4);
        assert_eq!(manager.acquire_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_failed_open_is_an_error() {
        let mut manager = ConnectionManager::new(ConnectionSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "nobody".to_string(),
            password: "nothing".to_string(),
        })
        .with_acquire_timeout(Duration::from_secs(2));

        assert!(manager.open("postgres").await.is_err());
        assert!(manager.current().is_none());
    }
}
