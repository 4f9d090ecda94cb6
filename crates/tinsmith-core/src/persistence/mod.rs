// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance and credential registry.
//!
//! The registry lives in the control database: `dbs` holds one row per
//! instance, `creds` one row per binding. [`Persistence`] is the seam the
//! lifecycle manager talks to; [`PostgresPersistence`] is the production
//! backend and [`MemoryPersistence`] a test double with failure injection.

pub mod memory;
pub mod postgres;

pub use self::memory::{MemoryPersistence, PersistenceOp};
pub use self::postgres::PostgresPersistence;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::state::InstanceState;

/// How long a `gone` row is kept before it may be purged.
pub const GONE_RETENTION: Duration = Duration::from_secs(3600);

/// Longest platform-supplied instance or binding id the registry stores.
pub const MAX_PLATFORM_ID_LEN: usize = 36;

/// Instance row from `dbs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Platform-supplied instance id.
    pub instance_id: String,
    /// Backing database name.
    pub db_name: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Epoch seconds after which a `gone` row may be purged; 0 when unscheduled.
    pub expires: i64,
}

/// Credential row from `creds`.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Platform-supplied binding id.
    pub binding_id: String,
    /// Generated role name.
    pub user_name: String,
    /// Generated role password.
    pub password: String,
    /// Database the role was granted on.
    pub db_name: String,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("binding_id", &self.binding_id)
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// A binding joined with the instance that owns its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRecord {
    /// Platform-supplied binding id.
    pub binding_id: String,
    /// Owning instance id.
    pub instance_id: String,
    /// Generated role name.
    pub user_name: String,
    /// Database the role was granted on.
    pub db_name: String,
    /// State of the owning instance.
    pub state: InstanceState,
}

/// Registry storage used by the lifecycle manager.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Whether a row exists for the instance.
    async fn instance_exists(&self, instance_id: &str) -> Result<bool>;

    /// Insert a new instance row in `setup` state with `expires = 0`.
    ///
    /// An id that is already registered fails with
    /// [`Error::InstanceAlreadyExists`](crate::Error::InstanceAlreadyExists).
    async fn create_instance(&self, instance_id: &str, db_name: &str) -> Result<()>;

    /// Load an instance row.
    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>>;

    /// Set the state of an instance. Fails with `InstanceNotFound` if no row matched.
    async fn update_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()>;

    /// Move an instance to `gone` and stamp `expires = now + retention`.
    async fn mark_instance_gone(&self, instance_id: &str, retention: Duration) -> Result<()>;

    /// Insert a credential row.
    async fn insert_credential(&self, credential: &CredentialRecord) -> Result<()>;

    /// Load a binding joined with its instance.
    async fn get_binding(&self, binding_id: &str) -> Result<Option<BindingRecord>>;

    /// Role names bound to an instance's database.
    async fn list_instance_users(&self, instance_id: &str) -> Result<Vec<String>>;

    /// Delete the credential row for a role.
    async fn delete_credential(&self, user_name: &str) -> Result<()>;

    /// Delete every credential row for a database. Returns the number removed.
    async fn delete_database_credentials(&self, db_name: &str) -> Result<u64>;

    /// Whether the registry is reachable.
    async fn health_check(&self) -> Result<bool>;
}
