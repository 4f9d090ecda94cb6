// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory registry for testing.
//!
//! Mirrors the `dbs`/`creds` tables including their unique constraints, and
//! lets tests make individual operations fail.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{BindingRecord, CredentialRecord, InstanceRecord, Persistence};
use crate::error::{Error, Result};
use crate::state::InstanceState;

/// Registry operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceOp {
    /// [`Persistence::instance_exists`]
    InstanceExists,
    /// [`Persistence::create_instance`]
    CreateInstance,
    /// [`Persistence::get_instance`]
    GetInstance,
    /// [`Persistence::update_instance_state`]
    UpdateInstanceState,
    /// [`Persistence::mark_instance_gone`]
    MarkInstanceGone,
    /// [`Persistence::insert_credential`]
    InsertCredential,
    /// [`Persistence::get_binding`]
    GetBinding,
    /// [`Persistence::list_instance_users`]
    ListInstanceUsers,
    /// [`Persistence::delete_credential`]
    DeleteCredential,
    /// [`Persistence::delete_database_credentials`]
    DeleteDatabaseCredentials,
}

#[derive(Default)]
struct Tables {
    dbs: BTreeMap<String, InstanceRecord>,
    creds: Vec<CredentialRecord>,
}

/// In-memory [`Persistence`] implementation.
#[derive(Default)]
pub struct MemoryPersistence {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<PersistenceOp>>,
}

impl MemoryPersistence {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail until [`MemoryPersistence::recover`] is called.
    pub async fn fail(&self, op: PersistenceOp) {
        self.failing.lock().await.insert(op);
    }

    /// Stop failing `op`.
    pub async fn recover(&self, op: PersistenceOp) {
        self.failing.lock().await.remove(&op);
    }

    /// Insert an instance row directly, bypassing provisioning.
    pub async fn seed_instance(&self, instance_id: &str, db_name: &str, state: InstanceState) {
        self.tables.lock().await.dbs.insert(
            instance_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                db_name: db_name.to_string(),
                state,
                expires: 0,
            },
        );
    }

    /// Snapshot of every credential row.
    pub async fn credentials(&self) -> Vec<CredentialRecord> {
        self.tables.lock().await.creds.clone()
    }

    /// Snapshot of every instance row.
    pub async fn instances(&self) -> Vec<InstanceRecord> {
        self.tables.lock().await.dbs.values().cloned().collect()
    }

    async fn check(&self, op: PersistenceOp) -> Result<()> {
        if self.failing.lock().await.contains(&op) {
            return Err(Error::Database(sqlx::Error::Protocol(format!(
                "injected failure: {:?}",
                op
            ))));
        }
        Ok(())
    }
}

fn unique_violation(constraint: &str) -> Error {
    Error::Database(sqlx::Error::Protocol(format!(
        "duplicate key value violates unique constraint \"{constraint}\""
    )))
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn instance_exists(&self, instance_id: &str) -> Result<bool> {
        self.check(PersistenceOp::InstanceExists).await?;
        Ok(self.tables.lock().await.dbs.contains_key(instance_id))
    }

    async fn create_instance(&self, instance_id: &str, db_name: &str) -> Result<()> {
        self.check(PersistenceOp::CreateInstance).await?;
        let mut tables = self.tables.lock().await;
        if tables.dbs.contains_key(instance_id) {
            return Err(Error::InstanceAlreadyExists(instance_id.to_string()));
        }
        if tables.dbs.values().any(|r| r.db_name == db_name) {
            return Err(unique_violation("dbs_name_key"));
        }
        tables.dbs.insert(
            instance_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                db_name: db_name.to_string(),
                state: InstanceState::Setup,
                expires: 0,
            },
        );
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        self.check(PersistenceOp::GetInstance).await?;
        Ok(self.tables.lock().await.dbs.get(instance_id).cloned())
    }

    async fn update_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()> {
        self.check(PersistenceOp::UpdateInstanceState).await?;
        match self.tables.lock().await.dbs.get_mut(instance_id) {
            Some(record) => {
                record.state = state;
                Ok(())
            }
            None => Err(Error::InstanceNotFound(instance_id.to_string())),
        }
    }

    async fn mark_instance_gone(&self, instance_id: &str, retention: Duration) -> Result<()> {
        self.check(PersistenceOp::MarkInstanceGone).await?;
        match self.tables.lock().await.dbs.get_mut(instance_id) {
            Some(record) => {
                record.state = InstanceState::Gone;
                record.expires = Utc::now().timestamp() + retention.as_secs() as i64;
                Ok(())
            }
            None => Err(Error::InstanceNotFound(instance_id.to_string())),
        }
    }

    async fn insert_credential(&self, credential: &CredentialRecord) -> Result<()> {
        self.check(PersistenceOp::InsertCredential).await?;
        let mut tables = self.tables.lock().await;
        if tables
            .creds
            .iter()
            .any(|c| c.binding_id == credential.binding_id)
        {
            return Err(unique_violation("creds_binding_key"));
        }
        if tables
            .creds
            .iter()
            .any(|c| c.user_name == credential.user_name)
        {
            return Err(unique_violation("creds_name_key"));
        }
        tables.creds.push(credential.clone());
        Ok(())
    }

    async fn get_binding(&self, binding_id: &str) -> Result<Option<BindingRecord>> {
        self.check(PersistenceOp::GetBinding).await?;
        let tables = self.tables.lock().await;
        let Some(cred) = tables.creds.iter().find(|c| c.binding_id == binding_id) else {
            return Ok(None);
        };
        // inner join: a credential whose database has no instance row is invisible
        Ok(tables
            .dbs
            .values()
            .find(|r| r.db_name == cred.db_name)
            .map(|instance| BindingRecord {
                binding_id: cred.binding_id.clone(),
                instance_id: instance.instance_id.clone(),
                user_name: cred.user_name.clone(),
                db_name: cred.db_name.clone(),
                state: instance.state,
            }))
    }

    async fn list_instance_users(&self, instance_id: &str) -> Result<Vec<String>> {
        self.check(PersistenceOp::ListInstanceUsers).await?;
        let tables = self.tables.lock().await;
        let Some(instance) = tables.dbs.get(instance_id) else {
            return Ok(Vec::new());
        };
        Ok(tables
            .creds
            .iter()
            .filter(|c| c.db_name == instance.db_name)
            .map(|c| c.user_name.clone())
            .collect())
    }

    async fn delete_credential(&self, user_name: &str) -> Result<()> {
        self.check(PersistenceOp::DeleteCredential).await?;
        self.tables
            .lock()
            .await
            .creds
            .retain(|c| c.user_name != user_name);
        Ok(())
    }

    async fn delete_database_credentials(&self, db_name: &str) -> Result<u64> {
        self.check(PersistenceOp::DeleteDatabaseCredentials).await?;
        let mut tables = self.tables.lock().await;
        let before = tables.creds.len();
        tables.creds.retain(|c| c.db_name != db_name);
        Ok((before - tables.creds.len()) as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(binding: &str, user: &str, db: &str) -> CredentialRecord {
        CredentialRecord {
            binding_id: binding.to_string(),
            user_name: user.to_string(),
            password: "p".repeat(64),
            db_name: db.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let store = MemoryPersistence::new();
        store.create_instance("i1", "dba").await.unwrap();
        assert!(matches!(
            store.create_instance("i1", "dbb").await,
            Err(Error::InstanceAlreadyExists(id)) if id == "i1"
        ));
        assert!(store.create_instance("i2", "dba").await.is_err());

        store.insert_credential(&cred("b1", "u1", "dba")).await.unwrap();
        assert!(store.insert_credential(&cred("b1", "u2", "dba")).await.is_err());
        assert!(store.insert_credential(&cred("b2", "u1", "dba")).await.is_err());
    }

    #[tokio::test]
    async fn test_binding_joins_instance_state() {
        let store = MemoryPersistence::new();
        store.seed_instance("i1", "dba", InstanceState::Done).await;
        store.insert_credential(&cred("b1", "u1", "dba")).await.unwrap();
        store.insert_credential(&cred("b2", "u2", "orphan")).await.unwrap();

        let binding = store.get_binding("b1").await.unwrap().unwrap();
        assert_eq!(binding.instance_id, "i1");
        assert_eq!(binding.state, InstanceState::Done);
        assert!(store.get_binding("b2").await.unwrap().is_none());
        assert!(store.get_binding("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_gone_sets_expiry() {
        let store = MemoryPersistence::new();
        store.seed_instance("i1", "dba", InstanceState::Teardown).await;
        store.mark_instance_gone("i1", Duration::from_secs(3600)).await.unwrap();

        let record = store.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(record.state, InstanceState::Gone);
        assert!(record.expires > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryPersistence::new();
        store.fail(PersistenceOp::GetInstance).await;
        assert!(store.get_instance("i1").await.is_err());
        store.recover(PersistenceOp::GetInstance).await;
        assert!(store.get_instance("i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_instance() {
        let store = MemoryPersistence::new();
        let err = store
            .update_instance_state("nope", InstanceState::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(id) if id == "nope"));
    }
}
