// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL registry backend.
//!
//! `dbs` and `creds` use fixed-width `CHAR` columns, so variable-length ids
//! come back blank-padded and are trimmed on read.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{BindingRecord, CredentialRecord, InstanceRecord, Persistence};
use crate::error::{Error, Result, UNIQUE_VIOLATION};
use crate::state::InstanceState;

/// Unique constraint on `dbs.instance`.
const INSTANCE_KEY: &str = "dbs_instance_key";

/// PostgreSQL-backed registry.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a registry over a control-database pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    instance_id: Option<String>,
    db_name: String,
    state: Option<String>,
    expires: i64,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = Error;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Self {
            instance_id: row.instance_id.unwrap_or_default(),
            db_name: row.db_name,
            state: parse_state(row.state)?,
            expires: row.expires,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BindingRow {
    binding_id: String,
    instance_id: Option<String>,
    user_name: String,
    db_name: String,
    state: Option<String>,
}

fn parse_state(state: Option<String>) -> Result<InstanceState> {
    state
        .ok_or_else(|| Error::InvalidState("NULL".to_string()))?
        .parse()
}

// ============================================================================
// Instance Operations
// ============================================================================

/// Whether a `dbs` row exists for the instance.
pub async fn instance_exists(pool: &PgPool, instance_id: &str) -> Result<bool> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM dbs WHERE instance = $1")
        .bind(instance_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Insert an instance row in `setup` state.
pub async fn create_instance(pool: &PgPool, instance_id: &str, db_name: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dbs (instance, name, state, expires)
        VALUES ($1, $2, 'setup'::state, 0)
        "#,
    )
    .bind(instance_id)
    .bind(db_name)
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint() == Some(INSTANCE_KEY) =>
        {
            Error::InstanceAlreadyExists(instance_id.to_string())
        }
        _ => Error::Database(e),
    })?;

    Ok(())
}

/// Load an instance row.
pub async fn get_instance(pool: &PgPool, instance_id: &str) -> Result<Option<InstanceRecord>> {
    let row = sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT rtrim(instance) AS instance_id,
               rtrim(name) AS db_name,
               state::TEXT AS state,
               COALESCE(expires, 0)::BIGINT AS expires
        FROM dbs
        WHERE instance = $1
        "#,
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;

    row.map(InstanceRecord::try_from).transpose()
}

/// Set the state of an instance.
pub async fn update_instance_state(
    pool: &PgPool,
    instance_id: &str,
    state: InstanceState,
) -> Result<()> {
    let result = sqlx::query("UPDATE dbs SET state = $2::state WHERE instance = $1")
        .bind(instance_id)
        .bind(state.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::InstanceNotFound(instance_id.to_string()));
    }

    Ok(())
}

/// Move an instance to `gone` with an expiry stamp.
pub async fn mark_instance_gone(
    pool: &PgPool,
    instance_id: &str,
    retention: Duration,
) -> Result<()> {
    let retention_secs = i32::try_from(retention.as_secs())
        .map_err(|_| Error::InvalidRequest("retention too large".to_string()))?;

    let result = sqlx::query(
        r#"
        UPDATE dbs
        SET state = 'gone'::state,
            expires = extract(epoch from now())::INTEGER + $2
        WHERE instance = $1
        "#,
    )
    .bind(instance_id)
    .bind(retention_secs)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::InstanceNotFound(instance_id.to_string()));
    }

    Ok(())
}

// ============================================================================
// Credential Operations
// ============================================================================

/// Insert a credential row.
pub async fn insert_credential(pool: &PgPool, credential: &CredentialRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO creds (binding, db, name, pass)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&credential.binding_id)
    .bind(&credential.db_name)
    .bind(&credential.user_name)
    .bind(&credential.password)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a binding joined with its instance.
pub async fn get_binding(pool: &PgPool, binding_id: &str) -> Result<Option<BindingRecord>> {
    let row = sqlx::query_as::<_, BindingRow>(
        r#"
        SELECT rtrim(creds.binding) AS binding_id,
               rtrim(dbs.instance) AS instance_id,
               rtrim(creds.name) AS user_name,
               rtrim(creds.db) AS db_name,
               dbs.state::TEXT AS state
        FROM creds
        INNER JOIN dbs ON creds.db = dbs.name
        WHERE creds.binding = $1
        "#,
    )
    .bind(binding_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(BindingRecord {
            binding_id: row.binding_id,
            instance_id: row.instance_id.unwrap_or_default(),
            user_name: row.user_name,
            db_name: row.db_name,
            state: parse_state(row.state)?,
        })
    })
    .transpose()
}

/// Role names bound to an instance's database.
pub async fn list_instance_users(pool: &PgPool, instance_id: &str) -> Result<Vec<String>> {
    let users = sqlx::query_scalar::<_, String>(
        r#"
        SELECT rtrim(creds.name)
        FROM creds
        INNER JOIN dbs ON creds.db = dbs.name
        WHERE dbs.instance = $1
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    Ok(users)
}

/// Delete the credential row for a role.
pub async fn delete_credential(pool: &PgPool, user_name: &str) -> Result<()> {
    sqlx::query("DELETE FROM creds WHERE name = $1")
        .bind(user_name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every credential row for a database.
pub async fn delete_database_credentials(pool: &PgPool, db_name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM creds WHERE db = $1")
        .bind(db_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Check database connectivity.
pub async fn health_check(pool: &PgPool) -> Result<bool> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(row.0 == 1)
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn instance_exists(&self, instance_id: &str) -> Result<bool> {
        instance_exists(&self.pool, instance_id).await
    }

    async fn create_instance(&self, instance_id: &str, db_name: &str) -> Result<()> {
        create_instance(&self.pool, instance_id, db_name).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        get_instance(&self.pool, instance_id).await
    }

    async fn update_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()> {
        update_instance_state(&self.pool, instance_id, state).await
    }

    async fn mark_instance_gone(&self, instance_id: &str, retention: Duration) -> Result<()> {
        mark_instance_gone(&self.pool, instance_id, retention).await
    }

    async fn insert_credential(&self, credential: &CredentialRecord) -> Result<()> {
        insert_credential(&self.pool, credential).await
    }

    async fn get_binding(&self, binding_id: &str) -> Result<Option<BindingRecord>> {
        get_binding(&self.pool, binding_id).await
    }

    async fn list_instance_users(&self, instance_id: &str) -> Result<Vec<String>> {
        list_instance_users(&self.pool, instance_id).await
    }

    async fn delete_credential(&self, user_name: &str) -> Result<()> {
        delete_credential(&self.pool, user_name).await
    }

    async fn delete_database_credentials(&self, db_name: &str) -> Result<u64> {
        delete_database_credentials(&self.pool, db_name).await
    }

    async fn health_check(&self) -> Result<bool> {
        health_check(&self.pool).await
    }
}
