// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution of DDL against the database server.

mod mock;

pub use mock::MockProvisioner;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::ddl::Ddl;
use crate::error::{Error, Result};

/// Executes server-level DDL (databases, roles, grants).
///
/// Each statement commits on its own; callers compensate rather than roll back.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Execute one statement. Failures are `Error::Ddl` carrying the statement kind.
    async fn execute(&self, statement: &Ddl) -> Result<()>;
}

/// Provisioner issuing DDL over a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresProvisioner {
    pool: PgPool,
}

impl PostgresProvisioner {
    /// Create a provisioner over the control-database pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Provisioner for PostgresProvisioner {
    async fn execute(&self, statement: &Ddl) -> Result<()> {
        debug!(kind = %statement.kind(), "Executing DDL");

        // DDL cannot be prepared with parameters, so it goes over the simple protocol.
        let sql = statement.sql();
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|source| Error::Ddl {
                kind: statement.kind(),
                source,
            })?;

        Ok(())
    }
}
