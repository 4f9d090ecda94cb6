// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema bootstrap for the control database.
//!
//! Every step is idempotent, so the broker can run it on each start:
//!
//! ```ignore
//! use tinsmith_core::connection::ConnectionManager;
//! use tinsmith_core::ddl::Identifier;
//! use tinsmith_core::schema;
//!
//! let mut manager = ConnectionManager::new(settings);
//! let control = Identifier::new(schema::DEFAULT_CONTROL_DATABASE)?;
//! let pool = schema::bootstrap(&mut manager, "postgres", &control).await?;
//! ```

use sqlx::PgPool;
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::ddl::Identifier;
use crate::error::{DUPLICATE_DATABASE, DUPLICATE_OBJECT, Error, Result, sqlstate};

/// Name of the broker's own database unless configured otherwise.
pub const DEFAULT_CONTROL_DATABASE: &str = "broker";

const CREATE_STATE_TYPE: &str = "CREATE TYPE state AS ENUM \
    ('setup', 'in-use', 'teardown', 'done', 'gone', 'failed', 'error')";

const CREATE_DBS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS dbs (
        instance CHAR(36) UNIQUE,
        name     CHAR(42) NOT NULL UNIQUE,
        state    state,
        expires  INTEGER
    )
"#;

const CREATE_CREDS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS creds (
        binding CHAR(36) NOT NULL UNIQUE,
        name    CHAR(17) NOT NULL UNIQUE,
        pass    CHAR(64) NOT NULL,
        db      CHAR(42) NOT NULL
    )
"#;

/// Run `sql`, treating SQLSTATE `tolerated` as success. Returns whether it was tolerated.
async fn execute_tolerating(pool: &PgPool, sql: &str, tolerated: &str) -> Result<bool> {
    match sqlx::raw_sql(sql).execute(pool).await {
        Ok(_) => Ok(false),
        Err(e) if sqlstate(&e).as_deref() == Some(tolerated) => Ok(true),
        Err(e) => Err(Error::Database(e)),
    }
}

/// Create the control database unless it already exists.
pub async fn ensure_control_database(pool: &PgPool, name: &Identifier) -> Result<()> {
    let sql = format!("CREATE DATABASE {name}");
    if execute_tolerating(pool, &sql, DUPLICATE_DATABASE).await? {
        debug!(database = %name, "Control database already exists");
    } else {
        info!(database = %name, "Created control database");
    }
    Ok(())
}

/// Create the `state` type and the `dbs`/`creds` tables unless present.
pub async fn ensure_schemas(pool: &PgPool) -> Result<()> {
    if execute_tolerating(pool, CREATE_STATE_TYPE, DUPLICATE_OBJECT).await? {
        debug!("Type `state` already exists");
    }

    sqlx::raw_sql(CREATE_DBS_TABLE).execute(pool).await?;
    sqlx::raw_sql(CREATE_CREDS_TABLE).execute(pool).await?;

    debug!("Registry schema ready");
    Ok(())
}

/// Open the bootstrap database, ensure the control database, switch to it
/// and ensure the registry schema. Returns the control-database handle.
pub async fn bootstrap(
    manager: &mut ConnectionManager,
    bootstrap_database: &str,
    control_database: &Identifier,
) -> Result<PgPool> {
    let pool = manager.open(bootstrap_database).await?.clone();
    ensure_control_database(&pool, control_database).await?;
    manager.close().await;

    let pool = manager.open(control_database.as_str()).await?.clone();
    ensure_schemas(&pool).await?;

    info!(
        bootstrap_database = %bootstrap_database,
        control_database = %control_database,
        "Schema bootstrap complete"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_type_lists_every_state() {
        for state in crate::state::InstanceState::ALL {
            assert!(
                CREATE_STATE_TYPE.contains(&format!("'{}'", state.as_str())),
                "missing {state}"
            );
        }
    }

    #[test]
    fn test_column_widths_fit_generated_values() {
        use crate::credentials::*;

        let db = DATABASE_PREFIX.len() + DATABASE_RANDOM_LEN;
        let user = USER_PREFIX.len() + USER_RANDOM_LEN;
        assert!(CREATE_DBS_TABLE.contains(&format!("CHAR({db})")));
        assert!(CREATE_CREDS_TABLE.contains(&format!("CHAR({user})")));
        assert!(CREATE_CREDS_TABLE.contains(&format!("CHAR({PASSWORD_LEN})")));
    }
}
