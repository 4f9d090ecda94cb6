// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Asynchronous setup and teardown of instance databases.
//!
//! These bodies run on the lifecycle manager's task queue after the caller
//! has already been told the operation was accepted and, for setup, after the
//! `setup` row has been written. Their only error channel
//! is the instance's `state` column plus a log line.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::ddl::{Ddl, Identifier};
use crate::error::Error;
use crate::persistence::{GONE_RETENTION, Persistence};
use crate::provisioner::Provisioner;
use crate::state::InstanceState;

/// Runs the asynchronous halves of provision and deprovision.
#[async_trait]
pub trait LifecycleRunner: Send + Sync {
    /// Runner type for logging.
    fn runner_type(&self) -> &'static str;

    /// Create the database for an instance registered in `setup`. Returns the final state.
    async fn setup(&self, instance_id: &str, db_name: &Identifier) -> InstanceState;

    /// Drop the instance's roles and database. Returns the final state.
    async fn teardown(&self, instance_id: &str) -> InstanceState;
}

/// Runner that issues registry updates and DDL.
pub struct SqlLifecycleRunner {
    persistence: Arc<dyn Persistence>,
    provisioner: Arc<dyn Provisioner>,
}

impl SqlLifecycleRunner {
    /// Create a runner over a registry and a provisioner.
    pub fn new(persistence: Arc<dyn Persistence>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            persistence,
            provisioner,
        }
    }

    /// Log `error` and flip the instance to `failed`.
    async fn fail(&self, what: &str, instance_id: &str, error: &Error) -> InstanceState {
        error!(instance_id = %instance_id, error = %error, "Failed {}", what);
        if let Err(e) = self
            .persistence
            .update_instance_state(instance_id, InstanceState::Failed)
            .await
        {
            error!(instance_id = %instance_id, error = %e, "Failed to mark instance as failed");
        }
        InstanceState::Failed
    }
}

#[async_trait]
impl LifecycleRunner for SqlLifecycleRunner {
    fn runner_type(&self) -> &'static str {
        "sql"
    }

    async fn setup(&self, instance_id: &str, db_name: &Identifier) -> InstanceState {
        if let Err(e) = self
            .provisioner
            .execute(&Ddl::CreateDatabase(db_name.clone()))
            .await
        {
            return self.fail("creating instance database", instance_id, &e).await;
        }

        if let Err(e) = self
            .persistence
            .update_instance_state(instance_id, InstanceState::Done)
            .await
        {
            error!(
                instance_id = %instance_id,
                error = %e,
                "Unable to transition instance from [setup] -> [done]"
            );
            return InstanceState::Setup;
        }

        info!(instance_id = %instance_id, db_name = %db_name, "Instance database provisioned");
        InstanceState::Done
    }

    async fn teardown(&self, instance_id: &str) -> InstanceState {
        let instance = match self.persistence.get_instance(instance_id).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                let e = Error::InstanceNotFound(instance_id.to_string());
                return self
                    .fail("retrieving instance database entry", instance_id, &e)
                    .await;
            }
            Err(e) => {
                return self
                    .fail("retrieving instance database entry", instance_id, &e)
                    .await;
            }
        };

        if let Err(e) = self
            .persistence
            .update_instance_state(instance_id, InstanceState::Teardown)
            .await
        {
            warn!(instance_id = %instance_id, error = %e, "Failed to mark instance as tearing down");
        }

        let database = match Identifier::new(&instance.db_name) {
            Ok(database) => database,
            Err(e) => {
                return self
                    .fail("validating instance database name", instance_id, &e)
                    .await;
            }
        };

        let users = match self.persistence.list_instance_users(instance_id).await {
            Ok(users) => users,
            Err(e) => {
                return self
                    .fail("retrieving instance database credentials", instance_id, &e)
                    .await;
            }
        };

        for user in users {
            let user = match Identifier::new(user) {
                Ok(user) => user,
                Err(e) => {
                    warn!(instance_id = %instance_id, error = %e, "Skipping unusable role name");
                    continue;
                }
            };

            let revoke = Ddl::RevokeAll {
                database: database.clone(),
                user: user.clone(),
            };
            if let Err(e) = self.provisioner.execute(&revoke).await {
                warn!(instance_id = %instance_id, user_name = %user, error = %e, "Teardown step failed");
            }
            if let Err(e) = self.provisioner.execute(&Ddl::DropUser(user.clone())).await {
                warn!(instance_id = %instance_id, user_name = %user, error = %e, "Teardown step failed");
            }
        }

        if let Err(e) = self
            .provisioner
            .execute(&Ddl::DropDatabase(database.clone()))
            .await
        {
            warn!(instance_id = %instance_id, db_name = %database, error = %e, "Teardown step failed");
        }

        match self
            .persistence
            .delete_database_credentials(database.as_str())
            .await
        {
            Ok(removed) => debug!(instance_id = %instance_id, removed, "Removed credential rows"),
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Failed to delete credential rows")
            }
        }

        if let Err(e) = self
            .persistence
            .mark_instance_gone(instance_id, GONE_RETENTION)
            .await
        {
            error!(
                instance_id = %instance_id,
                error = %e,
                "Unable to transition instance from [teardown] -> [gone]"
            );
            return InstanceState::Teardown;
        }

        info!(instance_id = %instance_id, db_name = %database, "Instance database torn down");
        InstanceState::Gone
    }
}
