// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle manager.
//!
//! Turns broker requests into registry updates and DDL:
//!
//! ```text
//! (none) --provision--> setup --success--> done
//!                       setup --failure--> failed
//! done   --deprovision--> teardown --success--> gone
//!                         teardown --failure--> failed
//! ```
//!
//! Provision and deprovision are acknowledged immediately and finish on the
//! manager's [`TaskQueue`]; the platform polls [`LifecycleManager::check_on`]
//! for the outcome. Bind and unbind run inline.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::credentials::{self, OsRandom, RandomNameSource};
use crate::ddl::{Ddl, Identifier, Password};
use crate::error::{Error, Result};
use crate::persistence::{CredentialRecord, MAX_PLATFORM_ID_LEN, Persistence};
use crate::provisioner::Provisioner;
use crate::runner::{LifecycleRunner, SqlLifecycleRunner};
use crate::state::{InstanceState, OperationState};
use crate::tasks::TaskQueue;

/// Credentials issued by a successful grant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Generated role name.
    pub user_name: String,
    /// Generated role password.
    pub password: String,
    /// Database the role may use.
    pub db_name: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// Result of accepting a deprovision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeprovisionOutcome {
    /// Teardown has been queued.
    Accepted,
    /// Nothing to tear down.
    AlreadyGone,
}

/// Builder for a [`LifecycleManager`].
#[derive(Default)]
pub struct LifecycleManagerBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    names: Option<Arc<dyn RandomNameSource>>,
    runner: Option<Arc<dyn LifecycleRunner>>,
    operation_timeout: Option<Duration>,
}

impl LifecycleManagerBuilder {
    /// Set the instance/credential registry (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the DDL executor (required).
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the source of generated names.
    ///
    /// Default: [`OsRandom`]
    pub fn names(mut self, names: Arc<dyn RandomNameSource>) -> Self {
        self.names = Some(names);
        self
    }

    /// Set the setup/teardown runner.
    ///
    /// Default: [`SqlLifecycleRunner`] over the registry and provisioner.
    pub fn runner(mut self, runner: Arc<dyn LifecycleRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Abandon setup/teardown after `timeout` and mark the instance `failed`.
    ///
    /// Default: no timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Build the manager.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<LifecycleManager> {
        let persistence = self
            .persistence
            .ok_or_else(|| Error::Other("persistence is required".to_string()))?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| Error::Other("provisioner is required".to_string()))?;
        let names = self.names.unwrap_or_else(|| Arc::new(OsRandom));
        let runner = self.runner.unwrap_or_else(|| {
            Arc::new(SqlLifecycleRunner::new(
                persistence.clone(),
                provisioner.clone(),
            ))
        });

        Ok(LifecycleManager {
            persistence,
            provisioner,
            names,
            runner,
            operation_timeout: self.operation_timeout,
            tasks: TaskQueue::new(),
        })
    }
}

/// Provisions, binds, and tears down instance databases.
pub struct LifecycleManager {
    persistence: Arc<dyn Persistence>,
    provisioner: Arc<dyn Provisioner>,
    names: Arc<dyn RandomNameSource>,
    runner: Arc<dyn LifecycleRunner>,
    operation_timeout: Option<Duration>,
    tasks: TaskQueue,
}

impl LifecycleManager {
    /// Create a manager with default name source, runner and no timeout.
    pub fn new(persistence: Arc<dyn Persistence>, provisioner: Arc<dyn Provisioner>) -> Self {
        let runner = Arc::new(SqlLifecycleRunner::new(
            persistence.clone(),
            provisioner.clone(),
        ));
        Self {
            persistence,
            provisioner,
            names: Arc::new(OsRandom),
            runner,
            operation_timeout: None,
            tasks: TaskQueue::new(),
        }
    }

    /// Create a builder.
    pub fn builder() -> LifecycleManagerBuilder {
        LifecycleManagerBuilder::default()
    }

    /// The registry this manager writes to.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Queue of in-flight setup/teardown tasks.
    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Wait until every queued setup/teardown has finished.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    /// Whether the instance is registered. Registry failures are logged and read as `false`.
    pub async fn exists(&self, instance_id: &str) -> bool {
        match self.persistence.instance_exists(instance_id).await {
            Ok(found) => found,
            Err(e) => {
                error!(instance_id = %instance_id, error = %e, "Failed to look up instance");
                false
            }
        }
    }

    /// Register the instance in `setup` and queue creation of its database.
    ///
    /// A registered id is rejected with [`Error::InstanceAlreadyExists`].
    pub async fn provision(&self, instance_id: &str) -> Result<()> {
        validate_platform_id("instance", instance_id)?;

        let db_name = Identifier::new(credentials::database_name(self.names.as_ref())?)?;

        // The row is visible to polls before the request is acknowledged.
        self.persistence
            .create_instance(instance_id, db_name.as_str())
            .await
            .inspect_err(|e| {
                error!(instance_id = %instance_id, error = %e, "Failed creating `dbs` entry");
            })?;

        info!(
            instance_id = %instance_id,
            db_name = %db_name,
            runner = self.runner.runner_type(),
            "Provisioning instance"
        );

        let runner = self.runner.clone();
        let persistence = self.persistence.clone();
        let timeout = self.operation_timeout;
        let id = instance_id.to_string();
        self.tasks.spawn("provision", instance_id, async move {
            let setup = runner.setup(&id, &db_name);
            let state = bounded("provision", &id, timeout, persistence.as_ref(), setup).await;
            debug!(instance_id = %id, state = %state, "Setup finished");
        });

        Ok(())
    }

    /// Current state of an instance.
    ///
    /// Never fails: a missing or unreadable row is logged and reported as `error`.
    pub async fn check_on(&self, instance_id: &str) -> InstanceState {
        match self.persistence.get_instance(instance_id).await {
            Ok(Some(instance)) => instance.state,
            Ok(None) => {
                error!(instance_id = %instance_id, "No registry entry for instance");
                InstanceState::Error
            }
            Err(e) => {
                error!(instance_id = %instance_id, error = %e, "Failed to read instance state");
                InstanceState::Error
            }
        }
    }

    /// Protocol-level progress of the last asynchronous operation.
    pub async fn last_operation(&self, instance_id: &str) -> Result<OperationState> {
        OperationState::try_from(self.check_on(instance_id).await)
    }

    /// Accept a deprovision request and queue teardown of the instance database.
    ///
    /// An instance still in `setup` is rejected with [`Error::NotReady`]; the
    /// platform retries once setup has finished.
    pub async fn deprovision(&self, instance_id: &str) -> Result<DeprovisionOutcome> {
        validate_platform_id("instance", instance_id)?;

        if !self.exists(instance_id).await {
            info!(instance_id = %instance_id, "Instance unknown, nothing to deprovision");
            return Ok(DeprovisionOutcome::AlreadyGone);
        }
        let Some(instance) = self.persistence.get_instance(instance_id).await? else {
            return Ok(DeprovisionOutcome::AlreadyGone);
        };

        match instance.state {
            InstanceState::Gone => {
                info!(instance_id = %instance_id, "Instance already torn down");
                return Ok(DeprovisionOutcome::AlreadyGone);
            }
            InstanceState::Setup => {
                return Err(Error::NotReady {
                    instance_id: instance_id.to_string(),
                    state: instance.state,
                });
            }
            _ => {}
        }

        info!(instance_id = %instance_id, "Deprovisioning instance");

        let runner = self.runner.clone();
        let persistence = self.persistence.clone();
        let timeout = self.operation_timeout;
        let id = instance_id.to_string();
        self.tasks.spawn("deprovision", instance_id, async move {
            let teardown = runner.teardown(&id);
            let state = bounded("deprovision", &id, timeout, persistence.as_ref(), teardown).await;
            debug!(instance_id = %id, state = %state, "Teardown finished");
        });

        Ok(DeprovisionOutcome::Accepted)
    }

    /// Create a role for `binding_id` with full privileges on the instance database.
    ///
    /// Any failure after the role exists drops it again before returning.
    pub async fn grant(&self, instance_id: &str, binding_id: &str) -> Result<Credentials> {
        validate_platform_id("instance", instance_id)?;
        validate_platform_id("binding", binding_id)?;

        let instance = self
            .persistence
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        if instance.state != InstanceState::Done {
            return Err(Error::NotReady {
                instance_id: instance_id.to_string(),
                state: instance.state,
            });
        }

        let database = Identifier::new(&instance.db_name)?;
        let user = Identifier::new(credentials::user_name(self.names.as_ref())?)?;
        let password = Password::new(credentials::password(self.names.as_ref())?)?;

        self.provisioner
            .execute(&Ddl::CreateUser {
                user: user.clone(),
                password: password.clone(),
            })
            .await?;

        let granted = async {
            self.provisioner
                .execute(&Ddl::GrantAll {
                    database: database.clone(),
                    user: user.clone(),
                })
                .await?;
            self.persistence
                .insert_credential(&CredentialRecord {
                    binding_id: binding_id.to_string(),
                    user_name: user.to_string(),
                    password: password.expose().to_string(),
                    db_name: database.to_string(),
                })
                .await
        }
        .await;

        if let Err(e) = granted {
            warn!(
                instance_id = %instance_id,
                binding_id = %binding_id,
                user_name = %user,
                error = %e,
                "Grant failed, dropping role"
            );
            if let Err(drop_err) = self.provisioner.execute(&Ddl::DropUser(user.clone())).await {
                error!(user_name = %user, error = %drop_err, "Failed to drop role after failed grant");
            }
            return Err(e);
        }

        info!(
            instance_id = %instance_id,
            binding_id = %binding_id,
            user_name = %user,
            db_name = %database,
            "Granted database access"
        );

        Ok(Credentials {
            user_name: user.to_string(),
            password: password.expose().to_string(),
            db_name: database.to_string(),
        })
    }

    /// Revoke and drop the role issued for `binding_id`, then forget it.
    ///
    /// If the role cannot be dropped its credential row is kept, so a later
    /// teardown retries the drop.
    pub async fn revoke(&self, instance_id: &str, binding_id: &str) -> Result<()> {
        validate_platform_id("instance", instance_id)?;
        validate_platform_id("binding", binding_id)?;

        let binding = match self.persistence.get_binding(binding_id).await? {
            Some(binding) if binding.instance_id == instance_id => binding,
            _ => return Err(Error::BindingNotFound(binding_id.to_string())),
        };

        if binding.state != InstanceState::Done {
            return Err(Error::NotReady {
                instance_id: instance_id.to_string(),
                state: binding.state,
            });
        }

        let database = Identifier::new(&binding.db_name)?;
        let user = Identifier::new(&binding.user_name)?;

        self.provisioner
            .execute(&Ddl::RevokeAll {
                database,
                user: user.clone(),
            })
            .await?;
        self.provisioner
            .execute(&Ddl::DropUser(user.clone()))
            .await?;
        self.persistence
            .delete_credential(user.as_str())
            .await
            .map_err(|e| Error::CredentialCleanup {
                user_name: user.to_string(),
                source: Box::new(e),
            })?;

        info!(
            instance_id = %instance_id,
            binding_id = %binding_id,
            user_name = %user,
            "Revoked database access"
        );
        Ok(())
    }

    /// Revoke a binding, tolerating a role that cannot be dropped or a
    /// credential row that cannot be deleted.
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<()> {
        match self.revoke(instance_id, binding_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_tolerated_on_unbind() => {
                warn!(
                    instance_id = %instance_id,
                    binding_id = %binding_id,
                    error = %e,
                    "Unbind cleanup incomplete"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    instance_id = %instance_id,
                    binding_id = %binding_id,
                    error = %e,
                    "Failed to unbind"
                );
                Err(e)
            }
        }
    }
}

/// Reject platform ids the registry cannot store.
fn validate_platform_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidRequest(format!("{kind} id is empty")));
    }
    if id.len() > MAX_PLATFORM_ID_LEN {
        return Err(Error::InvalidRequest(format!(
            "{kind} id exceeds {MAX_PLATFORM_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Run a setup/teardown body, flipping the instance to `failed` if it overruns `timeout`.
async fn bounded<F>(
    operation: &str,
    instance_id: &str,
    timeout: Option<Duration>,
    persistence: &dyn Persistence,
    body: F,
) -> InstanceState
where
    F: Future<Output = InstanceState>,
{
    let Some(limit) = timeout else {
        return body.await;
    };

    match tokio::time::timeout(limit, body).await {
        Ok(state) => state,
        Err(_) => {
            warn!(
                instance_id = %instance_id,
                operation,
                timeout_secs = limit.as_secs(),
                "Operation timed out"
            );
            if let Err(e) = persistence
                .update_instance_state(instance_id, InstanceState::Failed)
                .await
            {
                error!(instance_id = %instance_id, error = %e, "Failed to mark timed-out instance as failed");
            }
            InstanceState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_platform_id() {
        assert!(validate_platform_id("instance", "a").is_ok());
        assert!(validate_platform_id("instance", &"x".repeat(36)).is_ok());
        assert!(matches!(
            validate_platform_id("instance", ""),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_platform_id("binding", &"x".repeat(37)),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            user_name: "u0000000000000001".to_string(),
            password: "secretsecret".to_string(),
            db_name: "db1".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("u0000000000000001"));
        assert!(!debug.contains("secretsecret"));
    }

    #[test]
    fn test_builder_requires_persistence() {
        let result = LifecycleManager::builder()
            .provisioner(Arc::new(crate::provisioner::MockProvisioner::new()))
            .build();
        assert!(matches!(result, Err(Error::Other(_))));
    }
}
