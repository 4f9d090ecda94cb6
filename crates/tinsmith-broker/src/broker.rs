// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service broker protocol adapter.
//!
//! Maps the broker verbs onto the [`LifecycleManager`] and shapes results and
//! errors in protocol terms. The types here serialize to the broker API's
//! JSON bodies; serving them over HTTP is left to the embedding front end.
//!
//! | Verb | Result |
//! |------|--------|
//! | catalog | [`Service`] list with one plan |
//! | provision | [`ProvisionedServiceSpec`], always asynchronous |
//! | deprovision | [`IsAsync`], always asynchronous |
//! | last operation | [`LastOperation`] |
//! | bind | [`Binding`] with connection credentials |
//! | unbind | nothing |
//! | update | [`BrokerError::NotImplemented`] |

use std::fmt;

use serde::{Deserialize, Serialize};
use tinsmith_core::{
    DeprovisionOutcome, Error as CoreError, LifecycleManager, OperationState,
};
use tracing::{error, info};

use crate::config::CatalogConfig;

/// A catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service id
    pub id: String,
    /// Service name
    pub name: String,
    /// Description
    pub description: String,
    /// Whether instances accept bindings
    pub bindable: bool,
    /// Tags
    pub tags: Vec<String>,
    /// Plans
    pub plans: Vec<ServicePlan>,
}

/// A catalog plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Plan id
    pub id: String,
    /// Plan name
    pub name: String,
    /// Description
    pub description: String,
}

/// Provision request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionDetails {
    /// Requested service id
    pub service_id: String,
    /// Requested plan id
    pub plan_id: String,
    /// Requesting organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_guid: Option<String>,
    /// Requesting space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_guid: Option<String>,
}

/// Provision response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProvisionedServiceSpec {
    /// Whether provisioning completes asynchronously
    pub is_async: bool,
}

/// Whether a deprovision completes asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsAsync(pub bool);

/// Progress reported to a polling platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    /// Still running
    #[serde(rename = "in progress")]
    InProgress,
    /// Finished successfully
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Finished with an error
    #[serde(rename = "failed")]
    Failed,
}

impl From<OperationState> for LastOperationState {
    fn from(state: OperationState) -> Self {
        match state {
            OperationState::InProgress => Self::InProgress,
            OperationState::Succeeded => Self::Succeeded,
            OperationState::Failed => Self::Failed,
        }
    }
}

/// Last-operation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    /// Operation state
    pub state: LastOperationState,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Connection details handed to a bound application.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingCredentials {
    /// Role name
    pub username: String,
    /// Role password
    pub password: String,
    /// Database name
    pub database: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// `postgres://` connection string
    pub dsn: String,
}

impl fmt::Debug for BindingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dsn", &"***")
            .finish()
    }
}

/// Bind response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Credentials for the bound application
    pub credentials: BindingCredentials,
}

/// Errors in broker protocol terms.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The request names a service or plan this broker does not offer.
    #[error("invalid plan {service_id}/{plan_id}")]
    InvalidPlan {
        /// Requested service id
        service_id: String,
        /// Requested plan id
        plan_id: String,
    },

    /// The instance id is already provisioned.
    #[error("instance {0} already exists")]
    InstanceAlreadyExists(String),

    /// The instance id is unknown.
    #[error("instance {0} does not exist")]
    InstanceDoesNotExist(String),

    /// The binding id is unknown.
    #[error("binding {0} does not exist")]
    BindingDoesNotExist(String),

    /// The verb is not supported.
    #[error("{0} operation not implemented")]
    NotImplemented(&'static str),

    /// Any other lifecycle failure.
    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for BrokerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InstanceAlreadyExists(id) => Self::InstanceAlreadyExists(id),
            CoreError::InstanceNotFound(id) => Self::InstanceDoesNotExist(id),
            CoreError::BindingNotFound(id) => Self::BindingDoesNotExist(id),
            other => Self::Core(other),
        }
    }
}

impl BrokerError {
    /// Stable code for responses and log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPlan { .. } => "INVALID_PLAN",
            Self::InstanceAlreadyExists(_) => "INSTANCE_ALREADY_EXISTS",
            Self::InstanceDoesNotExist(_) => "INSTANCE_DOES_NOT_EXIST",
            Self::BindingDoesNotExist(_) => "BINDING_DOES_NOT_EXIST",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::Core(e) => e.error_code(),
        }
    }

    /// HTTP status a front end should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidPlan { .. } => 400,
            Self::InstanceAlreadyExists(_) => 409,
            Self::InstanceDoesNotExist(_) | Self::BindingDoesNotExist(_) => 410,
            Self::NotImplemented(_) => 501,
            Self::Core(CoreError::InvalidRequest(_)) => 400,
            Self::Core(CoreError::NotReady { .. }) => 422,
            Self::Core(_) => 500,
        }
    }
}

/// Broker protocol adapter over a [`LifecycleManager`].
pub struct ServiceBroker {
    catalog: CatalogConfig,
    host: String,
    port: u16,
    lifecycle: LifecycleManager,
}

impl ServiceBroker {
    /// Create a broker advertising `catalog` and handing out databases on `host:port`.
    pub fn new(
        catalog: CatalogConfig,
        host: impl Into<String>,
        port: u16,
        lifecycle: LifecycleManager,
    ) -> Self {
        Self {
            catalog,
            host: host.into(),
            port,
            lifecycle,
        }
    }

    /// The single-service catalog.
    pub fn services(&self) -> Vec<Service> {
        vec![Service {
            id: self.catalog.service_id.clone(),
            name: self.catalog.service_name.clone(),
            description: self.catalog.description.clone(),
            bindable: true,
            tags: self.catalog.tags.clone(),
            plans: vec![ServicePlan {
                id: self.catalog.plan_id.clone(),
                name: self.catalog.plan_name.clone(),
                description: self.catalog.description.clone(),
            }],
        }]
    }

    /// Accept a provision request. Setup continues in the background.
    pub async fn provision(
        &self,
        instance_id: &str,
        details: &ProvisionDetails,
    ) -> Result<ProvisionedServiceSpec, BrokerError> {
        info!(
            instance_id = %instance_id,
            service_id = %details.service_id,
            plan_id = %details.plan_id,
            "Provision requested"
        );

        if details.service_id != self.catalog.service_id || details.plan_id != self.catalog.plan_id
        {
            error!(
                service_id = %details.service_id,
                plan_id = %details.plan_id,
                "Invalid plan (only {}/{} is offered)",
                self.catalog.service_id,
                self.catalog.plan_id
            );
            return Err(BrokerError::InvalidPlan {
                service_id: details.service_id.clone(),
                plan_id: details.plan_id.clone(),
            });
        }

        self.lifecycle.provision(instance_id).await?;
        Ok(ProvisionedServiceSpec { is_async: true })
    }

    /// Accept a deprovision request. Teardown continues in the background.
    pub async fn deprovision(&self, instance_id: &str) -> Result<IsAsync, BrokerError> {
        info!(instance_id = %instance_id, "Deprovision requested");

        match self.lifecycle.deprovision(instance_id).await? {
            DeprovisionOutcome::Accepted => Ok(IsAsync(true)),
            DeprovisionOutcome::AlreadyGone => {
                Err(BrokerError::InstanceDoesNotExist(instance_id.to_string()))
            }
        }
    }

    /// Progress of the last provision or deprovision.
    pub async fn last_operation(&self, instance_id: &str) -> Result<LastOperation, BrokerError> {
        let state = self.lifecycle.last_operation(instance_id).await?;
        info!(instance_id = %instance_id, state = %state, "Last operation polled");
        Ok(LastOperation {
            state: state.into(),
            description: None,
        })
    }

    /// Issue credentials for a new binding.
    pub async fn bind(&self, instance_id: &str, binding_id: &str) -> Result<Binding, BrokerError> {
        info!(instance_id = %instance_id, binding_id = %binding_id, "Bind requested");

        let creds = self
            .lifecycle
            .grant(instance_id, binding_id)
            .await
            .inspect_err(|e| {
                error!(instance_id = %instance_id, error = %e, "Failed to bind");
            })?;

        let dsn = format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            creds.user_name, creds.password, self.host, self.port, creds.db_name
        );

        info!(
            instance_id = %instance_id,
            binding_id = %binding_id,
            user_name = %creds.user_name,
            host = %self.host,
            port = self.port,
            db_name = %creds.db_name,
            "Bound"
        );

        Ok(Binding {
            credentials: BindingCredentials {
                username: creds.user_name,
                password: creds.password,
                database: creds.db_name,
                host: self.host.clone(),
                port: self.port,
                dsn,
            },
        })
    }

    /// Remove a binding's credentials.
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<(), BrokerError> {
        info!(instance_id = %instance_id, binding_id = %binding_id, "Unbind requested");
        self.lifecycle.unbind(instance_id, binding_id).await?;
        info!(instance_id = %instance_id, binding_id = %binding_id, "Unbound");
        Ok(())
    }

    /// Plan updates are not supported.
    pub async fn update(&self, instance_id: &str) -> Result<IsAsync, BrokerError> {
        error!(instance_id = %instance_id, "Update operation not implemented");
        Err(BrokerError::NotImplemented("update"))
    }

    /// Whether the registry is reachable.
    pub async fn health_check(&self) -> bool {
        match self.lifecycle.persistence().health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                error!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Wait for in-flight provision and deprovision work to finish.
    pub async fn shutdown(&self) {
        let in_flight = self.lifecycle.tasks().in_flight();
        info!(in_flight, "Waiting for lifecycle tasks");
        self.lifecycle.wait_idle().await;
    }
}
