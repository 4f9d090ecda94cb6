// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tinsmith-core.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::ddl::DdlKind;
use crate::state::InstanceState;

/// Result type using the lifecycle [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE for `duplicate_database`.
pub const DUPLICATE_DATABASE: &str = "42P04";
/// SQLSTATE for `duplicate_object` (e.g. an existing enum type).
pub const DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Lifecycle errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A registry query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A DDL statement against the server failed.
    #[error("Failed to {kind}: {source}")]
    Ddl {
        /// Statement that failed.
        kind: DdlKind,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The credential row could not be removed after the role was dropped.
    #[error("Failed to delete credentials for {user_name}: {source}")]
    CredentialCleanup {
        /// Role whose row is left behind.
        user_name: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Credential generation failed.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// A name failed identifier validation.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A state label is unknown or has no protocol meaning.
    #[error("Invalid state '{0}'")]
    InvalidState(String),

    /// No registry row for the instance.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// The instance id is already registered.
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// No credential row for the binding.
    #[error("Binding not found: {0}")]
    BindingNotFound(String),

    /// The instance is not in a state that accepts the operation.
    #[error("Database for instance '{instance_id}' is still in '{state}' state")]
    NotReady {
        /// Instance id.
        instance_id: String,
        /// Current state.
        state: InstanceState,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable code for protocol responses and log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Ddl { .. } => "DDL_FAILED",
            Self::CredentialCleanup { .. } => "CREDENTIAL_CLEANUP_FAILED",
            Self::Credential(_) => "CREDENTIAL_GENERATION_FAILED",
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::InstanceAlreadyExists(_) => "INSTANCE_ALREADY_EXISTS",
            Self::BindingNotFound(_) => "BINDING_NOT_FOUND",
            Self::NotReady { .. } => "INSTANCE_NOT_READY",
            Self::Other(_) => "INTERNAL",
        }
    }

    /// Whether an unbind may ignore this failure.
    ///
    /// A role that still owns objects cannot be dropped, and its credential
    /// row may then linger; the binding is still unbound for the platform.
    pub fn is_tolerated_on_unbind(&self) -> bool {
        matches!(
            self,
            Self::Ddl {
                kind: DdlKind::DropUser,
                ..
            } | Self::CredentialCleanup { .. }
        )
    }

    /// SQLSTATE of the underlying server error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Database(e) | Self::Ddl { source: e, .. } => sqlstate(e),
            Self::CredentialCleanup { source, .. } => source.sqlstate(),
            _ => None,
        }
    }
}

/// SQLSTATE of a driver error, if the server reported one.
pub fn sqlstate(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}
