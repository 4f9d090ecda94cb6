// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identifiers and the DDL statements issued against the database server.
//!
//! PostgreSQL cannot bind parameters into `CREATE DATABASE`, `CREATE USER` or
//! `GRANT`, so these statements are composed as text. Only an [`Identifier`]
//! or a [`Password`] can reach that text, and both are validated on
//! construction. Platform-supplied ids never appear here; they are always
//! bound as query parameters.

use std::fmt;

use crate::error::{Error, Result};

/// Maximum identifier length PostgreSQL keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A database or role name that is safe to embed unquoted in DDL.
///
/// Must start with `a-z` and contain only `a-z`, `0-9` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validate `name` as an identifier.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_rest =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A role password that is safe to embed in a single-quoted literal.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Validate `value` as an alphanumeric password.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidRequest(
                "password must be non-empty and alphanumeric".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The password text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// What a [`Ddl`] statement does, without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DdlKind {
    /// `CREATE DATABASE`
    CreateDatabase,
    /// `DROP DATABASE`
    DropDatabase,
    /// `CREATE USER`
    CreateUser,
    /// `GRANT ALL PRIVILEGES ON DATABASE`
    GrantAll,
    /// `REVOKE ALL PRIVILEGES ON DATABASE`
    RevokeAll,
    /// `DROP USER`
    DropUser,
}

impl fmt::Display for DdlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateDatabase => "create database",
            Self::DropDatabase => "drop database",
            Self::CreateUser => "create user",
            Self::GrantAll => "grant privileges",
            Self::RevokeAll => "revoke privileges",
            Self::DropUser => "drop user",
        })
    }
}

/// A DDL statement against the database server.
#[derive(Clone, PartialEq, Eq)]
pub enum Ddl {
    /// Create a tenant database.
    CreateDatabase(Identifier),
    /// Drop a tenant database.
    DropDatabase(Identifier),
    /// Create a login role with no elevated attributes.
    CreateUser {
        /// Role name.
        user: Identifier,
        /// Role password.
        password: Password,
    },
    /// Grant every database privilege to a role.
    GrantAll {
        /// Target database.
        database: Identifier,
        /// Grantee.
        user: Identifier,
    },
    /// Revoke every database privilege from a role.
    RevokeAll {
        /// Target database.
        database: Identifier,
        /// Role losing the privileges.
        user: Identifier,
    },
    /// Drop a role.
    DropUser(Identifier),
}

impl Ddl {
    /// The statement kind.
    pub fn kind(&self) -> DdlKind {
        match self {
            Self::CreateDatabase(_) => DdlKind::CreateDatabase,
            Self::DropDatabase(_) => DdlKind::DropDatabase,
            Self::CreateUser { .. } => DdlKind::CreateUser,
            Self::GrantAll { .. } => DdlKind::GrantAll,
            Self::RevokeAll { .. } => DdlKind::RevokeAll,
            Self::DropUser(_) => DdlKind::DropUser,
        }
    }

    /// The role this statement acts on, if any.
    pub fn user(&self) -> Option<&Identifier> {
        match self {
            Self::CreateUser { user, .. }
            | Self::GrantAll { user, .. }
            | Self::RevokeAll { user, .. }
            | Self::DropUser(user) => Some(user),
            Self::CreateDatabase(_) | Self::DropDatabase(_) => None,
        }
    }

    /// The database this statement acts on, if any.
    pub fn database(&self) -> Option<&Identifier> {
        match self {
            Self::CreateDatabase(database)
            | Self::DropDatabase(database)
            | Self::GrantAll { database, .. }
            | Self::RevokeAll { database, .. } => Some(database),
            Self::CreateUser { .. } | Self::DropUser(_) => None,
        }
    }

    /// Render the SQL text. Contains the password for `CreateUser`; never log it.
    pub fn sql(&self) -> String {
        match self {
            Self::CreateDatabase(db) => format!("CREATE DATABASE {db}"),
            Self::DropDatabase(db) => format!("DROP DATABASE {db}"),
            Self::CreateUser { user, password } => format!(
                "CREATE USER {user} WITH NOCREATEDB NOCREATEROLE NOREPLICATION PASSWORD '{}'",
                password.expose()
            ),
            Self::GrantAll { database, user } => {
                format!("GRANT ALL PRIVILEGES ON DATABASE {database} TO {user}")
            }
            Self::RevokeAll { database, user } => {
                format!("REVOKE ALL PRIVILEGES ON DATABASE {database} FROM {user}")
            }
            Self::DropUser(user) => format!("DROP USER {user}"),
        }
    }
}

impl fmt::Debug for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateUser { user, .. } => write!(f, "CreateUser({user}, ***)"),
            other => f.write_str(&other.sql()),
        }
    }
}
