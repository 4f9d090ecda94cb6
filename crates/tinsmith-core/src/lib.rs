// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tinsmith Core - Shared PostgreSQL Instance Lifecycle
//!
//! This crate provisions, binds and tears down per-tenant databases on a
//! shared PostgreSQL server, keeping a durable record of every instance and
//! credential in the broker's control database.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 tinsmith-broker (protocol adapter)             │
//! └───────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    LifecycleManager (this crate)               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐             │
//! │  │ Credentials │  │  TaskQueue  │  │   Runner    │             │
//! │  └─────────────┘  └─────────────┘  └─────────────┘             │
//! └───────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            │ registry rows                     │ DDL
//!            ▼                                   ▼
//! ┌─────────────────────────┐        ┌──────────────────────────┐
//! │  Persistence (dbs/creds)│        │ Provisioner (CREATE/DROP)│
//! └─────────────────────────┘        └──────────────────────────┘
//!            │                                   │
//!            └──────────────┬────────────────────┘
//!                           ▼
//!                      PostgreSQL
//! ```
//!
//! # Instance State Machine
//!
//! ```text
//! (none) ──provision──► setup ──success──► done ──deprovision──► teardown ──► gone
//!                         │                                          │
//!                         └──failure──► failed ◄──────failure───────┘
//! ```
//!
//! `in-use` exists in the persisted enum but is never assigned.
//!
//! # Modules
//!
//! - [`credentials`]: Random database, role and password generation
//! - [`ddl`]: Validated identifiers and the DDL statements the core issues
//! - [`connection`]: Single live database handle
//! - [`schema`]: Idempotent control-database bootstrap
//! - [`persistence`]: Instance and credential registry
//! - [`provisioner`]: DDL execution
//! - [`runner`]: Asynchronous setup and teardown
//! - [`tasks`]: Queue of in-flight lifecycle tasks
//! - [`lifecycle`]: Provision, deprovision, bind, unbind and status checks

#![deny(missing_docs)]

/// Random name and password generation.
pub mod credentials;

/// Validated identifiers and DDL statements.
pub mod ddl;

/// Single live database handle.
pub mod connection;

/// Control-database schema bootstrap.
pub mod schema;

/// Instance and credential registry.
pub mod persistence;

/// DDL execution against the server.
pub mod provisioner;

/// Asynchronous setup and teardown bodies.
pub mod runner;

/// Queue of in-flight lifecycle tasks.
pub mod tasks;

/// Instance lifecycle manager.
pub mod lifecycle;

/// Instance and operation states.
pub mod state;

/// Error types for lifecycle operations.
pub mod error;

pub use error::{Error, Result};
pub use lifecycle::{Credentials, DeprovisionOutcome, LifecycleManager, LifecycleManagerBuilder};
pub use state::{InstanceState, OperationState};
