// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tinsmith Broker - Shared PostgreSQL Service Broker
//!
//! Hands out databases on a shared PostgreSQL server to platform
//! applications. The broker reads its server address and administrative
//! login from platform metadata, bootstraps its control database, and
//! exposes the broker verbs through [`broker::ServiceBroker`].
//!
//! # Serving requests
//!
//! This crate carries no HTTP transport. A front end that speaks the broker
//! API embeds [`ServiceBroker`], routes each request to the matching method,
//! and answers with [`BrokerError::status_code`] on failure. The bundled
//! binary only bootstraps the control database and holds the broker until
//! interrupted; on its own it accepts no requests.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VCAP_SERVICES` | Yes | - | Platform service metadata |
//! | `VCAP_APPLICATION` | No | - | Platform application metadata |
//! | `USE_SERVICE` | No | tag lookup | Metadata service instance name |
//! | `SERVICE_ID` / `PLAN_ID` | No | `postgres-c504319a-...` | Catalog ids |
//! | `SERVICE_NAME` | No | `postgres` | Catalog service name |
//! | `PLAN_NAME` | No | `shared` | Catalog plan name |
//! | `DESCRIPTION` | No | `A shared PostgreSQL database` | Catalog description |
//! | `TAGS` | No | `shared,postgres,postgresql,tinsmith` | Catalog tags |
//! | `TINSMITH_CONTROL_DATABASE` | No | `broker` | Control database name |
//! | `TINSMITH_OPERATION_TIMEOUT_SECS` | No | - | Async operation timeout |
//! | `TINSMITH_ACQUIRE_TIMEOUT_SECS` | No | 30 | Wait for a free server connection |
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 1 | Metadata could not be parsed, or another startup failure |
//! | 2 | No usable service instance in `VCAP_SERVICES` |
//! | 3 | The service instance lacks a required credential |

#![deny(missing_docs)]

/// Broker configuration loaded from environment variables.
pub mod config;

/// Platform metadata parsing.
pub mod vcap;

/// Broker protocol adapter.
pub mod broker;

pub use broker::{BrokerError, ServiceBroker};
pub use config::{CatalogConfig, Config, ConfigError};
