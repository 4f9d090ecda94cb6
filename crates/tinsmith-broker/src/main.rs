// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tinsmith Broker - Shared PostgreSQL Service Broker
//!
//! Reads platform metadata, bootstraps the control database, and keeps the
//! broker running until interrupted.
//!
//! No listener is started here: broker requests reach [`ServiceBroker`]
//! only through an embedding front end (see the library docs).

use std::sync::Arc;

use tracing::{error, info, warn};

use tinsmith_broker::ServiceBroker;
use tinsmith_broker::config::Config;
use tinsmith_broker::vcap::{Application, DatabaseCredentials, MetadataError, Services};
use tinsmith_core::LifecycleManager;
use tinsmith_core::connection::ConnectionManager;
use tinsmith_core::persistence::PostgresPersistence;
use tinsmith_core::provisioner::PostgresProvisioner;
use tinsmith_core::schema;

/// Log a metadata error and exit with its code.
fn exit_with(err: MetadataError) -> ! {
    error!(exit_code = err.exit_code(), "{}", err);
    std::process::exit(err.exit_code());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tinsmith_broker=info,tinsmith_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    if let Some(raw) = &config.vcap_application {
        let app = Application::parse(raw).unwrap_or_else(|e| exit_with(e));
        info!(
            name = %app.name,
            version = %app.version,
            uri = app.uris.first().map(String::as_str).unwrap_or("-"),
            "Running as platform application"
        );
    }

    let services = Services::parse(&config.vcap_services).unwrap_or_else(|e| exit_with(e));
    let instance = services
        .select(config.use_service.as_deref())
        .unwrap_or_else(|e| exit_with(e));
    let credentials = DatabaseCredentials::from_instance(instance).unwrap_or_else(|e| exit_with(e));

    info!(
        service = %instance.name,
        host = %credentials.host,
        port = credentials.port,
        control_database = %config.control_database,
        "Starting Tinsmith Broker"
    );

    let mut connections = ConnectionManager::new(credentials.connection_settings());
    if let Some(timeout) = config.acquire_timeout {
        connections = connections.with_acquire_timeout(timeout);
    }
    let pool = schema::bootstrap(
        &mut connections,
        &credentials.database,
        &config.control_database,
    )
    .await?;

    let mut lifecycle = LifecycleManager::builder()
        .persistence(Arc::new(PostgresPersistence::new(pool.clone())))
        .provisioner(Arc::new(PostgresProvisioner::new(pool)));
    if let Some(timeout) = config.operation_timeout {
        lifecycle = lifecycle.operation_timeout(timeout);
    }

    let broker = ServiceBroker::new(
        config.catalog.clone(),
        credentials.host.clone(),
        credentials.port,
        lifecycle.build()?,
    );

    info!(
        service_id = %config.catalog.service_id,
        plan_id = %config.catalog.plan_id,
        database = connections.database().unwrap_or("-"),
        healthy = broker.health_check().await,
        "Broker ready (no HTTP front end attached)"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    broker.shutdown().await;
    connections.close().await;

    info!("Tinsmith Broker shut down");

    Ok(())
}
