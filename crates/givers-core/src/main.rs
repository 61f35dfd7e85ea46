// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Givers Core - schema bootstrap and health report
//!
//! Connects to the configured database, applies pending migrations and logs
//! the current platform-health report.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use givers_core::config::{Backend, Config};
use givers_core::migrations;
use givers_core::{
    Clock, PlatformHealthReader, PlatformHealthStore, PostgresStore, SqliteStore, SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("givers_core=info".parse()?),
        )
        .init();

    info!("Starting Givers Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        backend = ?config.backend(),
        max_connections = config.max_connections,
        platform_offset = %config.platform_offset,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.platform_offset));

    // Ctrl-C aborts in-flight queries
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown.cancel();
        }
    });

    info!("Connecting to database...");
    let store: Arc<dyn PlatformHealthStore> = match config.backend() {
        Backend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            info!("Running database migrations...");
            migrations::run_postgres(&pool).await?;
            Arc::new(
                PostgresStore::new(pool, clock)
                    .with_anonymous_name(config.anonymous_display_name.clone()),
            )
        }
        Backend::Sqlite => {
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            info!("Running database migrations...");
            migrations::run_sqlite(&pool).await?;
            Arc::new(
                SqliteStore::new(pool, clock)
                    .with_anonymous_name(config.anonymous_display_name.clone()),
            )
        }
    };
    info!("Migrations completed");

    let report = PlatformHealthReader::new(store).get(&cancel).await?;
    let json = serde_json::to_string(&report)?;
    info!(
        monthly_cost = report.health.monthly_cost,
        current_monthly = report.health.current_monthly,
        rate = report.rate,
        signal = %report.signal,
        report = %json,
        "Platform health"
    );

    info!("Givers Core initialized successfully");
    Ok(())
}
