// ABOUTME: Server binary bridging PostgreSQL notifications to WebSocket clients
// ABOUTME: Loads configuration, starts the worker pool and serves the HTTP routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # pg-fanout server binary
//!
//! Every configured channel is served by [`NotificationRelay`]. With
//! `DATABASE_URL=memory:` the in-process broker acts as both notification
//! source and publisher.

use anyhow::{bail, Result};
use clap::Parser;
use pg_fanout::{
    config::{parse_channels, DatabaseUrl, ServerConfig},
    endpoints::Endpoints,
    handler::ApplicationHandler,
    logging,
    publish::{PgPublisher, Publisher},
    relay::NotificationRelay,
    routes::{FanoutRoutes, RouteState},
    shutdown::shutdown_requested,
    subscription::{ConnectionFactory, MemoryBroker, PgConnectionFactory},
    worker::{WorkerPool, WorkerSettings},
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal, task};
use tracing::{error, info};

/// Connections the publisher pool keeps open
const PUBLISHER_POOL_SIZE: u32 = 4;

#[derive(Parser)]
#[command(name = "pg-fanout-server")]
#[command(about = "Fan PostgreSQL LISTEN/NOTIFY events out to WebSocket clients")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override worker thread count
    #[arg(long)]
    workers: Option<usize>,

    /// Override the comma-separated channel list
    #[arg(long)]
    channels: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(channels) = args.channels.as_deref() {
        config.channels = parse_channels(channels)?;
    }
    config.validate()?;

    logging::init_from_env()?;
    info!("{}", config.summary());

    if config.channels.is_empty() {
        bail!("No channels configured; set FANOUT_CHANNELS or pass --channels");
    }

    let mut endpoints = Endpoints::new();
    for channel in &config.channels {
        endpoints.register(channel.as_str(), || {
            Box::new(NotificationRelay) as Box<dyn ApplicationHandler>
        })?;
    }
    let endpoints = Arc::new(endpoints);

    let (factory, publisher) = backend(&config.database).await?;
    let pool = Arc::new(WorkerPool::spawn(
        WorkerSettings {
            workers: config.workers,
            idle_timeout: config.idle_timeout,
        },
        factory,
        Arc::clone(&endpoints),
    )?);

    let router = FanoutRoutes::routes(RouteState {
        endpoints,
        pool: Arc::clone(&pool),
        publisher,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.http_port)).await?;
    info!(address = %listener.local_addr()?, "Listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_requested(signal::ctrl_c()))
        .await;

    task::spawn_blocking(move || pool.shutdown()).await?;

    if let Err(e) = served {
        error!("Server error: {e}");
        return Err(e.into());
    }
    Ok(())
}

async fn backend(
    database: &DatabaseUrl,
) -> Result<(Arc<dyn ConnectionFactory>, Arc<dyn Publisher>)> {
    match database {
        DatabaseUrl::Memory => {
            info!("Using in-process notification broker");
            let broker = Arc::new(MemoryBroker::new());
            let factory: Arc<dyn ConnectionFactory> = Arc::<MemoryBroker>::clone(&broker);
            let publisher: Arc<dyn Publisher> = broker;
            Ok((factory, publisher))
        }
        DatabaseUrl::PostgreSQL { connection_string } => {
            info!(database = %database, "Using PostgreSQL LISTEN/NOTIFY");
            let publisher = PgPublisher::connect(connection_string, PUBLISHER_POOL_SIZE).await?;
            Ok((
                Arc::new(PgConnectionFactory::new(connection_string.as_str())),
                Arc::new(publisher),
            ))
        }
    }
}

