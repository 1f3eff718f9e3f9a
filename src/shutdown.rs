// ABOUTME: Shutdown trigger handed to the HTTP server's graceful shutdown
// ABOUTME: A signal listener that fails to install never resolves instead of stopping the server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::future::{self, Future};
use std::io;
use tracing::{error, info};

/// Resolve once `signal` fires
///
/// If installing the listener fails the error is logged and the returned
/// future stays pending, so the server keeps running until killed.
pub async fn shutdown_requested<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Failed to listen for shutdown signal; graceful shutdown disabled");
        future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
