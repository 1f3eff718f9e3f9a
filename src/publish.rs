// ABOUTME: Notification publishing for PostgreSQL NOTIFY and the in-process broker
// ABOUTME: Applies the single-quote rewrite and payload size limit before sending
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Publishing
//!
//! Payloads have every `'` rewritten to `"` before they are sent. The rewrite
//! is lossy: a subscriber cannot tell an original double quote from a
//! rewritten single quote.

use async_trait::async_trait;
use fanout_core::constants::postgres::MAX_PAYLOAD_BYTES;
use fanout_core::errors::{AppError, AppResult};
use fanout_core::models::Channel;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::borrow::Cow;
use tracing::debug;

/// Publishes named notifications
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send `payload` on `channel`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for oversized payloads, or a backend error
    async fn publish(&self, channel: &Channel, payload: &str) -> AppResult<()>;
}

/// Rewrite embedded single quotes to double quotes
#[must_use]
pub fn escape_payload(payload: &str) -> Cow<'_, str> {
    if payload.contains('\'') {
        Cow::Owned(payload.replace('\'', "\""))
    } else {
        Cow::Borrowed(payload)
    }
}

/// Reject payloads `PostgreSQL` would refuse
///
/// # Errors
///
/// Returns `InvalidInput` when the payload is 8000 bytes or longer
pub fn validate_payload(payload: &str) -> AppResult<()> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(AppError::invalid_input(format!(
            "Notification payload is {} bytes; the limit is {MAX_PAYLOAD_BYTES}",
            payload.len()
        )));
    }
    Ok(())
}

/// `NOTIFY` through a `PostgreSQL` connection pool
#[derive(Debug, Clone)]
pub struct PgPublisher {
    pool: PgPool,
}

impl PgPublisher {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool dedicated to publishing
    ///
    /// # Errors
    ///
    /// Returns a database error if the server is unreachable
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Publisher for PgPublisher {
    async fn publish(&self, channel: &Channel, payload: &str) -> AppResult<()> {
        let payload = escape_payload(payload);
        validate_payload(&payload)?;

        // pg_notify is NOTIFY with bind parameters; the channel keeps its case
        // exactly as LISTEN "<channel>" registered it.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel.as_str())
            .bind(&*payload)
            .execute(&self.pool)
            .await?;

        debug!(channel = %channel, payload.bytes = payload.len(), "Published notification");
        Ok(())
    }
}
