// ABOUTME: Notification subscription abstraction shared by every connection loop in a worker
// ABOUTME: Defines the connection factory, subscription connection and readiness handle contracts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Notification subscriptions
//!
//! A worker owns one [`SubscriptionConnection`], created lazily by a
//! [`ConnectionFactory`] and kept by the [`registry::SubscriptionRegistry`].
//! Loops never read the connection's socket themselves; each loop holds a
//! private [`ReadinessHandle`] that wakes it whenever new notifications may be
//! queued, and then asks the registry to poll.

/// In-process broker used for development and tests
pub mod memory;
/// `PostgreSQL` `LISTEN`/`NOTIFY` backend
pub mod postgres;
/// Worker-wide shared connection and batch cache
pub mod registry;

pub use memory::MemoryBroker;
pub use postgres::PgConnectionFactory;
pub use registry::{NotificationBatch, PollOutcome, SharedConnection, SubscriptionRegistry};

use async_trait::async_trait;
use fanout_core::errors::{ReleaseError, SubscriptionError};
use fanout_core::models::{Channel, Notification};
use std::future;
use tokio::sync::watch;

/// Result of a non-blocking poll on the subscription connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The connection has finished its last read; queued notifications may be drained
    Ready,
    /// The connection is mid-read; try again on the next readiness edge
    Busy,
}

/// Creates connected subscription handles
///
/// Factories are shared by every worker thread; the returned connection only
/// ever lives on the worker that asked for it.
#[async_trait(?Send)]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Connection` if the backend is unreachable
    async fn connect(&self) -> Result<Box<dyn SubscriptionConnection>, SubscriptionError>;
}

/// One connected notification source
#[async_trait(?Send)]
pub trait SubscriptionConnection {
    /// Put the connection in auto-commit mode so `LISTEN` takes effect immediately
    fn enable_autocommit(&mut self);

    /// Subscribe to a channel
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Register` if the backend refuses the channel
    async fn register(&mut self, channel: &Channel) -> Result<(), SubscriptionError>;

    /// Non-blocking poll
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Poll` once the connection is broken
    fn poll(&mut self) -> Result<PollStatus, SubscriptionError>;

    /// Whether notifications are queued and not yet drained
    fn has_pending(&self) -> bool;

    /// Take every queued notification, oldest first
    fn drain_pending(&mut self) -> Vec<Notification>;

    /// A private wake handle for one loop
    fn readiness(&mut self) -> ReadinessHandle;
}

/// Private wake handle on the shared connection
///
/// Each handle observes the connection's edge counter independently, so every
/// loop wakes once per edge regardless of which loop ends up draining.
#[derive(Debug)]
pub struct ReadinessHandle {
    edges: Option<watch::Receiver<u64>>,
}

impl ReadinessHandle {
    /// Wrap a receiver of the connection's edge counter
    #[must_use]
    pub const fn new(edges: watch::Receiver<u64>) -> Self {
        Self {
            edges: Some(edges),
        }
    }

    /// Wait for the next edge
    ///
    /// A closed sender counts as ready: the next poll will report the failure.
    /// A released handle never becomes ready again.
    pub async fn ready(&mut self) {
        match self.edges.as_mut() {
            Some(edges) => {
                if edges.changed().await.is_err() {
                    tracing::trace!("Readiness sender closed; reporting ready");
                }
            }
            None => future::pending::<()>().await,
        }
    }

    /// Whether [`release`](Self::release) has already run
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.edges.is_none()
    }

    /// Drop the underlying receiver
    ///
    /// # Errors
    ///
    /// Returns a `ReleaseError` if the handle was already released
    pub fn release(&mut self) -> Result<(), ReleaseError> {
        self.edges
            .take()
            .map(drop)
            .ok_or_else(|| ReleaseError::new("subscription readiness handle", "already released"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_readiness_release_succeeds_once() {
        let (_sender, edges) = watch::channel(0);
        let mut handle = ReadinessHandle::new(edges);

        assert!(handle.release().is_ok());
        assert!(handle.is_released());

        let err = handle.release().unwrap_err();
        assert_eq!(err.resource, "subscription readiness handle");
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn test_closed_sender_reports_ready() {
        let (sender, edges) = watch::channel(0);
        let mut handle = ReadinessHandle::new(edges);
        drop(sender);

        timeout(Duration::from_secs(1), handle.ready()).await.unwrap();
    }
}
