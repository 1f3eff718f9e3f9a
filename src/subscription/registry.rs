// ABOUTME: Worker-wide registry owning the single shared subscription connection
// ABOUTME: Creates it lazily, registers every channel once, and caches the latest drained batch
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Subscription registry
//!
//! One registry exists per worker thread and is shared by `Rc` across every
//! connection loop on that worker. It holds:
//!
//! - the one subscription connection, created on first use and dropped after
//!   a poll failure so the next loop rebuilds it;
//! - the notification cache, a single [`NotificationBatch`] replaced
//!   wholesale on every drain.
//!
//! Batches carry a generation number. Loops remember the last generation they
//! delivered, so re-reading an unchanged batch never delivers twice.

use super::{ConnectionFactory, PollStatus, SubscriptionConnection};
use fanout_core::errors::SubscriptionError;
use fanout_core::models::{Channel, Notification};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The shared connection as seen by loops
pub type SharedConnection = Rc<RefCell<Box<dyn SubscriptionConnection>>>;

/// One drained set of notifications, in arrival order
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    generation: u64,
    entries: Rc<[Notification]>,
}

impl NotificationBatch {
    fn empty() -> Self {
        Self {
            generation: 0,
            entries: Rc::from(Vec::new()),
        }
    }

    /// Monotonic drain counter; 0 before the first drain
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Every entry of the batch
    #[must_use]
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// Entries published on `channel`, in drain order
    pub fn matching<'a>(&'a self, channel: &'a Channel) -> impl Iterator<Item = &'a Notification> {
        self.entries.iter().filter(move |n| &n.channel == channel)
    }

    /// Whether two batches share the same drained entries
    #[must_use]
    pub fn same_drain(&self, other: &Self) -> bool {
        self.generation == other.generation && Rc::ptr_eq(&self.entries, &other.entries)
    }
}

/// What a loop observed when it polled
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The connection is mid-read
    Busy,
    /// The connection is idle; this is the current batch (fresh or cached)
    Ready(NotificationBatch),
}

/// Worker-wide owner of the shared subscription connection
pub struct SubscriptionRegistry {
    factory: Arc<dyn ConnectionFactory>,
    channels: Vec<Channel>,
    connection: RefCell<Option<SharedConnection>>,
    batch: RefCell<NotificationBatch>,
    creation_gate: Mutex<()>,
    connections_created: Cell<u64>,
    drains: Cell<u64>,
}

impl SubscriptionRegistry {
    /// Create a registry for a fixed channel set; nothing connects yet
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, channels: Vec<Channel>) -> Self {
        Self {
            factory,
            channels,
            connection: RefCell::new(None),
            batch: RefCell::new(NotificationBatch::empty()),
            creation_gate: Mutex::new(()),
            connections_created: Cell::new(0),
            drains: Cell::new(0),
        }
    }

    /// Channels registered on every new connection
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn current(&self) -> Option<SharedConnection> {
        self.connection.borrow().as_ref().map(Rc::clone)
    }

    /// Return the shared connection, creating and registering it if needed
    ///
    /// Concurrent first callers on the same worker wait on a creation gate, so
    /// at most one connection exists. On failure nothing is stored and the next
    /// caller tries again.
    ///
    /// # Errors
    ///
    /// Returns the factory's connection error or the first registration error
    pub async fn get_or_create_connection(&self) -> Result<SharedConnection, SubscriptionError> {
        if let Some(existing) = self.current() {
            return Ok(existing);
        }

        let _gate = self.creation_gate.lock().await;
        if let Some(existing) = self.current() {
            return Ok(existing);
        }

        let mut connection = self
            .factory
            .connect()
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to open subscription connection"))?;
        connection.enable_autocommit();
        for channel in &self.channels {
            connection
                .register(channel)
                .await
                .inspect_err(|e| warn!(channel = %channel, error = %e, "Failed to register channel"))?;
        }

        let shared: SharedConnection = Rc::new(RefCell::new(connection));
        *self.connection.borrow_mut() = Some(Rc::clone(&shared));
        self.connections_created
            .set(self.connections_created.get() + 1);

        info!(
            channels = self.channels.len(),
            connections_created = self.connections_created.get(),
            "Subscription connection established"
        );
        Ok(shared)
    }

    /// Poll `connection` and, if it is ready with queued notifications, drain them
    ///
    /// The first loop to poll after an edge performs the drain and replaces the
    /// cached batch; later loops get the cached batch back unchanged.
    ///
    /// # Errors
    ///
    /// Returns the poll error after dropping `connection` from the registry
    pub fn poll_notifications(
        &self,
        connection: &SharedConnection,
    ) -> Result<PollOutcome, SubscriptionError> {
        let status = connection.borrow_mut().poll();
        match status {
            Err(e) => {
                self.invalidate(connection);
                Err(e)
            }
            Ok(PollStatus::Busy) => Ok(PollOutcome::Busy),
            Ok(PollStatus::Ready) => {
                let drained = {
                    let mut conn = connection.borrow_mut();
                    conn.has_pending().then(|| conn.drain_pending())
                };
                if let Some(entries) = drained {
                    self.replace_batch(entries);
                }
                Ok(PollOutcome::Ready(self.batch()))
            }
        }
    }

    fn replace_batch(&self, entries: Vec<Notification>) {
        let generation = self.batch.borrow().generation + 1;
        let count = entries.len();
        *self.batch.borrow_mut() = NotificationBatch {
            generation,
            entries: Rc::from(entries),
        };
        self.drains.set(self.drains.get() + 1);
        debug!(batch.generation = generation, batch.size = count, "Drained notifications");
    }

    /// Forget `connection` if it is still the shared one
    pub fn invalidate(&self, connection: &SharedConnection) {
        let mut slot = self.connection.borrow_mut();
        if slot.as_ref().is_some_and(|c| Rc::ptr_eq(c, connection)) {
            *slot = None;
            warn!("Shared subscription connection dropped; next loop will reconnect");
        }
    }

    /// Current cached batch
    #[must_use]
    pub fn batch(&self) -> NotificationBatch {
        self.batch.borrow().clone()
    }

    /// Generation of the current cached batch
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.batch.borrow().generation
    }

    /// Whether a shared connection currently exists
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_some()
    }

    /// Connections successfully created over the registry's lifetime
    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.connections_created.get()
    }

    /// Physical drains performed over the registry's lifetime
    #[must_use]
    pub fn drains(&self) -> u64 {
        self.drains.get()
    }

    /// Drop the shared connection; loops still holding it keep it alive until they end
    pub fn shutdown(&self) {
        if self.connection.borrow_mut().take().is_some() {
            info!("Subscription registry shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::MemoryBroker;

    fn channel(name: &str) -> Channel {
        Channel::new(name).unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_connection_is_created_once_and_registers_all_channels() {
        let broker = Arc::new(MemoryBroker::new());
        let registry = SubscriptionRegistry::new(broker.clone(), vec![channel("alpha"), channel("beta")]);

        let first = registry.get_or_create_connection().await.unwrap();
        let second = registry.get_or_create_connection().await.unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(registry.connections_created(), 1);
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(broker.registrations(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_failed_connect_leaves_registry_empty() {
        let broker = Arc::new(MemoryBroker::new());
        broker.refuse_next_connects(1);
        let registry = SubscriptionRegistry::new(broker.clone(), vec![channel("alpha")]);

        assert!(matches!(
            registry.get_or_create_connection().await,
            Err(SubscriptionError::Connection(_))
        ));
        assert!(!registry.is_connected());

        registry.get_or_create_connection().await.unwrap();
        assert!(registry.is_connected());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_poll_without_new_notifications_reuses_batch() {
        let broker = Arc::new(MemoryBroker::new());
        let alpha = channel("alpha");
        let registry = SubscriptionRegistry::new(broker.clone(), vec![alpha.clone()]);
        let conn = registry.get_or_create_connection().await.unwrap();

        broker.notify(&alpha, "hi");
        let PollOutcome::Ready(first) = registry.poll_notifications(&conn).unwrap() else {
            panic!("expected ready");
        };
        let PollOutcome::Ready(second) = registry.poll_notifications(&conn).unwrap() else {
            panic!("expected ready");
        };

        assert_eq!(first.generation(), 1);
        assert!(first.same_drain(&second));
        assert_eq!(registry.drains(), 1);
        assert_eq!(broker.physical_reads(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_busy_poll_does_not_drain() {
        let broker = Arc::new(MemoryBroker::new());
        let alpha = channel("alpha");
        let registry = SubscriptionRegistry::new(broker.clone(), vec![alpha.clone()]);
        let conn = registry.get_or_create_connection().await.unwrap();

        broker.set_busy(true);
        broker.notify(&alpha, "hi");
        assert!(matches!(registry.poll_notifications(&conn), Ok(PollOutcome::Busy)));
        assert_eq!(registry.generation(), 0);

        broker.set_busy(false);
        let PollOutcome::Ready(batch) = registry.poll_notifications(&conn).unwrap() else {
            panic!("expected ready");
        };
        assert_eq!(batch.entries().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_poll_error_invalidates_only_current_connection() {
        let broker = Arc::new(MemoryBroker::new());
        let registry = SubscriptionRegistry::new(broker.clone(), vec![channel("alpha")]);
        let stale = registry.get_or_create_connection().await.unwrap();

        broker.fail_connections("server closed the connection");
        assert!(registry.poll_notifications(&stale).is_err());
        assert!(!registry.is_connected());

        let fresh = registry.get_or_create_connection().await.unwrap();
        assert!(registry.poll_notifications(&stale).is_err());
        assert!(registry.is_connected());
        assert!(!Rc::ptr_eq(&stale, &fresh));
        assert_eq!(broker.registrations(), 2);
    }
}
