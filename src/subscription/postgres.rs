// ABOUTME: PostgreSQL LISTEN backend for the shared subscription connection
// ABOUTME: A background driver moves notifications off the socket and signals readiness edges
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # `PostgreSQL` subscription
//!
//! Channels are registered with `LISTEN` while the [`PgListener`] is still
//! owned by the connection. The first call to `readiness()` hands the listener
//! to a driver task, which appends every received notification to a pending
//! queue and bumps an edge counter. Loops only ever touch the queue.
//!
//! The listener's automatic reconnect is not used: a lost connection is
//! latched as a failure, surfaced by the next `poll()`, and the registry
//! replaces the whole connection so every channel is registered again.

use super::{ConnectionFactory, PollStatus, ReadinessHandle, SubscriptionConnection};
use async_trait::async_trait;
use fanout_core::errors::SubscriptionError;
use fanout_core::models::{Channel, Notification};
use sqlx::postgres::PgListener;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Connects [`PgSubscription`]s to one database
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    database_url: String,
}

impl PgConnectionFactory {
    /// Create a factory for `database_url`
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait(?Send)]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn SubscriptionConnection>, SubscriptionError> {
        let listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|e| SubscriptionError::Connection(e.to_string()))?;
        debug!("PostgreSQL listener connected");
        Ok(Box::new(PgSubscription::new(listener)))
    }
}

#[derive(Debug, Default)]
struct DriverState {
    pending: VecDeque<Notification>,
    failure: Option<String>,
    receiving: bool,
}

fn lock(state: &Mutex<DriverState>) -> MutexGuard<'_, DriverState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("PostgreSQL driver state mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// One `LISTEN` connection
pub struct PgSubscription {
    listener: Option<PgListener>,
    state: Arc<Mutex<DriverState>>,
    edge_sender: Option<watch::Sender<u64>>,
    edges: watch::Receiver<u64>,
    driver: Option<JoinHandle<()>>,
    autocommit: bool,
}

impl PgSubscription {
    fn new(listener: PgListener) -> Self {
        let (edge_sender, edges) = watch::channel(0);
        Self {
            listener: Some(listener),
            state: Arc::new(Mutex::new(DriverState::default())),
            edge_sender: Some(edge_sender),
            edges,
            driver: None,
            autocommit: false,
        }
    }

    fn start_driver(&mut self) {
        let (Some(listener), Some(edge_sender)) = (self.listener.take(), self.edge_sender.take())
        else {
            return;
        };
        lock(&self.state).receiving = true;
        self.driver = Some(tokio::spawn(drive(
            listener,
            Arc::clone(&self.state),
            edge_sender,
        )));
        debug!("PostgreSQL notification driver started");
    }
}

/// Pull notifications until the connection breaks; dropping `edges` on exit
/// wakes every readiness handle so the failure is observed
async fn drive(mut listener: PgListener, state: Arc<Mutex<DriverState>>, edges: watch::Sender<u64>) {
    loop {
        match listener.try_recv().await {
            Ok(Some(received)) => {
                record_notification(&state, &edges, received.channel(), received.payload());
            }
            Ok(None) => {
                error!("PostgreSQL listener connection lost");
                record_failure(&state, "listener connection lost");
                return;
            }
            Err(e) => {
                error!(error = %e, "PostgreSQL listener receive failed");
                record_failure(&state, e.to_string());
                return;
            }
        }
    }
}

/// Queue one received notification and signal an edge
fn record_notification(
    state: &Mutex<DriverState>,
    edges: &watch::Sender<u64>,
    channel: &str,
    payload: &str,
) {
    match Channel::new(channel) {
        Ok(channel) => lock(state)
            .pending
            .push_back(Notification::new(channel, payload)),
        Err(e) => warn!(channel, error = %e, "Ignoring notification on invalid channel"),
    }
    edges.send_modify(|edge| *edge = edge.wrapping_add(1));
}

/// Latch a lost connection; only the first reason is kept
fn record_failure(state: &Mutex<DriverState>, reason: impl Into<String>) {
    let mut state = lock(state);
    if state.failure.is_none() {
        state.failure = Some(reason.into());
    }
}

/// Poll decision: a latched failure wins, then `Busy` until the driver runs
fn poll_status(state: &DriverState) -> Result<PollStatus, SubscriptionError> {
    if let Some(reason) = &state.failure {
        return Err(SubscriptionError::Poll(reason.clone()));
    }
    Ok(if state.receiving {
        PollStatus::Ready
    } else {
        PollStatus::Busy
    })
}

/// A handle that only wakes for edges signalled after it was created
fn fresh_readiness(edges: &watch::Receiver<u64>) -> ReadinessHandle {
    let mut edges = edges.clone();
    edges.mark_unchanged();
    ReadinessHandle::new(edges)
}

#[async_trait(?Send)]
impl SubscriptionConnection for PgSubscription {
    fn enable_autocommit(&mut self) {
        // The listener connection never opens a transaction, so LISTEN is
        // already effective on return.
        self.autocommit = true;
    }

    async fn register(&mut self, channel: &Channel) -> Result<(), SubscriptionError> {
        let listener = self
            .listener
            .as_mut()
            .ok_or_else(|| SubscriptionError::Register {
                channel: channel.to_string(),
                reason: "listener already handed to the notification driver".into(),
            })?;
        listener
            .listen(channel.as_str())
            .await
            .map_err(|e| SubscriptionError::Register {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        debug!(channel = %channel, autocommit = self.autocommit, "LISTEN registered");
        Ok(())
    }

    fn poll(&mut self) -> Result<PollStatus, SubscriptionError> {
        poll_status(&lock(&self.state))
    }

    fn has_pending(&self) -> bool {
        !lock(&self.state).pending.is_empty()
    }

    fn drain_pending(&mut self) -> Vec<Notification> {
        lock(&self.state).pending.drain(..).collect()
    }

    fn readiness(&mut self) -> ReadinessHandle {
        self.start_driver();
        fresh_readiness(&self.edges)
    }
}

impl Drop for PgSubscription {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn channel(name: &str) -> Channel {
        Channel::new(name).unwrap()
    }

    #[test]
    fn test_poll_is_busy_until_driver_runs() {
        let mut state = DriverState::default();
        assert_eq!(poll_status(&state).unwrap(), PollStatus::Busy);

        state.receiving = true;
        assert_eq!(poll_status(&state).unwrap(), PollStatus::Ready);
    }

    #[test]
    fn test_failure_is_latched_for_every_poll() {
        let state = Mutex::new(DriverState {
            receiving: true,
            ..DriverState::default()
        });
        record_failure(&state, "listener connection lost");
        record_failure(&state, "later reason");

        for _ in 0..2 {
            let err = poll_status(&lock(&state)).unwrap_err();
            assert!(
                matches!(&err, SubscriptionError::Poll(reason) if reason == "listener connection lost")
            );
        }
    }

    #[test]
    fn test_notifications_queue_in_order_and_keep_case() {
        let state = Mutex::new(DriverState::default());
        let (sender, edges) = watch::channel(0);

        record_notification(&state, &sender, "OrderUpdates", "first");
        record_notification(&state, &sender, "not valid!", "dropped");
        record_notification(&state, &sender, "OrderUpdates", "second");

        assert_eq!(*edges.borrow(), 3);
        let drained: Vec<Notification> = lock(&state).pending.drain(..).collect();
        assert_eq!(
            drained,
            vec![
                Notification::new(channel("OrderUpdates"), "first"),
                Notification::new(channel("OrderUpdates"), "second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_new_handles_ignore_earlier_edges() {
        let state = Mutex::new(DriverState::default());
        let (sender, edges) = watch::channel(0);
        record_notification(&state, &sender, "alpha", "before");

        let mut handle = fresh_readiness(&edges);
        assert!(timeout(Duration::from_millis(20), handle.ready())
            .await
            .is_err());

        record_notification(&state, &sender, "alpha", "after");
        timeout(Duration::from_secs(1), handle.ready()).await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_exit_wakes_every_handle() {
        let (sender, edges) = watch::channel(0);
        let mut first = fresh_readiness(&edges);
        let mut second = fresh_readiness(&edges);

        drop(sender);

        timeout(Duration::from_secs(1), first.ready()).await.unwrap();
        timeout(Duration::from_secs(1), second.ready()).await.unwrap();
    }
}
