// ABOUTME: In-process notification broker implementing both the subscription and publish sides
// ABOUTME: Used when DATABASE_URL=memory: and by tests to script failures and busy polls
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # In-memory broker
//!
//! Behaves like a `PostgreSQL` server for `LISTEN`/`NOTIFY` purposes: every
//! connection receives the notifications published on channels it registered,
//! each connection has its own pending queue and edge counter, and a failed
//! connection reports its error from the next poll. Test hooks let callers
//! refuse connects, hold polls busy and break every live connection.

use super::{ConnectionFactory, PollStatus, ReadinessHandle, SubscriptionConnection};
use crate::publish::{escape_payload, validate_payload, Publisher};
use async_trait::async_trait;
use fanout_core::errors::{AppResult, SubscriptionError};
use fanout_core::models::{Channel, Notification};
use std::collections::{BTreeSet, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Memory broker mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[derive(Debug, Default)]
struct SlotState {
    channels: BTreeSet<Channel>,
    pending: VecDeque<Notification>,
    failure: Option<String>,
    autocommit: bool,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    edges: watch::Sender<u64>,
}

impl Slot {
    fn new() -> Self {
        let (edges, _) = watch::channel(0);
        Self {
            state: Mutex::new(SlotState::default()),
            edges,
        }
    }

    fn bump(&self) {
        self.edges.send_modify(|edge| *edge = edge.wrapping_add(1));
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    live: Vec<Arc<Slot>>,
    refuse_connects: usize,
    busy: bool,
    connections_opened: usize,
    registrations: usize,
    physical_reads: usize,
}

/// In-process `LISTEN`/`NOTIFY` broker
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every live connection listening on `channel`
    ///
    /// The payload is stored exactly as given; [`Publisher::publish`] applies
    /// the quote rewrite first.
    pub fn notify(&self, channel: &Channel, payload: &str) {
        let live = lock(&self.state).live.clone();
        let mut delivered = 0_usize;
        for slot in live {
            let listening = {
                let mut state = lock(&slot.state);
                let listening = state.failure.is_none() && state.channels.contains(channel);
                if listening {
                    state
                        .pending
                        .push_back(Notification::new(channel.clone(), payload));
                }
                listening
            };
            if listening {
                slot.bump();
                delivered += 1;
            }
        }
        debug!(channel = %channel, connections = delivered, "Memory broker notification");
    }

    /// Break every live connection; each reports `reason` on its next poll
    pub fn fail_connections(&self, reason: &str) {
        let live = mem::take(&mut lock(&self.state).live);
        for slot in &live {
            lock(&slot.state).failure = Some(reason.to_owned());
            slot.bump();
        }
        warn!(connections = live.len(), reason, "Memory broker failed live connections");
    }

    /// Make the next `count` connect attempts fail
    pub fn refuse_next_connects(&self, count: usize) {
        lock(&self.state).refuse_connects = count;
    }

    /// While set, polls report `Busy` and nothing is drained
    pub fn set_busy(&self, busy: bool) {
        lock(&self.state).busy = busy;
    }

    /// Connections successfully opened so far
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        lock(&self.state).connections_opened
    }

    /// Connections currently alive
    #[must_use]
    pub fn live_connections(&self) -> usize {
        lock(&self.state).live.len()
    }

    /// Channel registrations performed so far, across all connections
    #[must_use]
    pub fn registrations(&self) -> usize {
        lock(&self.state).registrations
    }

    /// Channels registered on live connections
    #[must_use]
    pub fn registered_channels(&self) -> BTreeSet<Channel> {
        let live = lock(&self.state).live.clone();
        live.iter()
            .flat_map(|slot| lock(&slot.state).channels.clone())
            .collect()
    }

    /// Readiness handles currently held on live connections
    #[must_use]
    pub fn readiness_handles(&self) -> usize {
        let live = lock(&self.state).live.clone();
        live.iter().map(|slot| slot.edges.receiver_count()).sum()
    }

    /// Non-empty drains performed so far, across all connections
    #[must_use]
    pub fn physical_reads(&self) -> usize {
        lock(&self.state).physical_reads
    }
}

#[async_trait(?Send)]
impl ConnectionFactory for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn SubscriptionConnection>, SubscriptionError> {
        let mut state = lock(&self.state);
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(SubscriptionError::Connection(
                "memory broker refused connection".into(),
            ));
        }
        let slot = Arc::new(Slot::new());
        state.live.push(Arc::clone(&slot));
        state.connections_opened += 1;
        drop(state);

        Ok(Box::new(MemoryConnection {
            broker: Arc::clone(&self.state),
            slot,
        }))
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, channel: &Channel, payload: &str) -> AppResult<()> {
        let payload = escape_payload(payload);
        validate_payload(&payload)?;
        self.notify(channel, &payload);
        Ok(())
    }
}

/// One connection to a [`MemoryBroker`]
struct MemoryConnection {
    broker: Arc<Mutex<BrokerState>>,
    slot: Arc<Slot>,
}

#[async_trait(?Send)]
impl SubscriptionConnection for MemoryConnection {
    fn enable_autocommit(&mut self) {
        lock(&self.slot.state).autocommit = true;
    }

    async fn register(&mut self, channel: &Channel) -> Result<(), SubscriptionError> {
        let mut state = lock(&self.slot.state);
        if !state.autocommit {
            return Err(SubscriptionError::Register {
                channel: channel.to_string(),
                reason: "LISTEN outside auto-commit would wait for a COMMIT".into(),
            });
        }
        state.channels.insert(channel.clone());
        drop(state);
        lock(&self.broker).registrations += 1;
        Ok(())
    }

    fn poll(&mut self) -> Result<PollStatus, SubscriptionError> {
        let failure = lock(&self.slot.state).failure.clone();
        if let Some(reason) = failure {
            return Err(SubscriptionError::Poll(reason));
        }
        if lock(&self.broker).busy {
            return Ok(PollStatus::Busy);
        }
        Ok(PollStatus::Ready)
    }

    fn has_pending(&self) -> bool {
        !lock(&self.slot.state).pending.is_empty()
    }

    fn drain_pending(&mut self) -> Vec<Notification> {
        let drained: Vec<Notification> = lock(&self.slot.state).pending.drain(..).collect();
        if !drained.is_empty() {
            lock(&self.broker).physical_reads += 1;
        }
        drained
    }

    fn readiness(&mut self) -> ReadinessHandle {
        ReadinessHandle::new(self.slot.edges.subscribe())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        lock(&self.broker)
            .live
            .retain(|slot| !Arc::ptr_eq(slot, &self.slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn test_notifications_reach_only_listening_connections() {
        let broker = MemoryBroker::new();
        let alpha = Channel::new("alpha").unwrap();
        let beta = Channel::new("beta").unwrap();

        let mut on_alpha = broker.connect().await.unwrap();
        on_alpha.enable_autocommit();
        on_alpha.register(&alpha).await.unwrap();
        let mut on_beta = broker.connect().await.unwrap();
        on_beta.enable_autocommit();
        on_beta.register(&beta).await.unwrap();

        broker.notify(&alpha, "hi");

        assert_eq!(on_alpha.drain_pending(), vec![Notification::new(alpha, "hi")]);
        assert!(!on_beta.has_pending());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_register_requires_autocommit() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();
        let err = conn.register(&Channel::new("alpha").unwrap()).await;
        assert!(matches!(err, Err(SubscriptionError::Register { .. })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_publish_rewrites_single_quotes() {
        let broker = MemoryBroker::new();
        let alpha = Channel::new("alpha").unwrap();
        let mut conn = broker.connect().await.unwrap();
        conn.enable_autocommit();
        conn.register(&alpha).await.unwrap();

        broker.publish(&alpha, "it's").await.unwrap();

        assert_eq!(conn.drain_pending()[0].payload, "it\"s");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dropped_connection_leaves_broker() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        assert_eq!(broker.live_connections(), 1);
        drop(conn);
        assert_eq!(broker.live_connections(), 0);
        assert_eq!(broker.connections_opened(), 1);
    }
}
