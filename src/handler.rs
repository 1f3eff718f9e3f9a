// ABOUTME: Application handler contract invoked by connection loops
// ABOUTME: Defines open/message/notify/close callbacks and the per-connection session handle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Application handlers
//!
//! A handler instance serves exactly one client. All callbacks run on the
//! worker thread, inside the connection loop, and must return without
//! blocking; use [`Session::send`] to talk to the client.

use crate::stream::Outbound;
use fanout_core::errors::{HandlerError, StreamError};
use fanout_core::models::Channel;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Parameters supplied when the client connected (query string values)
pub type ConnectParams = BTreeMap<String, String>;

/// Per-connection context passed to every callback
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    channel: Channel,
    worker_id: usize,
    outbound: Outbound,
}

impl Session {
    /// Create a session with a fresh id
    #[must_use]
    pub fn new(channel: Channel, worker_id: usize, outbound: Outbound) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            worker_id,
            outbound,
        }
    }

    /// Connection id, unique per client
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Channel this connection is bound to
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Worker serving this connection
    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Queue a text message for the client without waiting
    pub fn send(&self, payload: impl Into<String>) {
        if !self.outbound.send(payload) {
            debug!(connection_id = %self.id, "Client writer closed; message dropped");
        }
    }
}

/// Callbacks for one client connection
///
/// Every method has a no-op default.
pub trait ApplicationHandler {
    /// Called once before the loop starts waiting; an error aborts the connection
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` to refuse the connection
    fn open(&mut self, _session: &Session, _params: &ConnectParams) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called for each inbound message, in receive order
    fn message(&mut self, _session: &Session, _payload: String) {}

    /// Called for each notification on this connection's channel, in drain order
    fn notify(&mut self, _session: &Session, _payload: &str) {}

    /// Called once when the client stream ends or fails
    ///
    /// Never called when the loop stops because the subscription failed.
    fn close(&mut self, _session: &Session, _reason: &StreamError) {}
}

/// Builds a fresh handler for each accepted connection
pub trait HandlerFactory: Send + Sync {
    /// Create a handler instance
    fn create(&self) -> Box<dyn ApplicationHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> Box<dyn ApplicationHandler> + Send + Sync,
{
    fn create(&self) -> Box<dyn ApplicationHandler> {
        self()
    }
}

/// Shared handle to a handler factory
pub type SharedHandlerFactory = Arc<dyn HandlerFactory>;
