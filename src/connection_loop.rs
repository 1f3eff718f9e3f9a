// ABOUTME: Per-client cooperative loop multiplexing stream readiness and notification readiness
// ABOUTME: Delivers inbound messages and channel-matching notifications to the application handler
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Connection loop
//!
//! ```text
//! INIT ──open ok──> RUNNING ──stream error/EOF──> CLOSED_CLEAN
//!   │                  │
//!   └─open failed      └──subscription poll error──> CLOSED_ERROR
//! ```
//!
//! While running, each step waits for the first of: the client stream being
//! readable, the shared subscription signalling an edge, or the idle window
//! elapsing. The stream is always checked first. On timeout both sides are
//! probed once, which recovers edges that arrived while the connection was
//! busy. The loop suspends only in that wait; callbacks and drains run to
//! completion.
//!
//! Both private handles are released exactly once when the loop ends, however
//! it ends. Release failures are logged and otherwise ignored. A loop dropped
//! before `run` returns (an aborted worker task) releases them on drop without
//! calling the handler's `close`.

use crate::handler::{ApplicationHandler, ConnectParams, Session};
use crate::stream::DuplexStream;
use crate::subscription::{
    PollOutcome, ReadinessHandle, SharedConnection, SubscriptionRegistry,
};
use fanout_core::errors::ConstructionError;
use fanout_core::models::Channel;
use std::rc::Rc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Handles acquired, handler not yet opened
    Init,
    /// Waiting and dispatching
    Running,
    /// The client stream ended; the handler saw `close`
    ClosedClean,
    /// The shared subscription failed; the handler did not see `close`
    ClosedError,
}

impl LoopState {
    /// Whether the loop has stopped
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedError)
    }
}

/// Which source woke the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The client stream has something to read
    Stream,
    /// The subscription signalled an edge
    Notification,
    /// Neither within the idle window
    Timeout,
}

/// Worker-level settings shared by every loop on a worker
#[derive(Clone)]
pub struct LoopContext {
    /// The worker's subscription registry
    pub registry: Rc<SubscriptionRegistry>,
    /// Worker index, exposed to handlers through the session
    pub worker_id: usize,
    /// Idle window before both sources are probed
    pub idle_timeout: Duration,
}

/// One client's loop
pub struct ConnectionLoop {
    registry: Rc<SubscriptionRegistry>,
    connection: SharedConnection,
    readiness: ReadinessHandle,
    stream: Box<dyn DuplexStream>,
    handler: Box<dyn ApplicationHandler>,
    session: Session,
    idle_timeout: Duration,
    seen_generation: u64,
    state: LoopState,
    released: bool,
}

impl ConnectionLoop {
    /// Acquire both handles, make sure the shared subscription exists, and open the handler
    ///
    /// On failure the stream (and the readiness handle, if one was taken) is
    /// released before returning.
    ///
    /// # Errors
    ///
    /// Returns `ConstructionError::Subscription` if the shared connection
    /// cannot be created, or `ConstructionError::Handler` if `open` refuses
    pub async fn open(
        context: &LoopContext,
        channel: Channel,
        mut handler: Box<dyn ApplicationHandler>,
        mut stream: Box<dyn DuplexStream>,
        params: &ConnectParams,
    ) -> Result<Self, ConstructionError> {
        let session = Session::new(channel, context.worker_id, stream.outbound());

        let connection = match context.registry.get_or_create_connection().await {
            Ok(connection) => connection,
            Err(e) => {
                release_stream(&session, stream.as_mut());
                return Err(e.into());
            }
        };
        let mut readiness = connection.borrow_mut().readiness();

        if let Err(e) = handler.open(&session, params) {
            info!(connection_id = %session.id(), channel = %session.channel(), error = %e, "Handler refused connection");
            release_readiness(&session, &mut readiness);
            release_stream(&session, stream.as_mut());
            return Err(e.into());
        }

        debug!(
            connection_id = %session.id(),
            channel = %session.channel(),
            worker_id = session.worker_id(),
            "Connection loop opened"
        );

        Ok(Self {
            seen_generation: context.registry.generation(),
            registry: Rc::clone(&context.registry),
            connection,
            readiness,
            stream,
            handler,
            session,
            idle_timeout: context.idle_timeout,
            state: LoopState::Running,
            released: false,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Session shared with the handler
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the stream ends or the subscription fails, then release everything
    pub async fn run(mut self) -> LoopState {
        while !self.state.is_terminal() {
            match self.wait().await {
                Readiness::Stream => self.read_stream(),
                Readiness::Notification => self.read_notifications(),
                Readiness::Timeout => {
                    trace!(connection_id = %self.session.id(), "Idle window elapsed; probing");
                    self.read_stream();
                    if !self.state.is_terminal() {
                        self.read_notifications();
                    }
                }
            }
        }
        self.teardown();
        self.state
    }

    /// Suspend until one source is ready or the idle window passes
    pub async fn wait(&mut self) -> Readiness {
        tokio::select! {
            biased;
            () = self.stream.readable() => Readiness::Stream,
            () = self.readiness.ready() => Readiness::Notification,
            () = time::sleep(self.idle_timeout) => Readiness::Timeout,
        }
    }

    /// Take at most one inbound message
    fn read_stream(&mut self) {
        match self.stream.receive_nonblocking() {
            Ok(None) => {}
            Ok(Some(payload)) => self.handler.message(&self.session, payload),
            Err(reason) => {
                debug!(connection_id = %self.session.id(), reason = %reason, "Client stream ended");
                self.handler.close(&self.session, &reason);
                self.state = LoopState::ClosedClean;
            }
        }
    }

    /// Poll the shared subscription and deliver matching entries of any unseen batch
    fn read_notifications(&mut self) {
        match self.registry.poll_notifications(&self.connection) {
            Err(e) => {
                warn!(
                    connection_id = %self.session.id(),
                    channel = %self.session.channel(),
                    error = %e,
                    "Subscription failed; closing connection loop"
                );
                self.state = LoopState::ClosedError;
            }
            Ok(PollOutcome::Busy) => {}
            Ok(PollOutcome::Ready(batch)) => {
                if batch.generation() <= self.seen_generation {
                    return;
                }
                self.seen_generation = batch.generation();
                for notification in batch.matching(self.session.channel()) {
                    self.handler.notify(&self.session, &notification.payload);
                }
            }
        }
    }

    fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        release_readiness(&self.session, &mut self.readiness);
        release_stream(&self.session, self.stream.as_mut());
        debug!(
            connection_id = %self.session.id(),
            state = ?self.state,
            "Connection loop finished"
        );
    }
}

impl Drop for ConnectionLoop {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn release_stream(session: &Session, stream: &mut dyn DuplexStream) {
    if let Err(e) = stream.release() {
        debug!(connection_id = %session.id(), error = %e, "Ignoring stream release failure");
    }
}

fn release_readiness(session: &Session, readiness: &mut ReadinessHandle) {
    if let Err(e) = readiness.release() {
        debug!(connection_id = %session.id(), error = %e, "Ignoring readiness release failure");
    }
}
