// ABOUTME: Duplex client stream abstraction consumed by connection loops
// ABOUTME: Non-blocking receive, readiness wait, outbound send handle and release
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Client streams
//!
//! A [`DuplexStream`] is an already-upgraded client connection. The loop waits
//! on [`DuplexStream::readable`], then takes at most one message with
//! [`DuplexStream::receive_nonblocking`]. Outbound traffic goes through a
//! cloneable [`Outbound`] handle so handlers can send without awaiting.

/// In-memory stream pairs for tests and embedding
pub mod memory;
/// axum `WebSocket` adapter
pub mod websocket;

pub use memory::{memory_stream, MemoryPeer, MemoryStream};
pub use websocket::WebSocketStream;

use async_trait::async_trait;
use fanout_core::errors::{ReleaseError, StreamError};
use tokio::sync::mpsc;
use tracing::debug;

/// Frames queued for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text message
    Text(String),
    /// Close the connection after everything queued before it
    Close,
}

/// Non-blocking send handle toward one client
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::UnboundedSender<Outgoing>,
}

impl Outbound {
    /// Wrap the sending half of a writer queue
    #[must_use]
    pub const fn new(sender: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { sender }
    }

    /// Queue a text message; returns `false` once the writer has gone away
    pub fn send(&self, payload: impl Into<String>) -> bool {
        self.push(Outgoing::Text(payload.into()))
    }

    /// Queue a close frame
    pub fn close(&self) -> bool {
        self.push(Outgoing::Close)
    }

    fn push(&self, frame: Outgoing) -> bool {
        match self.sender.send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!(frame = ?e.0, "Dropping outbound frame; client writer is gone");
                false
            }
        }
    }

    /// Whether the writer side has shut down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// An upgraded client connection
#[async_trait(?Send)]
pub trait DuplexStream {
    /// Wait until `receive_nonblocking` has something to report
    ///
    /// Must be cancel-safe: the loop drops this future whenever the
    /// subscription wins the race.
    async fn readable(&mut self);

    /// Take one message if one is available
    ///
    /// # Errors
    ///
    /// Returns a `StreamError` on end of stream, close or transport failure
    fn receive_nonblocking(&mut self) -> Result<Option<String>, StreamError>;

    /// Send handle for this client
    fn outbound(&self) -> Outbound;

    /// Close the client side; only the first call succeeds
    ///
    /// # Errors
    ///
    /// Returns a `ReleaseError` if the stream was already released
    fn release(&mut self) -> Result<(), ReleaseError>;
}

/// A stream accepted on one thread and converted on the worker that serves it
pub trait IntoDuplexStream: Send {
    /// Finish setup on the serving worker
    fn into_duplex(self: Box<Self>) -> Box<dyn DuplexStream>;
}
