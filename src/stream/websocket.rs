// ABOUTME: axum WebSocket adapter implementing the duplex client stream contract
// ABOUTME: Splits the socket into a buffered reader and a writer task fed by the outbound queue
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! `WebSocket` stream adapter
//!
//! The socket is split on the worker that serves it. A writer task forwards
//! [`Outgoing`] frames to the sink; the read half stays with the loop.
//! Ping and pong frames are answered by axum and never reach handlers.

use super::{DuplexStream, IntoDuplexStream, Outbound, Outgoing};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use fanout_core::errors::{ReleaseError, StreamError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Inbound = Result<String, StreamError>;

/// Server side of an upgraded `WebSocket`
pub struct WebSocketStream {
    incoming: SplitStream<WebSocket>,
    ready: Option<Inbound>,
    outbound: Outbound,
    writer: Option<JoinHandle<()>>,
}

impl WebSocketStream {
    /// Split `socket` and start its writer task on the current runtime
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, incoming) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(sink, rx));
        Self {
            incoming,
            ready: None,
            outbound: Outbound::new(tx),
            writer: Some(writer),
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(frame) = frames.recv().await {
        let (message, last) = match frame {
            Outgoing::Text(text) => (Message::Text(text), false),
            Outgoing::Close => (Message::Close(None), true),
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "WebSocket writer stopped");
            return;
        }
        if last {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        trace!(error = %e, "WebSocket sink close failed");
    }
}

/// Map one socket event to what the loop sees; `None` for control frames
fn classify(event: Option<Result<Message, axum::Error>>) -> Option<Inbound> {
    match event {
        None => Some(Err(StreamError::Eof)),
        Some(Err(e)) => Some(Err(StreamError::Transport(e.to_string()))),
        Some(Ok(Message::Text(text))) => Some(Ok(text)),
        Some(Ok(Message::Binary(bytes))) => {
            Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
        }
        Some(Ok(Message::Close(frame))) => Some(Err(StreamError::Closed(
            frame.map_or(Cow::Borrowed("no close frame"), |f| f.reason)
                .into_owned(),
        ))),
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => None,
    }
}

#[async_trait(?Send)]
impl DuplexStream for WebSocketStream {
    async fn readable(&mut self) {
        while self.ready.is_none() {
            self.ready = classify(self.incoming.next().await);
        }
    }

    fn receive_nonblocking(&mut self) -> Result<Option<String>, StreamError> {
        if let Some(item) = self.ready.take() {
            return item.map(Some);
        }
        match self.incoming.next().now_or_never() {
            Some(event) => classify(event).transpose(),
            None => Ok(None),
        }
    }

    fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    fn release(&mut self) -> Result<(), ReleaseError> {
        let Some(writer) = self.writer.take() else {
            return Err(ReleaseError::new("websocket stream", "already released"));
        };
        // The writer flushes everything queued before the close frame, then exits.
        if !self.outbound.close() {
            writer.abort();
        }
        Ok(())
    }
}

impl IntoDuplexStream for WebSocket {
    fn into_duplex(self: Box<Self>) -> Box<dyn DuplexStream> {
        Box::new(WebSocketStream::new(*self))
    }
}
