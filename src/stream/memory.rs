// ABOUTME: In-memory duplex stream pair standing in for an upgraded client connection
// ABOUTME: The peer side scripts inbound frames, failures and hang-ups and reads outbound frames
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::{DuplexStream, IntoDuplexStream, Outbound, Outgoing};
use async_trait::async_trait;
use fanout_core::errors::{ReleaseError, StreamError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

type Inbound = Result<String, StreamError>;

/// Create a connected stream and its scripted peer
#[must_use]
pub fn memory_stream() -> (MemoryStream, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let releases = Arc::new(AtomicUsize::new(0));

    let stream = MemoryStream {
        inbound: inbound_rx,
        ready: None,
        outbound: Outbound::new(outbound_tx),
        releases: Arc::clone(&releases),
        released: false,
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        releases,
    };
    (stream, peer)
}

/// Server side of an in-memory connection
#[derive(Debug)]
pub struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    ready: Option<Inbound>,
    outbound: Outbound,
    releases: Arc<AtomicUsize>,
    released: bool,
}

fn hung_up(inbound: Option<Inbound>) -> Inbound {
    inbound.unwrap_or(Err(StreamError::Eof))
}

#[async_trait(?Send)]
impl DuplexStream for MemoryStream {
    async fn readable(&mut self) {
        if self.ready.is_none() {
            self.ready = Some(hung_up(self.inbound.recv().await));
        }
    }

    fn receive_nonblocking(&mut self) -> Result<Option<String>, StreamError> {
        if let Some(item) = self.ready.take() {
            return item.map(Some);
        }
        match self.inbound.try_recv() {
            Ok(item) => item.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamError::Eof),
        }
    }

    fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    fn release(&mut self) -> Result<(), ReleaseError> {
        if self.released {
            return Err(ReleaseError::new("memory stream", "already released"));
        }
        self.released = true;
        self.outbound.close();
        self.inbound.close();
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl IntoDuplexStream for MemoryStream {
    fn into_duplex(self: Box<Self>) -> Box<dyn DuplexStream> {
        self
    }
}

/// Client side of an in-memory connection
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
    releases: Arc<AtomicUsize>,
}

impl MemoryPeer {
    fn push(&self, item: Inbound) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|sender| sender.send(item).is_ok())
    }

    /// Send a text message to the server; `false` once the server released the stream
    pub fn send(&self, payload: impl Into<String>) -> bool {
        self.push(Ok(payload.into()))
    }

    /// Make the server's next receive fail with `error`
    pub fn fail(&self, error: StreamError) -> bool {
        self.push(Err(error))
    }

    /// Disconnect; the server observes end of stream after draining what was sent
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame from the server; `None` once the server side is gone
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.outbound.recv().await
    }

    /// Take the next frame from the server if one is queued
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.outbound.try_recv().ok()
    }

    /// Take every queued text frame, stopping at a close frame
    pub fn drain_text(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(Outgoing::Text(text)) = self.try_recv() {
            texts.push(text);
        }
        texts
    }

    /// Times the server released its side
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}
