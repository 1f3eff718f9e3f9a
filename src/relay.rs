// ABOUTME: Bundled application handler that relays channel notifications to WebSocket clients
// ABOUTME: Used by the server binary for every configured channel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::handler::{ApplicationHandler, ConnectParams, Session};
use fanout_core::errors::{HandlerError, StreamError};
use tracing::{debug, info};

/// Forwards every notification on its channel to the client
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationRelay;

impl NotificationRelay {
    /// Text sent to the client for one notification
    #[must_use]
    pub fn render(session: &Session, payload: &str) -> String {
        format!(
            "Notification \"{payload}\" received in worker {} on {}",
            session.worker_id(),
            session.channel()
        )
    }
}

impl ApplicationHandler for NotificationRelay {
    fn open(&mut self, session: &Session, params: &ConnectParams) -> Result<(), HandlerError> {
        info!(
            connection_id = %session.id(),
            channel = %session.channel(),
            worker_id = session.worker_id(),
            params = params.len(),
            "Relay client connected"
        );
        Ok(())
    }

    fn message(&mut self, session: &Session, payload: String) {
        debug!(connection_id = %session.id(), bytes = payload.len(), "Ignoring client message");
    }

    fn notify(&mut self, session: &Session, payload: &str) {
        session.send(Self::render(session, payload));
    }

    fn close(&mut self, session: &Session, reason: &StreamError) {
        info!(connection_id = %session.id(), reason = %reason, "Relay client disconnected");
    }
}
