// ABOUTME: Shared test utilities for pg-fanout integration tests
// ABOUTME: Provides quiet logging, a recording application handler and polling helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `pg_fanout`

use pg_fanout::errors::{HandlerError, StreamError};
use pg_fanout::handler::{ApplicationHandler, ConnectParams, Session};
use std::env;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::Level;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// One observed handler callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    Open(ConnectParams),
    Message(String),
    Notify(String),
    Close(String),
}

/// Callback log shared between a handler and the test body
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<HandlerEvent>>>);

impl EventLog {
    fn push(&self, event: HandlerEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn opened(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, HandlerEvent::Open(_)))
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HandlerEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn notifies(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HandlerEvent::Notify(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Close(_)))
            .count()
    }

    /// A handler that records into this log
    pub fn handler(&self) -> Box<dyn ApplicationHandler> {
        Box::new(RecordingHandler {
            log: self.clone(),
            refuse_open: false,
        })
    }

    /// A handler that records into this log and refuses to open
    pub fn refusing_handler(&self) -> Box<dyn ApplicationHandler> {
        Box::new(RecordingHandler {
            log: self.clone(),
            refuse_open: true,
        })
    }

    /// A factory whose handlers all record into this log
    pub fn factory(&self) -> impl Fn() -> Box<dyn ApplicationHandler> + Send + Sync + 'static {
        let log = self.clone();
        move || log.handler()
    }
}

/// Handler that records every callback and echoes messages back
pub struct RecordingHandler {
    log: EventLog,
    refuse_open: bool,
}

impl ApplicationHandler for RecordingHandler {
    fn open(&mut self, _session: &Session, params: &ConnectParams) -> Result<(), HandlerError> {
        if self.refuse_open {
            return Err(HandlerError::Rejected("not today".into()));
        }
        self.log.push(HandlerEvent::Open(params.clone()));
        Ok(())
    }

    fn message(&mut self, session: &Session, payload: String) {
        session.send(format!("echo: {payload}"));
        self.log.push(HandlerEvent::Message(payload));
    }

    fn notify(&mut self, _session: &Session, payload: &str) {
        self.log.push(HandlerEvent::Notify(payload.to_owned()));
    }

    fn close(&mut self, _session: &Session, reason: &StreamError) {
        self.log.push(HandlerEvent::Close(reason.to_string()));
    }
}

/// Poll `condition` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
