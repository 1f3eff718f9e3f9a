// ABOUTME: Main library entry point for the pg-fanout notification bridge
// ABOUTME: Fans PostgreSQL LISTEN/NOTIFY events out to long-lived WebSocket clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # pg-fanout
//!
//! Bridges a publish/subscribe notification source (PostgreSQL
//! `LISTEN`/`NOTIFY`, or an in-process broker) to many WebSocket clients.
//!
//! Each worker thread runs a current-thread tokio runtime with a `LocalSet`.
//! Every accepted client gets a [`connection_loop::ConnectionLoop`] that waits
//! on two readiness sources: its own stream and the worker's single shared
//! subscription connection. When the subscription fires, exactly one loop
//! drains the pending notifications into a cached batch and every loop
//! delivers the entries matching its channel to its application handler.
//!
//! ## Architecture
//!
//! - **subscription**: the shared connection, its registry and batch cache,
//!   plus `PostgreSQL` and in-memory backends
//! - **stream**: the duplex client stream abstraction with `WebSocket` and
//!   in-memory implementations
//! - **handler**: application callbacks (`open`/`message`/`notify`/`close`)
//! - **connection_loop**: the per-client multiplexing state machine
//! - **endpoints**: channel to handler-factory registration
//! - **worker**: worker threads and round-robin dispatch
//! - **publish**: the `NOTIFY` side
//! - **routes**: the axum HTTP surface
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pg_fanout::config::environment::ServerConfig;
//! use pg_fanout::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("{}", config.summary());
//!     Ok(())
//! }
//! ```

// ── Re-exports from fanout-core ─────────────────────────────────────────

/// Application constants organized by domain
pub use fanout_core::constants;

/// Unified error handling
pub use fanout_core::errors;

/// Channel and notification models
pub use fanout_core::models;

// ── Public API ──────────────────────────────────────────────────────────

/// Environment-driven configuration
pub mod config;

/// Per-client multiplexing loop
pub mod connection_loop;

/// Channel to handler registration
pub mod endpoints;

/// Application handler contract and session handle
pub mod handler;

/// Structured logging setup
pub mod logging;

/// Notification publishing
pub mod publish;

/// Bundled relay handler used by the server binary
pub mod relay;

/// HTTP routes
pub mod routes;

/// Graceful shutdown trigger for the HTTP server
pub mod shutdown;

/// Duplex client streams
pub mod stream;

/// Shared notification subscription
pub mod subscription;

/// Worker threads and dispatch
pub mod worker;
