// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Pure data constants for ports, loop timing, and PostgreSQL limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! This module organizes application constants by domain for better maintainability.

/// Service identifiers used in structured logs
pub mod service_names {
    /// Name of the fanout server service
    pub const PG_FANOUT_SERVER: &str = "pg-fanout-server";
}

/// Network defaults
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
    /// Default bind host
    pub const DEFAULT_HOST: &str = "127.0.0.1";
}

/// Connection loop and worker defaults
pub mod loops {
    /// Idle window after which a loop probes both the stream and the subscription
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3_000;
    /// Number of worker threads started when nothing is configured
    pub const DEFAULT_WORKERS: usize = 1;
}

/// Limits imposed by PostgreSQL `LISTEN`/`NOTIFY`
pub mod postgres {
    /// Identifiers longer than `NAMEDATALEN - 1` are truncated by the server
    pub const MAX_IDENTIFIER_BYTES: usize = 63;
    /// `NOTIFY` payloads must be shorter than 8000 bytes
    pub const MAX_PAYLOAD_BYTES: usize = 7_999;
}

/// HTTP routes exposed by the server
pub mod endpoints {
    /// Health check endpoint
    pub const HEALTH_CHECK: &str = "/health";
    /// WebSocket upgrade route, parameterised by channel
    pub const WEBSOCKET: &str = "/ws/:channel";
    /// Publish route, parameterised by channel
    pub const NOTIFY: &str = "/notify/:channel";
}
