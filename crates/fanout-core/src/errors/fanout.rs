// ABOUTME: Error taxonomy for subscriptions, client streams and application handlers
// ABOUTME: Distinguishes construction, stream, subscription and release failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use thiserror::Error;

/// Failures of the shared notification subscription
#[derive(Error, Debug, Clone)]
pub enum SubscriptionError {
    /// The factory could not establish a connection
    #[error("Subscription connection failed: {0}")]
    Connection(String),

    /// A channel could not be registered on a fresh connection
    #[error("Failed to register channel '{channel}': {reason}")]
    Register {
        /// Channel being registered
        channel: String,
        /// Underlying failure
        reason: String,
    },

    /// Polling the shared connection failed
    #[error("Subscription poll failed: {0}")]
    Poll(String),
}

/// Failures of a client duplex stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The peer went away without a close frame
    #[error("Stream reached end of file")]
    Eof,

    /// The peer sent a close frame
    #[error("Stream closed by peer: {0}")]
    Closed(String),

    /// Transport-level receive failure
    #[error("Stream transport error: {0}")]
    Transport(String),
}

/// Failures raised by application handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler refused the connection
    #[error("Handler rejected connection: {0}")]
    Rejected(String),
}

/// Reasons a connection loop could not start
#[derive(Error, Debug, Clone)]
pub enum ConstructionError {
    /// Shared subscription setup failed
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// `open` on the handler failed
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// A resource handle could not be released during teardown
#[derive(Error, Debug, Clone)]
#[error("Failed to release {resource}: {reason}")]
pub struct ReleaseError {
    /// Which handle was being released
    pub resource: &'static str,
    /// Underlying failure
    pub reason: String,
}

impl ReleaseError {
    /// Build a release error for the named resource
    pub fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}
