// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Re-exports the environment-driven server configuration types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module for the fanout server
//!
//! All configuration comes from environment variables; command-line flags in
//! the server binary may override a subset of it.

/// Environment and server configuration
pub mod environment;

pub use environment::{parse_channels, DatabaseUrl, Environment, ServerConfig};
