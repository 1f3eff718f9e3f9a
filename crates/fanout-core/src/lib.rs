// ABOUTME: Core types and constants for the pg-fanout notification bridge
// ABOUTME: Foundation crate with error handling, channel models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Fanout Core
//!
//! Foundation crate providing shared types and constants for the pg-fanout
//! notification bridge. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and the
//!   subscription/stream error taxonomy
//! - **constants**: Application-wide constants organized by domain
//! - **models**: `Channel` and `Notification`

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants and configuration values organized by domain
pub mod constants;

/// Channel and notification data models
pub mod models;
