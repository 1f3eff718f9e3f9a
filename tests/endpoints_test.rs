// ABOUTME: Integration tests for channel to handler registration
// ABOUTME: Covers explicit and type-derived names, uniqueness and lookups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::EventLog;
use pg_fanout::endpoints::Endpoints;
use pg_fanout::errors::ErrorCode;
use pg_fanout::handler::ApplicationHandler;
use pg_fanout::models::Channel;
use pg_fanout::relay::NotificationRelay;

#[derive(Default)]
struct OrderUpdates;

impl ApplicationHandler for OrderUpdates {}

#[test]
fn test_register_explicit_name() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();

    let channel = endpoints.register("alpha", log.factory()).unwrap();

    assert_eq!(channel.as_str(), "alpha");
    assert_eq!(endpoints.channels(), vec![channel]);
    assert_eq!(endpoints.len(), 1);
}

#[test]
fn test_register_type_derives_snake_case_name() {
    let mut endpoints = Endpoints::new();

    let orders = endpoints.register_type::<OrderUpdates>().unwrap();
    let relay = endpoints.register_type::<NotificationRelay>().unwrap();

    assert_eq!(orders.as_str(), "order_updates");
    assert_eq!(relay.as_str(), "notification_relay");
}

#[test]
fn test_duplicate_channel_rejected() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    endpoints.register_type::<OrderUpdates>().unwrap();

    let err = endpoints.register("order_updates", log.factory()).unwrap_err();

    assert_eq!(err.code, ErrorCode::ResourceAlreadyExists);
    assert_eq!(endpoints.len(), 1);
}

#[test]
fn test_invalid_name_rejected() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();

    let err = endpoints.register("no spaces", log.factory()).unwrap_err();

    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert!(endpoints.is_empty());
}

#[test]
fn test_resolve_distinguishes_invalid_from_unknown() {
    let mut endpoints = Endpoints::new();
    endpoints.register_type::<OrderUpdates>().unwrap();

    assert_eq!(
        endpoints.resolve("order_updates").unwrap(),
        Channel::new("order_updates").unwrap()
    );
    assert_eq!(
        endpoints.resolve("missing").unwrap_err().code,
        ErrorCode::ResourceNotFound
    );
    assert_eq!(
        endpoints.resolve("9lives").unwrap_err().code,
        ErrorCode::InvalidInput
    );
}

#[test]
fn test_instantiate_builds_fresh_handlers() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    let alpha = endpoints.register("alpha", log.factory()).unwrap();

    assert!(endpoints.instantiate(&alpha).is_ok());
    assert!(endpoints.instantiate(&alpha).is_ok());
    assert_eq!(
        endpoints
            .instantiate(&Channel::new("beta").unwrap())
            .err()
            .map(|e| e.code),
        Some(ErrorCode::ResourceNotFound)
    );
}

#[test]
fn test_channels_sorted() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    endpoints.register("gamma", log.factory()).unwrap();
    endpoints.register("alpha", log.factory()).unwrap();

    let names: Vec<String> = endpoints.channels().into_iter().map(String::from).collect();
    assert_eq!(names, vec!["alpha", "gamma"]);
}
