// ABOUTME: Integration tests for worker threads and round-robin dispatch
// ABOUTME: Each worker subscribes independently and serves its own connection loops
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{wait_until, EventLog, HandlerEvent};
use pg_fanout::endpoints::Endpoints;
use pg_fanout::errors::ErrorCode;
use pg_fanout::handler::{ApplicationHandler, ConnectParams};
use pg_fanout::models::Channel;
use pg_fanout::relay::NotificationRelay;
use pg_fanout::stream::{memory_stream, MemoryPeer, Outgoing};
use pg_fanout::subscription::{ConnectionFactory, MemoryBroker};
use pg_fanout::worker::{Accepted, WorkerPool, WorkerSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(2);

fn alpha() -> Channel {
    Channel::new("alpha").unwrap()
}

fn settings(workers: usize) -> WorkerSettings {
    WorkerSettings {
        workers,
        idle_timeout: Duration::from_millis(50),
    }
}

fn accept(params: ConnectParams) -> (Accepted, MemoryPeer) {
    let (stream, peer) = memory_stream();
    let accepted = Accepted {
        channel: alpha(),
        params,
        stream: Box::new(stream),
    };
    (accepted, peer)
}

fn spawn_pool(workers: usize, endpoints: Endpoints) -> (WorkerPool, Arc<MemoryBroker>) {
    common::init_test_logging();
    let broker = Arc::new(MemoryBroker::new());
    let factory: Arc<dyn ConnectionFactory> = broker.clone();
    let pool = WorkerPool::spawn(settings(workers), factory, Arc::new(endpoints)).unwrap();
    (pool, broker)
}

#[tokio::test]
async fn test_zero_workers_rejected() {
    let broker: Arc<dyn ConnectionFactory> = Arc::new(MemoryBroker::new());
    let err = WorkerPool::spawn(settings(0), broker, Arc::new(Endpoints::new()))
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::ConfigInvalid);
}

#[tokio::test]
async fn test_dispatched_stream_is_opened_with_params() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    endpoints.register("alpha", log.factory()).unwrap();
    let (pool, _broker) = spawn_pool(1, endpoints);

    let params = ConnectParams::from([("token".to_owned(), "abc".to_owned())]);
    let (accepted, _peer) = accept(params.clone());
    assert_eq!(pool.dispatch(accepted).unwrap(), 0);

    assert!(wait_until(PATIENCE, || log.opened()).await);
    assert_eq!(log.events().first(), Some(&HandlerEvent::Open(params)));

    pool.shutdown();
}

#[tokio::test]
async fn test_relay_delivers_notification_text() {
    let mut endpoints = Endpoints::new();
    endpoints
        .register("alpha", || {
            Box::new(NotificationRelay) as Box<dyn ApplicationHandler>
        })
        .unwrap();
    let (pool, broker) = spawn_pool(1, endpoints);

    let (accepted, mut peer) = accept(ConnectParams::new());
    pool.dispatch(accepted).unwrap();
    assert!(wait_until(PATIENCE, || broker.readiness_handles() == 1).await);

    broker.notify(&alpha(), "hi");

    let frame = timeout(PATIENCE, peer.recv()).await.unwrap();
    assert_eq!(
        frame,
        Some(Outgoing::Text(
            "Notification \"hi\" received in worker 0 on alpha".to_owned()
        ))
    );

    pool.shutdown();
}

#[tokio::test]
async fn test_round_robin_and_independent_subscriptions() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    endpoints.register("alpha", log.factory()).unwrap();
    let (pool, broker) = spawn_pool(2, endpoints);
    assert_eq!(pool.workers(), 2);

    let mut peers = Vec::new();
    let mut assigned = Vec::new();
    for _ in 0..3 {
        let (accepted, peer) = accept(ConnectParams::new());
        assigned.push(pool.dispatch(accepted).unwrap());
        peers.push(peer);
    }
    assert_eq!(assigned, vec![0, 1, 0]);

    assert!(wait_until(PATIENCE, || broker.readiness_handles() == 3).await);
    assert_eq!(broker.connections_opened(), 2);

    broker.notify(&alpha(), "everyone");
    assert!(wait_until(PATIENCE, || log.notifies().len() == 3).await);
    assert_eq!(broker.physical_reads(), 2);

    pool.shutdown();
}

#[tokio::test]
async fn test_dispatch_after_shutdown_fails() {
    let log = EventLog::default();
    let mut endpoints = Endpoints::new();
    endpoints.register("alpha", log.factory()).unwrap();
    let (pool, broker) = spawn_pool(1, endpoints);

    let (accepted, mut peer) = accept(ConnectParams::new());
    pool.dispatch(accepted).unwrap();
    assert!(wait_until(PATIENCE, || log.opened()).await);

    pool.shutdown();

    // Loops still running are dropped with the worker and release the client side
    assert_eq!(peer.release_count(), 1);
    assert_eq!(
        timeout(PATIENCE, peer.recv()).await.unwrap(),
        Some(Outgoing::Close)
    );
    assert_eq!(timeout(PATIENCE, peer.recv()).await.unwrap(), None);
    assert_eq!(broker.live_connections(), 0);
    assert_eq!(log.closes(), 0);

    let (accepted, _peer) = accept(ConnectParams::new());
    let err = pool.dispatch(accepted).unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceUnavailable);
}
