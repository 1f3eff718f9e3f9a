// ABOUTME: Route module organization for the fan-out server's HTTP surface
// ABOUTME: Combines WebSocket, notify and health routes behind one shared state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! HTTP routes
//!
//! Every route group is a unit struct with a `routes` constructor, merged
//! here into the application router.

/// Health check route
pub mod health;
/// HTTP publish route
pub mod notify;
/// WebSocket upgrade route
pub mod websocket;

pub use health::HealthRoutes;
pub use notify::NotifyRoutes;
pub use websocket::WebSocketRoutes;

use crate::endpoints::Endpoints;
use crate::publish::Publisher;
use crate::worker::WorkerPool;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by every route
#[derive(Clone)]
pub struct RouteState {
    /// Registered channels and their handlers
    pub endpoints: Arc<Endpoints>,
    /// Workers that own accepted streams
    pub pool: Arc<WorkerPool>,
    /// Notification publisher
    pub publisher: Arc<dyn Publisher>,
}

/// Application router
pub struct FanoutRoutes;

impl FanoutRoutes {
    /// Build the full router
    pub fn routes(state: RouteState) -> Router {
        Router::new()
            .merge(HealthRoutes::routes(state.clone()))
            .merge(NotifyRoutes::routes(state.clone()))
            .merge(WebSocketRoutes::routes(state))
            .layer(TraceLayer::new_for_http())
    }
}
