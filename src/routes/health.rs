// ABOUTME: Health check route handler for service monitoring
// ABOUTME: Reports worker count and registered channels
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::RouteState;
use crate::constants::endpoints::HEALTH_CHECK;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    pub fn routes(state: RouteState) -> Router {
        Router::new()
            .route(HEALTH_CHECK, get(Self::handle_health))
            .with_state(state)
    }

    async fn handle_health(State(state): State<RouteState>) -> Json<Value> {
        let channels: Vec<String> = state
            .endpoints
            .channels()
            .into_iter()
            .map(String::from)
            .collect();
        Json(json!({
            "status": "healthy",
            "workers": state.pool.workers(),
            "channels": channels,
        }))
    }
}
