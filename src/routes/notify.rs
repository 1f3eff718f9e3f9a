// ABOUTME: HTTP publish route that raises a notification on a registered channel
// ABOUTME: The request body is the raw payload; success returns 204 No Content
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::RouteState;
use crate::constants::endpoints::NOTIFY;
use crate::errors::AppError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

/// Notify routes implementation
pub struct NotifyRoutes;

impl NotifyRoutes {
    /// Create the publish route
    pub fn routes(state: RouteState) -> Router {
        Router::new()
            .route(NOTIFY, post(Self::handle_notify))
            .with_state(state)
    }

    async fn handle_notify(
        Path(name): Path<String>,
        State(state): State<RouteState>,
        body: String,
    ) -> Result<Response, AppError> {
        let channel = state.endpoints.resolve(&name)?;
        state.publisher.publish(&channel, &body).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}
