// ABOUTME: WebSocket route handler that upgrades clients and hands them to a worker
// ABOUTME: Resolves the channel from the path before upgrading so unknown channels get an HTTP error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::RouteState;
use crate::constants::endpoints::WEBSOCKET;
use crate::errors::AppError;
use crate::handler::ConnectParams;
use crate::worker::Accepted;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use tracing::{info, warn};

/// WebSocket routes implementation
pub struct WebSocketRoutes;

impl WebSocketRoutes {
    /// Create the upgrade route
    pub fn routes(state: RouteState) -> Router {
        Router::new()
            .route(WEBSOCKET, get(Self::handle_websocket))
            .with_state(state)
    }

    /// Upgrade a client on `/ws/:channel`
    ///
    /// Query string values become the handler's open parameters. The
    /// upgraded socket is dispatched to a worker and never touches the
    /// acceptor runtime again.
    async fn handle_websocket(
        ws: WebSocketUpgrade,
        Path(name): Path<String>,
        Query(params): Query<ConnectParams>,
        State(state): State<RouteState>,
    ) -> Result<Response, AppError> {
        let channel = state.endpoints.resolve(&name)?;
        info!(channel = %channel, "WebSocket connection request");

        let pool = state.pool;
        Ok(ws.on_upgrade(move |socket: WebSocket| async move {
            let accepted = Accepted {
                channel,
                params,
                stream: Box::new(socket),
            };
            if let Err(e) = pool.dispatch(accepted) {
                warn!(error = %e, "Dropping upgraded WebSocket");
            }
        }))
    }
}
