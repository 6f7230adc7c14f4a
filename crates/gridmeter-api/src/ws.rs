//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "REST and WebSocket surface for the gridmeter runtime."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gridmeter_core::{DeviceScope, Principal};
use gridmeter_hub::{ConnectionScope, EventFrame};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    token: Option<String>,
}

/// Live event stream. Token-gated at upgrade time; each connection sees only
/// the events of its own user, admins see everything.
pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    Query(params): Query<WsParams>,
) -> Response {
    let Some(principal) = params
        .token
        .as_deref()
        .and_then(|token| state.identity.authenticate(token))
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| client_loop(socket, state, principal))
}

async fn client_loop(mut socket: WebSocket, state: Arc<ApiState>, principal: Principal) {
    let (scope, device_scope) = if principal.admin {
        (ConnectionScope::Admin, DeviceScope::All)
    } else {
        (
            ConnectionScope::User(principal.user_id),
            DeviceScope::User(principal.user_id),
        )
    };

    // Snapshot before registering, so no event older than the snapshot is
    // ever delivered.
    let init = EventFrame::Init {
        devices: state.store.list_devices(device_scope),
    };
    let Ok(text) = serde_json::to_string(&init) else {
        warn!("failed to serialise init frame");
        return;
    };
    if socket.send(Message::Text(text)).await.is_err() {
        return;
    }
    let (id, mut rx) = state.hub.register(scope);
    debug!(connection = id, user = %principal.user_id, "websocket viewer connected");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    // Evicted by the hub (queue overflow).
                    break;
                };
                let Ok(text) = serde_json::to_string(&frame) else {
                    warn!("failed to serialise event frame");
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister(id);
    debug!(connection = id, "websocket viewer disconnected");
}
