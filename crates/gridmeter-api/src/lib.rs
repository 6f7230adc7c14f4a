//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "REST and WebSocket surface for the gridmeter runtime."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use gridmeter_billing::BillingEngine;
use gridmeter_core::{CoreError, MeterStore, Principal};
use gridmeter_hub::BroadcastHub;
use gridmeter_sim::IngestionDriver;
use prometheus::{Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod identity;
mod routes;
mod ws;

pub use identity::{Identity, StaticTokenIdentity};

/// Shared state injected into the axum handlers.
pub struct ApiState {
    pub store: Arc<MeterStore>,
    pub billing: Arc<BillingEngine>,
    pub driver: Arc<IngestionDriver>,
    pub hub: Arc<BroadcastHub>,
    pub identity: Arc<dyn Identity>,
    pub metrics: Option<Arc<Registry>>,
}

/// Error surface of the HTTP layer: core errors mapped onto status codes,
/// plus authentication failures the core never sees.
pub(crate) enum ApiError {
    Core(CoreError),
    Unauthorized,
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid token".to_owned(),
            ),
            ApiError::Core(err) => {
                let status = match err {
                    CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                    CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    CoreError::Conflict(_) | CoreError::InvalidState(_) => StatusCode::CONFLICT,
                    CoreError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.kind(), err.to_string())
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": message, "kind": kind })),
        )
            .into_response()
    }
}

pub(crate) type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve the caller from `Authorization: Bearer` or `x-api-token`.
pub(crate) fn authenticate(state: &ApiState, headers: &HeaderMap) -> ApiResult<Principal> {
    let token = headers
        .get("x-api-token")
        .or_else(|| headers.get(axum::http::header::AUTHORIZATION))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_start_matches("Bearer ").to_owned())
        .ok_or(ApiError::Unauthorized)?;
    state
        .identity
        .authenticate(&token)
        .ok_or(ApiError::Unauthorized)
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/ingest", post(routes::post_ingest))
        .route(
            "/api/devices",
            get(routes::list_devices).post(routes::create_device),
        )
        .route(
            "/api/devices/:id",
            put(routes::rename_device).delete(routes::delete_device),
        )
        .route("/api/devices/:id/status", post(routes::set_device_status))
        .route("/api/metrics", get(routes::get_metrics))
        .route("/api/history", get(routes::get_history))
        .route("/api/users/summary", get(routes::get_user_summaries))
        .route("/api/bills/generate", post(routes::generate_bill))
        .route("/api/bills", get(routes::list_bills))
        .route("/api/bills/:id", get(routes::get_bill))
        .route("/api/bills/:id/pay", post(routes::start_payment))
        .route("/api/bills/:id/pay/confirm", post(routes::confirm_payment))
        .route("/metrics", get(get_prometheus_metrics))
        .route("/ws", get(ws::upgrade_handler))
        .with_state(state)
}

async fn get_prometheus_metrics(State(state): State<Arc<ApiState>>) -> Response {
    let Some(registry) = &state.metrics else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };

    let encoder = TextEncoder::new();
    let families = registry.gather();
    match encoder.encode_to_string(&families) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Builder used to configure and spawn the API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    state: Arc<ApiState>,
}

impl ApiServerBuilder {
    pub fn new(listen: SocketAddr, state: Arc<ApiState>) -> Self {
        Self { listen, state }
    }

    /// Spawn the server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "api server listening");

        let app = router(self.state);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ApiServerHandle {
    /// The socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}
