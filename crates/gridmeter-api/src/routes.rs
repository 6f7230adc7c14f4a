//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "REST and WebSocket surface for the gridmeter runtime."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use gridmeter_billing::{PaymentArtifact, PaymentOutcome};
use gridmeter_core::{
    compute_metrics, user_load_summaries, CoreError, Device, DeviceStatus, HistoryPoint,
    PaymentMethod, ReadingInput,
};
use gridmeter_hub::EventFrame;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{authenticate, ApiError, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(crate) struct IngestRequest {
    user_id: Uuid,
    #[serde(default)]
    device_id: Option<Uuid>,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(flatten)]
    reading: ReadingInput,
}

#[derive(Debug, Serialize)]
pub(crate) struct IngestResponse {
    device: Device,
    point: HistoryPoint,
    created: bool,
}

/// Telemetry entry point. Meters authenticate out of band, so this route
/// takes the reporting user id at face value.
pub(crate) async fn post_ingest(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    let outcome = state.driver.ingest(
        request.user_id,
        request.device_id,
        request.device_name.as_deref(),
        request.reading,
    )?;
    Ok(Json(IngestResponse {
        device: outcome.device,
        point: outcome.point,
        created: outcome.created,
    }))
}

pub(crate) async fn list_devices(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Device>>> {
    let principal = authenticate(&state, &headers)?;
    let scope = if principal.admin {
        gridmeter_core::DeviceScope::All
    } else {
        gridmeter_core::DeviceScope::User(principal.user_id)
    };
    Ok(Json(state.store.list_devices(scope)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct NameRequest {
    name: String,
}

pub(crate) async fn create_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<NameRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &headers)?;
    let device = state.store.create_device(&principal, &request.name)?;
    state.hub.publish(
        EventFrame::DeviceCreated {
            device: device.clone(),
        },
        device.user_id,
    );
    Ok((StatusCode::CREATED, Json(device)).into_response())
}

pub(crate) async fn rename_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<Uuid>,
    Json(request): Json<NameRequest>,
) -> ApiResult<Json<Device>> {
    let principal = authenticate(&state, &headers)?;
    let device = state
        .store
        .rename_device(&principal, device_id, &request.name)?;
    state.hub.publish(
        EventFrame::DeviceUpdated {
            device: device.clone(),
        },
        device.user_id,
    );
    Ok(Json(device))
}

pub(crate) async fn delete_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<Uuid>,
) -> ApiResult<Json<Device>> {
    let principal = authenticate(&state, &headers)?;
    let device = state.store.delete_device(&principal, device_id)?;
    state
        .hub
        .publish(EventFrame::DeviceDeleted { device_id }, device.user_id);
    Ok(Json(device))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetStatusRequest {
    status: String,
}

pub(crate) async fn set_device_status(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<Uuid>,
    Json(request): Json<SetStatusRequest>,
) -> ApiResult<Json<Device>> {
    let principal = authenticate(&state, &headers)?;
    let status = DeviceStatus::from_str(&request.status).map_err(|_| {
        CoreError::InvalidInput(format!("unknown device status '{}'", request.status))
    })?;
    let device = state.store.set_status(&principal, device_id, status)?;
    state.hub.publish(
        EventFrame::DeviceUpdated {
            device: device.clone(),
        },
        device.user_id,
    );
    Ok(Json(device))
}

pub(crate) async fn get_metrics(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<Json<gridmeter_core::MetricsSnapshot>> {
    let principal = authenticate(&state, &headers)?;
    let tariff = state.billing.config().default_tariff;
    Ok(Json(compute_metrics(
        &state.store,
        principal.user_id,
        tariff,
    )))
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(default)]
    device_id: Option<Uuid>,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

pub(crate) async fn get_history(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryPoint>>> {
    let principal = authenticate(&state, &headers)?;
    Ok(Json(state.store.query_history(
        principal.user_id,
        query.device_id,
        query.from,
        query.to,
    )))
}

pub(crate) async fn get_user_summaries(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<gridmeter_core::aggregate::UserLoadSummary>>> {
    let principal = authenticate(&state, &headers)?;
    if !principal.admin {
        return Err(ApiError::Core(CoreError::Forbidden(
            "administrative endpoint",
        )));
    }
    Ok(Json(user_load_summaries(&state.store)))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateBillRequest {
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    tariff: Option<f64>,
}

pub(crate) async fn generate_bill(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateBillRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &headers)?;
    let bill = state
        .billing
        .generate_bill(&principal, request.user_id, request.tariff)?;
    Ok((StatusCode::CREATED, Json(bill)).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct BillsQuery {
    #[serde(default)]
    user_id: Option<Uuid>,
}

pub(crate) async fn list_bills(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<BillsQuery>,
) -> ApiResult<Json<Vec<gridmeter_core::Bill>>> {
    let principal = authenticate(&state, &headers)?;
    Ok(Json(state.billing.list_bills(&principal, query.user_id)?))
}

pub(crate) async fn get_bill(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(bill_id): Path<Uuid>,
) -> ApiResult<Json<gridmeter_core::Bill>> {
    let principal = authenticate(&state, &headers)?;
    Ok(Json(state.billing.get_bill(&principal, bill_id)?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PayRequest {
    method: String,
}

pub(crate) async fn start_payment(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(bill_id): Path<Uuid>,
    Json(request): Json<PayRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let method = PaymentMethod::from_str(&request.method).map_err(|_| {
        CoreError::InvalidInput(format!("unknown payment method '{}'", request.method))
    })?;
    let body = match state.billing.start_payment(&principal, bill_id, method)? {
        PaymentOutcome::Settled(bill) => serde_json::json!({ "status": "PAID", "bill": bill }),
        PaymentOutcome::Pending(PaymentArtifact::UpiQr { payload }) => {
            serde_json::json!({ "status": "PENDING", "qr_payload": payload })
        }
        PaymentOutcome::Pending(PaymentArtifact::Redirect { url }) => {
            serde_json::json!({ "status": "PENDING", "redirect_url": url })
        }
    };
    Ok(Json(body))
}

pub(crate) async fn confirm_payment(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(bill_id): Path<Uuid>,
) -> ApiResult<Json<gridmeter_core::Bill>> {
    let principal = authenticate(&state, &headers)?;
    Ok(Json(state.billing.confirm_payment(&principal, bill_id)?))
}
