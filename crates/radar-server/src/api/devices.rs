//! Device presence API endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use radar_core::{DeviceStatus, RadarError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the devices router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_devices))
        .route("/{id}", get(get_device))
}

// ============================================================================
// Response Types
// ============================================================================

/// All registered devices.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceListResponse {
    /// When the underlying snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Number of tracked devices currently present.
    #[schema(example = 1)]
    pub count_here: usize,
    /// Devices in registration order.
    pub devices: Vec<DeviceStatus>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every registered device with its presence.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List devices and their presence",
    description = "Returns every configured device as of the last completed round \
        or passive sighting, including learned address aliases.",
    responses(
        (status = 200, description = "Device list", body = DeviceListResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DeviceListResponse> {
    let snapshot = state.snapshot();
    Json(DeviceListResponse {
        generated_at: snapshot.generated_at,
        count_here: snapshot.count_here,
        devices: snapshot.devices,
    })
}

/// Get one device by id.
#[utoipa::path(
    get,
    path = "/devices/{id}",
    tag = "devices",
    operation_id = "getDevice",
    summary = "Get one device",
    params(
        ("id" = String, Path, description = "Device id (name without a trailing '-')")
    ),
    responses(
        (status = 200, description = "Device status", body = DeviceStatus),
        (status = 404, description = "No device with this id", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeviceStatus>> {
    state
        .snapshot()
        .device(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| RadarError::DeviceNotFound(id).into())
}
