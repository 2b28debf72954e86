//! System API endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use radar_core::RoundSummary;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the system router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/status", get(get_status))
}

/// System status response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "scan_interval_secs": 15,
    "away_default_minutes": 2,
    "devices": 4,
    "count_here": 2,
    "bluetooth_available": true,
    "config_path": "/etc/radar/config.toml",
    "last_round": null
}))]
pub struct SystemStatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Current round interval, after any self-correction.
    #[schema(example = 15)]
    pub scan_interval_secs: u64,

    /// Engine-wide away threshold in minutes.
    #[schema(example = 2)]
    pub away_default_minutes: u32,

    /// Number of registered devices.
    pub devices: usize,

    /// Number of tracked devices currently present.
    pub count_here: usize,

    /// Whether a Bluetooth adapter was found at startup.
    pub bluetooth_available: bool,

    /// Where the configuration was loaded from.
    pub config_path: String,

    /// The last completed round, if any.
    pub last_round: Option<RoundSummary>,
}

/// Get system status.
#[utoipa::path(
    get,
    path = "/system/status",
    tag = "system",
    operation_id = "getSystemStatus",
    summary = "Get system status",
    description = "Returns version, uptime, the effective scan interval and away \
        threshold, and a summary of the last round.",
    responses(
        (status = 200, description = "System status retrieved", body = SystemStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<SystemStatusResponse> {
    let snapshot = state.snapshot();
    Json(SystemStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        scan_interval_secs: snapshot.scan_interval_secs,
        away_default_minutes: snapshot.away_default_minutes,
        devices: snapshot.devices.len(),
        count_here: snapshot.count_here,
        bluetooth_available: state.bluetooth_available(),
        config_path: state.config_path().display().to_string(),
        last_round: snapshot.last_round,
    })
}
