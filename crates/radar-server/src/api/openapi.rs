//! OpenAPI specification generation for the radar API.

use axum::Json;
use utoipa::OpenApi;

use radar_core::{
    Channel, DeviceStatus, HealthResponse, RoundSummary, SightingSource, UnknownSighting,
};

use super::devices::DeviceListResponse;
use super::error::ErrorResponse;
use super::system::SystemStatusResponse;
use super::unknown::UnknownDevicesResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for radar.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "radar API",
        version = "0.1.0",
        description = r"
# radar API

radar decides which of your devices are at home by combining network sweeps,
reachability probes, name lookups, and Bluetooth discovery.

## Overview

The daemon runs a discovery round every scan interval. Each round:

1. Sweeps the local network and probes devices not yet seen
2. Runs a bounded Bluetooth discovery pass
3. Re-evaluates every device: a device is present while its last sighting is
   younger than its away threshold

This API is read-only. It serves the state published after the most recent
round or passive sighting.
",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/api", description = "Local radar server")
    ),
    tags(
        (name = "system", description = "Health checks and system status"),
        (name = "devices", description = "Configured and unknown devices")
    ),
    paths(
        super::health::health_check,
        super::devices::list_devices,
        super::devices::get_device,
        super::unknown::list_unknown,
        super::system::get_status,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            DeviceStatus,
            DeviceListResponse,
            RoundSummary,
            UnknownSighting,
            UnknownDevicesResponse,
            SightingSource,
            Channel,
            SystemStatusResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "radar API");
        assert!(spec.paths.paths.contains_key("/devices/{id}"));
        assert!(spec.paths.paths.contains_key("/unknown"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"radar API\""));
        assert!(json.contains("DeviceStatus"));
    }
}
