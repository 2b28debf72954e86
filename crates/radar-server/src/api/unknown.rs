//! Unknown device API endpoint.

use axum::extract::State;
use axum::Json;
use radar_core::{RoundSummary, UnknownSighting};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Addresses seen in the last round that belong to no configured device.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnknownDevicesResponse {
    /// The round these were collected in.
    pub round: Option<RoundSummary>,
    /// Unknown network sightings, sorted by address.
    pub network: Vec<UnknownSighting>,
    /// Unknown Bluetooth sightings, sorted by address.
    pub bluetooth: Vec<UnknownSighting>,
}

/// List unknown devices from the last round.
#[utoipa::path(
    get,
    path = "/unknown",
    tag = "devices",
    operation_id = "listUnknownDevices",
    summary = "List unknown devices",
    description = "Returns network and Bluetooth addresses seen during the last \
        round that match no configured device and are not allowlisted. The lists \
        are replaced after every round.",
    responses(
        (status = 200, description = "Unknown devices", body = UnknownDevicesResponse)
    )
)]
pub async fn list_unknown(State(state): State<SharedState>) -> Json<UnknownDevicesResponse> {
    let snapshot = state.snapshot();
    Json(UnknownDevicesResponse {
        round: snapshot.last_round,
        network: snapshot.unknown_network,
        bluetooth: snapshot.unknown_bluetooth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures;

    #[tokio::test]
    async fn test_list_unknown() {
        let Json(response) = list_unknown(State(fixtures::state())).await;
        assert_eq!(response.network.len(), 1);
        assert_eq!(response.network[0].address, "b8:27:eb:00:00:77");
        assert!(response.bluetooth.is_empty());
        assert!(response.round.is_some());
    }
}
