//! Shared types and OpenAPI schemas.
//!
//! These are the read-only views of engine state handed to the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::unknown::UnknownSighting;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// Presence status of one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[schema(example = json!({
    "id": "alice",
    "name": "alice",
    "kind": "ip",
    "tracked": true,
    "present": true,
    "last_here": "2024-05-01T08:00:00Z",
    "here": "IP",
    "present_since_count": 12,
    "away_minutes": 2,
    "ips": ["192.168.1.10"],
    "macs": ["aa:bb:cc:dd:ee:ff"],
    "bluetooth": []
}))]
pub struct DeviceStatus {
    /// State-sink id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Device kind label.
    pub kind: String,
    /// Whether presence is computed for this device.
    pub tracked: bool,
    /// Current presence.
    pub present: bool,
    /// Most recent confirmed sighting.
    pub last_here: Option<DateTime<Utc>>,
    /// Channels that saw the device in the last round.
    pub here: String,
    /// Consecutive rounds present.
    pub present_since_count: u32,
    /// Away threshold in effect, in minutes.
    pub away_minutes: u64,
    /// Owned IP addresses, learned aliases included.
    pub ips: Vec<String>,
    /// Owned MAC addresses, learned aliases included.
    pub macs: Vec<String>,
    /// Owned Bluetooth addresses; listen-only ones are prefixed with `!`.
    pub bluetooth: Vec<String>,
}

/// Outcome of the most recent round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RoundSummary {
    /// Round id, as logged in the `round` span.
    pub id: Uuid,
    /// When the round started.
    pub started_at: DateTime<Utc>,
    /// How long the round took, in milliseconds.
    pub duration_ms: u64,
    /// Ids of present devices.
    pub here: Vec<String>,
    /// Ids of absent devices.
    pub not_here: Vec<String>,
    /// Ids of present devices that are listed in `_whoHere`.
    pub who_here: Vec<String>,
}

/// Everything the API exposes, published after every round.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PresenceSnapshot {
    /// When this snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Current round interval in seconds.
    pub scan_interval_secs: u64,
    /// Engine-wide away default in minutes.
    pub away_default_minutes: u32,
    /// Number of present devices.
    pub count_here: usize,
    /// The last completed round.
    pub last_round: Option<RoundSummary>,
    /// All registered devices, in registration order.
    pub devices: Vec<DeviceStatus>,
    /// Unknown network sightings from the last round.
    pub unknown_network: Vec<UnknownSighting>,
    /// Unknown Bluetooth sightings from the last round.
    pub unknown_bluetooth: Vec<UnknownSighting>,
}

impl PresenceSnapshot {
    /// Look up a device by id.
    #[must_use]
    pub fn device(&self, id: &str) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.id == id)
    }
}
