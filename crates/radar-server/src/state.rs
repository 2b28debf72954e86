//! Application state shared across handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use radar_core::PresenceSnapshot;
use tokio::sync::watch;

/// Handle to the state every handler receives.
pub type SharedState = Arc<AppState>;

/// Read-only view of the running daemon.
///
/// The scheduler task owns the engine; handlers only ever see the snapshots
/// it publishes, so no lock is shared with the scan loop.
#[derive(Debug)]
pub struct AppState {
    snapshots: watch::Receiver<PresenceSnapshot>,
    started: Instant,
    config_path: PathBuf,
    bluetooth_available: bool,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        snapshots: watch::Receiver<PresenceSnapshot>,
        config_path: impl Into<PathBuf>,
        bluetooth_available: bool,
    ) -> Self {
        Self {
            snapshots,
            started: Instant::now(),
            config_path: config_path.into(),
            bluetooth_available,
        }
    }

    /// Wrap in an [`Arc`] for the router.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Path the configuration was loaded from.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Whether a Bluetooth adapter was found at startup.
    #[must_use]
    pub const fn bluetooth_available(&self) -> bool {
        self.bluetooth_available
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use radar_core::{DeviceStatus, PresenceSnapshot, RoundSummary, UnknownSighting};
    use tokio::sync::watch;

    use super::{AppState, SharedState};

    pub fn device(id: &str, present: bool) -> DeviceStatus {
        DeviceStatus {
            id: id.to_string(),
            name: id.to_string(),
            kind: "ip".to_string(),
            tracked: true,
            present,
            last_here: None,
            here: if present { "IP".into() } else { String::new() },
            present_since_count: u32::from(present),
            away_minutes: 2,
            ips: vec!["192.168.1.10".into()],
            macs: Vec::new(),
            bluetooth: Vec::new(),
        }
    }

    pub fn snapshot() -> PresenceSnapshot {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        PresenceSnapshot {
            generated_at: at,
            scan_interval_secs: 15,
            away_default_minutes: 2,
            count_here: 1,
            last_round: Some(RoundSummary {
                id: uuid::Uuid::nil(),
                started_at: at,
                duration_ms: 1200,
                here: vec!["alice".into()],
                not_here: vec!["phone".into()],
                who_here: vec!["alice".into()],
            }),
            devices: vec![device("alice", true), device("phone", false)],
            unknown_network: vec![UnknownSighting {
                address: "b8:27:eb:00:00:77".into(),
                ip: Some("192.168.1.77".parse().unwrap()),
                mac: Some("b8:27:eb:00:00:77".parse().unwrap()),
                vendor: Some("Raspberry Pi Foundation".into()),
                source: radar_core::SightingSource::Sweep,
                hostnames: Vec::new(),
                rssi: None,
                first_seen: at,
            }],
            unknown_bluetooth: Vec::new(),
        }
    }

    pub fn state() -> SharedState {
        let (_tx, rx) = watch::channel(snapshot());
        AppState::new(rx, "/etc/radar/config.toml", false).shared()
    }
}
