//! # radar-core
//!
//! Core engine for the radar presence detection system.
//!
//! This crate provides:
//! - A registry of known devices keyed by IP, MAC, and Bluetooth address
//! - Correlation of network and Bluetooth sightings against that registry
//! - A per-device presence state machine with configurable away delays
//! - Concurrent discovery rounds and a self-correcting scheduler
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`address`] - MAC/IP classification and vendor lookup
//! - [`config`] - Configuration loading, saving, and validation
//! - [`registry`] - Device records and the address indexes
//! - [`correlation`] - Matching sightings to devices, tracking unknowns
//! - [`presence`] - The presence state machine and away thresholds
//! - [`orchestrator`] - One discovery round, start to finish
//! - [`scheduler`] - Periodic rounds and passive sightings
//! - [`collaborators`] - Traits for the sweep, probes, lookups, and Bluetooth
//! - [`sink`] - Where presence attributes are published
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas
//!
//! All mutable state lives in a single [`Engine`]. Discovery branches report
//! to it over channels, so no component needs a lock.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod address;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod presence;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod types;
pub mod unknown;

#[cfg(test)]
mod test_utils;

// Re-export primary types for convenience
pub use address::{is_ipv4_or_ipv6, is_mac, normalize, vendor_for, AddressError, MacAddress};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    AddressSweeper, BluetoothDiscovery, BluetoothFound, CollaboratorError, Collaborators,
    NameResolver, ReachabilityProber, SweepEntry,
};
pub use config::{
    AddressList, ConfigError, ConfigResult, DeviceConfig, RadarConfig, ScanConfig, UnknownConfig,
    MIN_AWAY_DELAY_MINUTES, MIN_SCAN_INTERVAL_SECS,
};
pub use correlation::{Observation, Sighting, SightingSource};
pub use engine::Engine;
pub use error::{RadarError, Result};
pub use orchestrator::{run_round, RoundReport};
pub use presence::{AwayPolicy, Channel, PresenceChange, PresenceState};
pub use registry::{DeviceHandle, DeviceKind, DeviceRecord, Registry, RegistryError};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sink::{JsonFileStateSink, MemoryStateSink, SinkError, SinkWrite, StateSink};
pub use types::{DeviceStatus, HealthResponse, PresenceSnapshot, RoundSummary};
pub use unknown::{UnknownKind, UnknownSighting};
