//! Interfaces to the outside world.
//!
//! The engine never talks to the network, the Bluetooth stack, or the OS
//! directly. It asks these collaborators instead, which keeps the core
//! testable with in-memory fakes. Concrete system-backed implementations live
//! in the server crate.
//!
//! All traits are object-safe and return boxed futures, so collaborators can
//! be swapped at runtime behind an `Arc<dyn ...>`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::address::MacAddress;
use crate::sink::StateSink;

/// Errors raised by a collaborator.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The tool or adapter is missing on this host.
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        /// Which collaborator.
        collaborator: &'static str,
        /// Why.
        reason: String,
    },

    /// The tool ran but failed.
    #[error("{collaborator} failed: {reason}")]
    Failed {
        /// Which collaborator.
        collaborator: &'static str,
        /// Why.
        reason: String,
    },

    /// The tool did not finish in time.
    #[error("{collaborator} timed out after {after:?}")]
    Timeout {
        /// Which collaborator.
        collaborator: &'static str,
        /// How long it was given.
        after: Duration,
    },
}

impl CollaboratorError {
    /// Shorthand for [`CollaboratorError::Unavailable`].
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CollaboratorError::Failed`].
    pub fn failed(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            collaborator,
            reason: reason.into(),
        }
    }
}

/// One line of address-sweep output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepEntry {
    /// IP address that answered.
    pub ip: IpAddr,
    /// Its hardware address.
    pub mac: MacAddress,
    /// Hostname, if the tool reported one.
    pub hostname: Option<String>,
    /// Vendor string reported by the sweep tool, if any.
    pub vendor: Option<String>,
}

/// One device seen by a Bluetooth discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothFound {
    /// Device address.
    pub address: MacAddress,
    /// Manufacturer name, if advertised.
    pub vendor: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised device name.
    pub name: Option<String>,
}

/// Runs an address-resolution sweep across the local network.
pub trait AddressSweeper: Send + Sync {
    /// Run the sweep `command` once and return every responding (IP, MAC) pair.
    fn sweep<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SweepEntry>, CollaboratorError>>;

    /// Abort any sweep in flight.
    fn stop(&self) {}
}

/// Checks whether a network target answers.
pub trait ReachabilityProber: Send + Sync {
    /// Probe a hostname or IP literal.
    fn probe_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>>;

    /// Probe an `http(s)://` URL.
    fn probe_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>>;

    /// MAC address the OS neighbour table holds for `ip`, if any.
    fn neighbor_mac(&self, _ip: IpAddr) -> BoxFuture<'_, Option<MacAddress>> {
        Box::pin(async { None })
    }

    /// Abort any probe in flight.
    fn stop(&self) {}
}

/// Name lookups in both directions.
pub trait NameResolver: Send + Sync {
    /// Forward lookup: hostname to addresses.
    fn resolve<'a>(&'a self, host: &'a str)
        -> BoxFuture<'a, Result<Vec<IpAddr>, CollaboratorError>>;

    /// Reverse lookup: address to hostnames.
    fn reverse(&self, ip: IpAddr) -> BoxFuture<'_, Result<Vec<String>, CollaboratorError>>;
}

/// Runs a bounded Bluetooth discovery pass.
pub trait BluetoothDiscovery: Send + Sync {
    /// Discover for at most `window`, sending each device as it is found.
    ///
    /// `targets` are the tracked addresses; implementations may use them for
    /// directed lookups. The pass ends when the window elapses, when the
    /// receiver is dropped, or on error.
    fn discover<'a>(
        &'a self,
        window: Duration,
        targets: &'a [MacAddress],
        found: mpsc::Sender<BluetoothFound>,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>>;

    /// Abort any discovery in flight.
    fn stop(&self) {}
}

/// The full set of collaborators an engine runs with.
#[derive(Clone)]
pub struct Collaborators {
    /// Address sweep.
    pub sweeper: Arc<dyn AddressSweeper>,
    /// Reachability probes.
    pub prober: Arc<dyn ReachabilityProber>,
    /// Name lookups.
    pub resolver: Arc<dyn NameResolver>,
    /// Bluetooth discovery.
    pub bluetooth: Arc<dyn BluetoothDiscovery>,
    /// Where results are published.
    pub sink: Arc<dyn StateSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Tell every collaborator to abandon work in flight.
    pub fn stop_all(&self) {
        self.sweeper.stop();
        self.prober.stop();
        self.bluetooth.stop();
    }
}
