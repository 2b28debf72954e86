//! Correlation: turning raw sightings into device hits.
//!
//! A [`Sighting`] carries whatever one discovery channel reported: an IP, a
//! MAC, a Bluetooth address, or several of them. [`Engine::observe`] maps it
//! onto the registry, marks the matching devices seen, learns new IP/MAC
//! aliases, and files anything unmatched into the unknown buckets.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::address::{self, MacAddress};
use crate::collaborators::{BluetoothFound, SweepEntry};
use crate::engine::Engine;
use crate::presence::Channel;
use crate::registry::DeviceHandle;
use crate::unknown::{UnknownKind, UnknownSighting};

/// The channel a sighting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SightingSource {
    /// Address-resolution sweep.
    Sweep,
    /// Reverse name lookup.
    ReverseLookup,
    /// Reachability probe.
    Probe,
    /// Bluetooth discovery.
    Bluetooth,
    /// Passive network monitoring.
    Passive,
}

/// One raw observation. Addresses are unvalidated strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// IP address.
    pub ip: Option<String>,
    /// MAC address.
    pub mac: Option<String>,
    /// Bluetooth address.
    pub bluetooth: Option<String>,
    /// Hostname reported alongside the address.
    pub hostname: Option<String>,
    /// Vendor reported alongside the address.
    pub vendor: Option<String>,
    /// Signal strength, Bluetooth only.
    pub rssi: Option<i16>,
    /// Where it came from.
    pub source: SightingSource,
}

impl Sighting {
    fn empty(source: SightingSource) -> Self {
        Self {
            ip: None,
            mac: None,
            bluetooth: None,
            hostname: None,
            vendor: None,
            rssi: None,
            source,
        }
    }

    /// A sighting of an IP address alone.
    pub fn ip(source: SightingSource, ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::empty(source)
        }
    }

    /// A sighting of a MAC address alone.
    pub fn mac(source: SightingSource, mac: impl Into<String>) -> Self {
        Self {
            mac: Some(mac.into()),
            ..Self::empty(source)
        }
    }

    /// A sighting of an IP and MAC seen together.
    pub fn network(
        source: SightingSource,
        ip: impl Into<String>,
        mac: impl Into<String>,
    ) -> Self {
        Self {
            ip: Some(ip.into()),
            mac: Some(mac.into()),
            ..Self::empty(source)
        }
    }

    /// A Bluetooth sighting.
    pub fn bluetooth(address: impl Into<String>) -> Self {
        Self {
            bluetooth: Some(address.into()),
            ..Self::empty(SightingSource::Bluetooth)
        }
    }

    /// Attach a hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Attach a vendor.
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Attach a signal strength.
    #[must_use]
    pub const fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

impl From<SweepEntry> for Sighting {
    fn from(entry: SweepEntry) -> Self {
        Self {
            ip: Some(entry.ip.to_string()),
            mac: Some(entry.mac.to_string()),
            hostname: entry.hostname,
            vendor: entry.vendor,
            ..Self::empty(SightingSource::Sweep)
        }
    }
}

impl From<BluetoothFound> for Sighting {
    fn from(found: BluetoothFound) -> Self {
        Self {
            bluetooth: Some(found.address.to_string()),
            hostname: found.name,
            vendor: found.vendor,
            rssi: found.rssi,
            ..Self::empty(SightingSource::Bluetooth)
        }
    }
}

/// What [`Engine::observe`] did with a sighting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Devices matched, with the channel they were matched on.
    pub matched: Vec<(DeviceHandle, Channel)>,
    /// Buckets that gained a new unknown entry.
    pub unknown: Vec<UnknownKind>,
    /// Suppressed by the allowlist.
    pub allowlisted: bool,
    /// New aliases learned.
    pub learned: usize,
    /// Every address was malformed.
    pub dropped: bool,
}

/// Upper bound on the best-effort reverse lookup for an unknown IP.
pub const REVERSE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

impl Engine {
    /// Correlate one sighting against the registry.
    ///
    /// Malformed addresses are dropped silently. This only ever adds
    /// information: channel timestamps are never cleared here and registry
    /// entries are never removed.
    pub async fn observe(&mut self, sighting: Sighting) -> Observation {
        let ip = sighting
            .ip
            .as_deref()
            .and_then(|s| address::parse_ip(s).ok());
        let mac = sighting
            .mac
            .as_deref()
            .and_then(|s| s.parse::<MacAddress>().ok())
            .filter(|m| !m.is_zero());
        let bluetooth = sighting
            .bluetooth
            .as_deref()
            .and_then(|s| s.parse::<MacAddress>().ok());

        let mut observation = Observation::default();
        if ip.is_none() && mac.is_none() && bluetooth.is_none() {
            tracing::trace!(?sighting, "Dropping sighting without a valid address");
            observation.dropped = true;
            return observation;
        }

        if ip.is_some() || mac.is_some() {
            self.observe_network(ip, mac, &sighting, &mut observation)
                .await;
        }
        if let Some(address) = bluetooth {
            self.observe_bluetooth(address, &sighting, &mut observation)
                .await;
        }
        observation
    }

    async fn observe_network(
        &mut self,
        ip: Option<IpAddr>,
        mac: Option<MacAddress>,
        sighting: &Sighting,
        observation: &mut Observation,
    ) {
        let by_mac = mac.and_then(|m| self.registry.by_mac(&m));
        let by_ip = ip.and_then(|i| self.registry.by_ip(&i));

        if by_mac.is_none() && by_ip.is_none() {
            self.record_unknown_network(ip, mac, sighting, observation)
                .await;
            return;
        }

        // Learn whichever side of the pair is not indexed yet.
        match (by_mac, by_ip, mac, ip) {
            (Some(owner), None, _, Some(ip)) => self.learn_ip(owner, ip, observation),
            (None, Some(owner), Some(mac), _) => self.learn_mac(owner, mac, observation),
            _ => {}
        }

        let mut hits = Vec::with_capacity(2);
        hits.extend(by_mac);
        if by_ip != by_mac {
            hits.extend(by_ip);
        }
        for handle in hits {
            self.hit(handle, Channel::Ip, sighting.source, observation)
                .await;
        }

        if let Some(mac) = mac {
            self.unknown.remove(UnknownKind::Network, &mac.to_string());
        }
        if let Some(ip) = ip {
            self.unknown.remove(UnknownKind::Network, &ip.to_string());
        }
    }

    fn learn_ip(&mut self, owner: DeviceHandle, ip: IpAddr, observation: &mut Observation) {
        match self.registry.learn_ip(owner, ip) {
            Ok(true) => {
                tracing::info!(device = %self.registry[owner].name(), address = %ip, "Learned IP alias");
                observation.learned += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Alias conflict, first owner kept"),
        }
    }

    fn learn_mac(&mut self, owner: DeviceHandle, mac: MacAddress, observation: &mut Observation) {
        match self.registry.learn_mac(owner, mac) {
            Ok(true) => {
                tracing::info!(device = %self.registry[owner].name(), mac = %mac, "Learned MAC alias");
                observation.learned += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Alias conflict, first owner kept"),
        }
    }

    async fn hit(
        &mut self,
        handle: DeviceHandle,
        channel: Channel,
        source: SightingSource,
        observation: &mut Observation,
    ) {
        observation.matched.push((handle, channel));
        let now = self.now();
        let presence = &mut self.registry.record_mut(handle).presence;
        let fresh = match channel {
            Channel::Ip => presence.mark_ip(now),
            Channel::Bluetooth => presence.mark_bluetooth(now),
        };
        tracing::debug!(
            device = %self.registry[handle].name(),
            channel = %channel,
            source = ?source,
            fresh,
            "Sighting matched"
        );
        if fresh {
            self.evaluate(handle).await;
        }
    }

    async fn record_unknown_network(
        &mut self,
        ip: Option<IpAddr>,
        mac: Option<MacAddress>,
        sighting: &Sighting,
        observation: &mut Observation,
    ) {
        let allowlisted = mac.is_some_and(|m| self.allowlist.contains_mac(&m))
            || ip.is_some_and(|i| self.allowlist.contains_ip(&i));
        if allowlisted {
            observation.allowlisted = true;
            return;
        }

        let key = match (mac, ip) {
            (Some(mac), _) => mac.to_string(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => return,
        };
        if self.unknown.contains(UnknownKind::Network, &key) {
            return;
        }

        let mut hostnames: Vec<String> = sighting.hostname.iter().cloned().collect();
        if hostnames.is_empty() {
            if let Some(ip) = ip {
                let lookup = self.collaborators.resolver.reverse(ip);
                match tokio::time::timeout(REVERSE_LOOKUP_TIMEOUT, lookup).await {
                    Ok(Ok(names)) => hostnames = names,
                    Ok(Err(e)) => tracing::trace!(address = %ip, error = %e, "Reverse lookup failed"),
                    Err(_) => tracing::debug!(
                        address = %ip,
                        after = ?REVERSE_LOOKUP_TIMEOUT,
                        "Reverse lookup timed out"
                    ),
                }
            }
        }

        let vendor = sighting
            .vendor
            .clone()
            .or_else(|| mac.as_ref().and_then(address::vendor_for).map(str::to_string));
        let entry = UnknownSighting {
            address: key,
            ip,
            mac,
            vendor,
            source: sighting.source,
            hostnames,
            rssi: None,
            first_seen: self.now(),
        };
        tracing::debug!(address = %entry.address, source = ?entry.source, "Unknown network device");
        if self.unknown.record(UnknownKind::Network, entry) {
            observation.unknown.push(UnknownKind::Network);
        }
    }

    async fn observe_bluetooth(
        &mut self,
        address: MacAddress,
        sighting: &Sighting,
        observation: &mut Observation,
    ) {
        if let Some(handle) = self.registry.by_bluetooth(&address) {
            self.hit(handle, Channel::Bluetooth, sighting.source, observation)
                .await;
            return;
        }
        if self.allowlist.contains_mac(&address) {
            observation.allowlisted = true;
            return;
        }

        let entry = UnknownSighting {
            address: address.to_string(),
            ip: None,
            mac: Some(address),
            vendor: sighting
                .vendor
                .clone()
                .or_else(|| address::vendor_for(&address).map(str::to_string)),
            source: sighting.source,
            hostnames: sighting.hostname.iter().cloned().collect(),
            rssi: sighting.rssi,
            first_seen: self.now(),
        };
        if self.unknown.record(UnknownKind::Bluetooth, entry) {
            tracing::debug!(address = %address, "Unknown Bluetooth device");
            observation.unknown.push(UnknownKind::Bluetooth);
        }
    }
}
