//! Sightings that match no configured device.
//!
//! Unknown sightings live for exactly one round: collected during
//! correlation, reported at round end, then cleared.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::address::{self, MacAddress};
use crate::correlation::SightingSource;

/// Which unknown bucket a sighting belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnknownKind {
    /// Unmatched network address (IP and/or MAC).
    Network,
    /// Unmatched Bluetooth address.
    Bluetooth,
}

impl UnknownKind {
    /// State-sink key prefix for this bucket.
    #[must_use]
    pub const fn sink_prefix(self) -> &'static str {
        match self {
            Self::Network => "_UnknownIPs",
            Self::Bluetooth => "_UnknownBTs",
        }
    }
}

/// The raw payload of an unmatched sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UnknownSighting {
    /// Bucket key: the MAC for network sightings that carry one, else the IP;
    /// the device address for Bluetooth sightings.
    pub address: String,
    /// IP address, if the sighting carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub ip: Option<IpAddr>,
    /// MAC address, if the sighting carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub mac: Option<MacAddress>,
    /// Vendor guess from the sighting or the OUI table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Channel that produced the sighting.
    pub source: SightingSource,
    /// Hostnames from the sighting or a reverse lookup.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Signal strength for Bluetooth sightings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    /// When the sighting was first recorded this round.
    pub first_seen: DateTime<Utc>,
}

/// The two per-round unknown buckets, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct UnknownSightings {
    network: BTreeMap<String, UnknownSighting>,
    bluetooth: BTreeMap<String, UnknownSighting>,
}

impl UnknownSightings {
    fn bucket(&self, kind: UnknownKind) -> &BTreeMap<String, UnknownSighting> {
        match kind {
            UnknownKind::Network => &self.network,
            UnknownKind::Bluetooth => &self.bluetooth,
        }
    }

    fn bucket_mut(&mut self, kind: UnknownKind) -> &mut BTreeMap<String, UnknownSighting> {
        match kind {
            UnknownKind::Network => &mut self.network,
            UnknownKind::Bluetooth => &mut self.bluetooth,
        }
    }

    /// Record a sighting. The first sighting of an address in a round wins;
    /// returns `false` for duplicates.
    pub fn record(&mut self, kind: UnknownKind, sighting: UnknownSighting) -> bool {
        let bucket = self.bucket_mut(kind);
        if bucket.contains_key(&sighting.address) {
            return false;
        }
        bucket.insert(sighting.address.clone(), sighting);
        true
    }

    /// Whether `address` is already in the bucket.
    #[must_use]
    pub fn contains(&self, kind: UnknownKind, address: &str) -> bool {
        self.bucket(kind).contains_key(address)
    }

    /// Drop an entry, e.g. after it turned out to belong to a known device.
    pub fn remove(&mut self, kind: UnknownKind, address: &str) -> Option<UnknownSighting> {
        self.bucket_mut(kind).remove(address)
    }

    /// Entries in one bucket, sorted by address.
    pub fn iter(&self, kind: UnknownKind) -> impl Iterator<Item = &UnknownSighting> {
        self.bucket(kind).values()
    }

    /// Number of entries in one bucket.
    #[must_use]
    pub fn len(&self, kind: UnknownKind) -> usize {
        self.bucket(kind).len()
    }

    /// Whether both buckets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.bluetooth.is_empty()
    }

    /// Move both buckets out, leaving them empty.
    pub fn take(&mut self) -> (Vec<UnknownSighting>, Vec<UnknownSighting>) {
        (
            std::mem::take(&mut self.network).into_values().collect(),
            std::mem::take(&mut self.bluetooth).into_values().collect(),
        )
    }
}

/// Addresses that are expected but not tracked; never reported as unknown.
#[derive(Debug, Clone, Default)]
pub struct KnownAddressAllowlist {
    macs: HashSet<MacAddress>,
    ips: HashSet<IpAddr>,
}

impl KnownAddressAllowlist {
    /// Build from raw entries. Entries that are neither MACs nor IPs are
    /// skipped with a warning.
    pub fn new<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut list = Self::default();
        for entry in entries {
            if let Ok(mac) = entry.parse::<MacAddress>() {
                list.macs.insert(mac);
            } else if let Ok(ip) = address::parse_ip(entry) {
                list.ips.insert(ip);
            } else {
                tracing::warn!(entry = %entry, "Ignoring allowlist entry that is neither a MAC nor an IP");
            }
        }
        list
    }

    /// Whether `mac` is allowlisted.
    #[must_use]
    pub fn contains_mac(&self, mac: &MacAddress) -> bool {
        self.macs.contains(mac)
    }

    /// Whether `ip` is allowlisted.
    #[must_use]
    pub fn contains_ip(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.macs.len() + self.ips.len()
    }

    /// Whether the allowlist is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State-sink key for one unknown entry: `_UnknownIPs.192_168_1_7`.
#[must_use]
pub fn sink_key(kind: UnknownKind, address: &str) -> String {
    format!("{}.{}", kind.sink_prefix(), address.replace(['.', ':'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sighting(address: &str) -> UnknownSighting {
        UnknownSighting {
            address: address.into(),
            ip: None,
            mac: None,
            vendor: None,
            source: SightingSource::Sweep,
            hostnames: Vec::new(),
            rssi: None,
            first_seen: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_first_sighting_wins() {
        let mut unknown = UnknownSightings::default();
        let mut first = sighting("aa:bb:cc:00:00:01");
        first.vendor = Some("first".into());
        assert!(unknown.record(UnknownKind::Network, first));

        let mut second = sighting("aa:bb:cc:00:00:01");
        second.vendor = Some("second".into());
        assert!(!unknown.record(UnknownKind::Network, second));

        assert_eq!(unknown.len(UnknownKind::Network), 1);
        assert_eq!(
            unknown.iter(UnknownKind::Network).next().unwrap().vendor.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_buckets_are_independent() {
        let mut unknown = UnknownSightings::default();
        unknown.record(UnknownKind::Network, sighting("aa:bb:cc:00:00:01"));
        unknown.record(UnknownKind::Bluetooth, sighting("aa:bb:cc:00:00:01"));
        assert!(unknown.contains(UnknownKind::Network, "aa:bb:cc:00:00:01"));
        assert!(unknown.contains(UnknownKind::Bluetooth, "aa:bb:cc:00:00:01"));

        let (network, bluetooth) = unknown.take();
        assert_eq!((network.len(), bluetooth.len()), (1, 1));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_allowlist() {
        let list = KnownAddressAllowlist::new(["AA:BB:CC:00:00:01", "10.0.0.1", "junk"]);
        assert_eq!(list.len(), 2);
        assert!(list.contains_mac(&"aa:bb:cc:00:00:01".parse().unwrap()));
        assert!(list.contains_ip(&"10.0.0.1".parse().unwrap()));
        assert!(!list.contains_ip(&"10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_sink_key() {
        assert_eq!(
            sink_key(UnknownKind::Network, "192.168.1.7"),
            "_UnknownIPs.192_168_1_7"
        );
        assert_eq!(
            sink_key(UnknownKind::Bluetooth, "aa:bb:cc:dd:ee:ff"),
            "_UnknownBTs.aa_bb_cc_dd_ee_ff"
        );
    }
}
