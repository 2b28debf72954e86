//! Device registry: the configured devices and their address indices.
//!
//! Every device gets one [`DeviceRecord`]. Three indices map addresses to
//! records: MAC, IP, and Bluetooth. An address belongs to at most one device;
//! the first registrant wins and later claims are rejected with a warning.
//!
//! The registry is built once at startup from [`DeviceConfig`] entries. While
//! running it only grows, by learning new IP/MAC aliases.

use std::collections::HashMap;
use std::net::IpAddr;
use std::ops::Index;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::address::{self, MacAddress};
use crate::collaborators::Collaborators;
use crate::config::DeviceConfig;
use crate::presence::PresenceState;

/// Marks a Bluetooth address as listen-only in configuration.
pub const LISTEN_ONLY_MARKER: char = '!';

/// Name prefix of network printers.
pub const PRINTER_PREFIX: &str = "HP-";

/// Name prefix of ECB peripherals.
pub const ECB_PREFIX: &str = "ECB-";

/// Reasons a device entry, or one of its addresses, was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Name missing or shorter than two characters after normalisation.
    #[error("invalid device name '{name}': must be at least 2 characters")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// Name or derived id already registered.
    #[error("duplicate device name '{name}'")]
    DuplicateName {
        /// The offending name.
        name: String,
    },

    /// A MAC entry failed to parse.
    #[error("invalid MAC address '{value}' in {device}")]
    InvalidMac {
        /// Device name.
        device: String,
        /// Raw entry.
        value: String,
    },

    /// A Bluetooth entry failed to parse.
    #[error("invalid Bluetooth address '{value}' in {device}")]
    InvalidBluetooth {
        /// Device name.
        device: String,
        /// Raw entry.
        value: String,
    },

    /// An address is already owned by another device.
    #[error("{channel} address {address} in {device} already belongs to {owner}")]
    AddressConflict {
        /// Index the conflict happened in.
        channel: &'static str,
        /// The contested address.
        address: String,
        /// Device that tried to claim it.
        device: String,
        /// Device that owns it.
        owner: String,
    },

    /// A hostname did not resolve to any address.
    #[error("could not resolve '{host}' for {device}")]
    Unresolvable {
        /// Device name.
        device: String,
        /// Hostname.
        host: String,
    },

    /// The entry has nothing to scan for.
    #[error("device {device} has neither a network nor a Bluetooth address")]
    NoTarget {
        /// Device name.
        device: String,
    },

    /// No registered device can be scanned for.
    #[error("no usable devices registered")]
    NoUsableDevices,
}

/// Opaque reference to a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(usize);

/// Kinds of peripheral recognised by name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralClass {
    /// Network printer (`HP-` prefix).
    Printer,
    /// ECB device (`ECB-` prefix).
    Ecb,
}

/// What kind of target a device is, and the fields only that kind uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Detected on the network by IP, hostname, or MAC.
    Ip,
    /// Detected over Bluetooth only.
    Bluetooth,
    /// Detected by an HTTP(S) reachability probe.
    Url {
        /// Target URL.
        url: String,
    },
    /// Registered for address ownership but not presence-tracked.
    Peripheral {
        /// Peripheral class.
        class: PeripheralClass,
        /// Configured address.
        address: String,
    },
}

impl DeviceKind {
    /// Short label for logs and the API.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Bluetooth => "bluetooth",
            Self::Url { .. } => "url",
            Self::Peripheral {
                class: PeripheralClass::Printer,
                ..
            } => "printer",
            Self::Peripheral {
                class: PeripheralClass::Ecb,
                ..
            } => "ecb",
        }
    }
}

/// A configured Bluetooth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BluetoothTarget {
    /// Device address.
    pub address: MacAddress,
    /// Indexed for correlation but never actively scanned for.
    pub listen_only: bool,
}

/// One configured physical device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    name: String,
    id: String,
    kind: DeviceKind,
    hosts: Vec<String>,
    ips: Vec<IpAddr>,
    macs: Vec<MacAddress>,
    bluetooth: Vec<BluetoothTarget>,
    away_minutes: Option<i64>,
    pub(crate) presence: PresenceState,
}

impl DeviceRecord {
    /// Normalised display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State-sink id derived from the name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device kind.
    #[must_use]
    pub const fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// Configured hostnames, resolved or not.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// IP addresses owned by this device.
    #[must_use]
    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    /// MAC addresses owned by this device.
    #[must_use]
    pub fn macs(&self) -> &[MacAddress] {
        &self.macs
    }

    /// Bluetooth addresses owned by this device.
    #[must_use]
    pub fn bluetooth(&self) -> &[BluetoothTarget] {
        &self.bluetooth
    }

    /// Per-device away override in minutes, if configured.
    #[must_use]
    pub const fn away_minutes(&self) -> Option<i64> {
        self.away_minutes
    }

    /// Current presence state.
    #[must_use]
    pub const fn presence(&self) -> &PresenceState {
        &self.presence
    }

    /// Whether presence is computed for this device.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        !matches!(self.kind, DeviceKind::Peripheral { .. })
    }

    /// Whether the device is listed in `_whoHere`. Names ending in `-` are not.
    #[must_use]
    pub fn in_who_here(&self) -> bool {
        self.name == self.id
    }

    /// Whether the device has anything the IP channel can find.
    #[must_use]
    pub fn has_network_target(&self) -> bool {
        !self.ips.is_empty()
            || !self.macs.is_empty()
            || !self.hosts.is_empty()
            || matches!(self.kind, DeviceKind::Url { .. })
    }

    /// Addresses to probe when the device was not seen yet this round:
    /// resolved IPs, else configured hostnames.
    #[must_use]
    pub fn probe_hosts(&self) -> Vec<String> {
        if self.ips.is_empty() {
            self.hosts.clone()
        } else {
            self.ips.iter().map(ToString::to_string).collect()
        }
    }
}

/// Normalise a configured device name: trim, then replace whitespace and
/// dots with `_`. Returns `None` if fewer than two characters remain.
#[must_use]
pub fn normalize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '.' { '_' } else { c })
        .collect();
    (name.chars().count() >= 2).then_some(name)
}

/// Derive the state-sink id: the name without one trailing `-`.
#[must_use]
pub fn derive_id(name: &str) -> String {
    name.strip_suffix('-').unwrap_or(name).to_string()
}

/// All registered devices plus the three address indices.
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<DeviceRecord>,
    by_mac: HashMap<MacAddress, DeviceHandle>,
    by_ip: HashMap<IpAddr, DeviceHandle>,
    by_bluetooth: HashMap<MacAddress, DeviceHandle>,
}

impl Index<DeviceHandle> for Registry {
    type Output = DeviceRecord;

    fn index(&self, handle: DeviceHandle) -> &DeviceRecord {
        &self.records[handle.0]
    }
}

impl Registry {
    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = DeviceHandle> {
        (0..self.records.len()).map(DeviceHandle)
    }

    /// Records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceHandle, &DeviceRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (DeviceHandle(i), r))
    }

    pub(crate) fn record_mut(&mut self, handle: DeviceHandle) -> &mut DeviceRecord {
        &mut self.records[handle.0]
    }

    /// Look up a device by id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<DeviceHandle> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .map(DeviceHandle)
    }

    /// Look up a device by MAC.
    #[must_use]
    pub fn by_mac(&self, mac: &MacAddress) -> Option<DeviceHandle> {
        self.by_mac.get(mac).copied()
    }

    /// Look up a device by IP.
    #[must_use]
    pub fn by_ip(&self, ip: &IpAddr) -> Option<DeviceHandle> {
        self.by_ip.get(ip).copied()
    }

    /// Look up a device by Bluetooth address.
    #[must_use]
    pub fn by_bluetooth(&self, address: &MacAddress) -> Option<DeviceHandle> {
        self.by_bluetooth.get(address).copied()
    }

    /// Index sizes: (MAC, IP, Bluetooth).
    #[must_use]
    pub fn index_sizes(&self) -> (usize, usize, usize) {
        (self.by_mac.len(), self.by_ip.len(), self.by_bluetooth.len())
    }

    /// Bluetooth addresses of tracked devices that should be actively scanned.
    #[must_use]
    pub fn active_bluetooth_targets(&self) -> Vec<MacAddress> {
        self.records
            .iter()
            .filter(|r| r.is_tracked())
            .flat_map(|r| r.bluetooth.iter())
            .filter(|t| !t.listen_only)
            .map(|t| t.address)
            .collect()
    }

    /// Whether at least one device can be found on some channel.
    #[must_use]
    pub fn has_usable_device(&self) -> bool {
        self.records
            .iter()
            .filter(|r| r.is_tracked())
            .any(|r| r.has_network_target() || !r.bluetooth.is_empty())
    }

    fn owner_name(&self, handle: DeviceHandle) -> String {
        self.records[handle.0].name.clone()
    }

    /// Claim `mac` for `handle`. Returns `Ok(true)` if newly indexed,
    /// `Ok(false)` if the device already owned it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AddressConflict`] if another device owns it.
    pub fn learn_mac(
        &mut self,
        handle: DeviceHandle,
        mac: MacAddress,
    ) -> Result<bool, RegistryError> {
        match self.by_mac.get(&mac) {
            Some(&owner) if owner == handle => Ok(false),
            Some(&owner) => Err(RegistryError::AddressConflict {
                channel: "MAC",
                address: mac.to_string(),
                device: self.owner_name(handle),
                owner: self.owner_name(owner),
            }),
            None => {
                self.by_mac.insert(mac, handle);
                self.records[handle.0].macs.push(mac);
                Ok(true)
            }
        }
    }

    /// Claim `ip` for `handle`. Same contract as [`Registry::learn_mac`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AddressConflict`] if another device owns it.
    pub fn learn_ip(&mut self, handle: DeviceHandle, ip: IpAddr) -> Result<bool, RegistryError> {
        match self.by_ip.get(&ip) {
            Some(&owner) if owner == handle => Ok(false),
            Some(&owner) => Err(RegistryError::AddressConflict {
                channel: "IP",
                address: ip.to_string(),
                device: self.owner_name(handle),
                owner: self.owner_name(owner),
            }),
            None => {
                self.by_ip.insert(ip, handle);
                self.records[handle.0].ips.push(ip);
                Ok(true)
            }
        }
    }

    fn claim_bluetooth(
        &mut self,
        handle: DeviceHandle,
        target: BluetoothTarget,
    ) -> Result<(), RegistryError> {
        match self.by_bluetooth.get(&target.address) {
            Some(&owner) if owner == handle => Ok(()),
            Some(&owner) => Err(RegistryError::AddressConflict {
                channel: "Bluetooth",
                address: target.address.to_string(),
                device: self.owner_name(handle),
                owner: self.owner_name(owner),
            }),
            None => {
                self.by_bluetooth.insert(target.address, handle);
                self.records[handle.0].bluetooth.push(target);
                Ok(())
            }
        }
    }

    /// Build the registry from configuration, in order.
    ///
    /// Per-entry problems are logged and returned alongside the registry;
    /// they never abort the build. Hostnames are resolved once here, IP
    /// devices are optionally probed to learn their MAC, and `<id>.lasthere`
    /// is restored from the state sink.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoUsableDevices`] if nothing can be scanned for.
    pub async fn build(
        configs: &[DeviceConfig],
        collaborators: &Collaborators,
        learn_macs: bool,
    ) -> Result<(Self, Vec<RegistryError>), RegistryError> {
        let mut registry = Self::default();
        let mut issues = Vec::new();

        for config in configs {
            if !config.enabled {
                tracing::info!(device = %config.name, "Skipping disabled device");
                continue;
            }
            match registry.register(config, collaborators, &mut issues).await {
                Ok(handle) => {
                    let record = &registry[handle];
                    tracing::info!(
                        device = %record.name,
                        kind = record.kind.label(),
                        ips = record.ips.len(),
                        macs = record.macs.len(),
                        bluetooth = record.bluetooth.len(),
                        "Registered device"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping device");
                    issues.push(e);
                }
            }
        }

        if learn_macs {
            registry.learn_neighbor_macs(collaborators, &mut issues).await;
        }
        registry.restore_last_here(collaborators).await;

        let (macs, ips, bts) = registry.index_sizes();
        tracing::info!(
            devices = registry.len(),
            macs,
            ips,
            bluetooth = bts,
            rejected = issues.len(),
            "Device registry built"
        );

        if !registry.has_usable_device() {
            return Err(RegistryError::NoUsableDevices);
        }
        Ok((registry, issues))
    }

    async fn register(
        &mut self,
        config: &DeviceConfig,
        collaborators: &Collaborators,
        issues: &mut Vec<RegistryError>,
    ) -> Result<DeviceHandle, RegistryError> {
        let name = normalize_name(&config.name).ok_or_else(|| RegistryError::InvalidName {
            name: config.name.clone(),
        })?;
        let id = derive_id(&name);
        if self.records.iter().any(|r| r.name == name || r.id == id) {
            return Err(RegistryError::DuplicateName { name });
        }

        let mut url = None;
        let mut literals = Vec::new();
        let mut hosts = Vec::new();
        let mut resolved = Vec::new();
        for token in config.ip.iter() {
            if token.starts_with("http") {
                url.get_or_insert_with(|| token.to_string());
            } else if let Ok(ip) = address::parse_ip(token) {
                literals.push(ip);
            } else {
                hosts.push(token.to_string());
                match collaborators.resolver.resolve(token).await {
                    Ok(ips) if !ips.is_empty() => resolved.extend(ips),
                    Ok(_) => {
                        let issue = RegistryError::Unresolvable {
                            device: name.clone(),
                            host: token.to_string(),
                        };
                        tracing::warn!(error = %issue, "Hostname did not resolve");
                        issues.push(issue);
                    }
                    Err(e) => {
                        tracing::warn!(device = %name, host = %token, error = %e, "Hostname lookup failed");
                        issues.push(RegistryError::Unresolvable {
                            device: name.clone(),
                            host: token.to_string(),
                        });
                    }
                }
            }
        }

        let mut macs = Vec::new();
        for raw in config.macs.iter() {
            match raw.parse::<MacAddress>() {
                Ok(mac) => macs.push(mac),
                Err(_) => {
                    let issue = RegistryError::InvalidMac {
                        device: name.clone(),
                        value: raw.to_string(),
                    };
                    tracing::warn!(error = %issue, "Ignoring MAC entry");
                    issues.push(issue);
                }
            }
        }

        let mut bluetooth = Vec::new();
        for raw in config.bluetooth.iter() {
            let (listen_only, value) = raw
                .strip_prefix(LISTEN_ONLY_MARKER)
                .map_or((false, raw), |rest| (true, rest));
            match value.parse::<MacAddress>() {
                Ok(address) => bluetooth.push(BluetoothTarget {
                    address,
                    listen_only,
                }),
                Err(_) => {
                    let issue = RegistryError::InvalidBluetooth {
                        device: name.clone(),
                        value: raw.to_string(),
                    };
                    tracing::warn!(error = %issue, "Ignoring Bluetooth entry");
                    issues.push(issue);
                }
            }
        }

        let first_address = config.ip.iter().next().map(str::to_string);
        let kind = match first_address {
            Some(address) if name.starts_with(PRINTER_PREFIX) => DeviceKind::Peripheral {
                class: PeripheralClass::Printer,
                address,
            },
            Some(address) if name.starts_with(ECB_PREFIX) => DeviceKind::Peripheral {
                class: PeripheralClass::Ecb,
                address,
            },
            _ => match url {
                Some(url) => DeviceKind::Url { url },
                None if !literals.is_empty()
                    || !hosts.is_empty()
                    || !macs.is_empty() =>
                {
                    DeviceKind::Ip
                }
                None if !bluetooth.is_empty() => DeviceKind::Bluetooth,
                None => return Err(RegistryError::NoTarget { device: name }),
            },
        };

        let handle = DeviceHandle(self.records.len());
        self.records.push(DeviceRecord {
            name,
            id,
            kind,
            hosts,
            ips: Vec::new(),
            macs: Vec::new(),
            bluetooth: Vec::new(),
            away_minutes: config.away_minutes,
            presence: PresenceState::default(),
        });

        for ip in literals.into_iter().chain(resolved) {
            if let Err(e) = self.learn_ip(handle, ip) {
                tracing::warn!(error = %e, "Address conflict, first owner kept");
                issues.push(e);
            }
        }
        for mac in macs {
            if let Err(e) = self.learn_mac(handle, mac) {
                tracing::warn!(error = %e, "Address conflict, first owner kept");
                issues.push(e);
            }
        }
        for target in bluetooth {
            if let Err(e) = self.claim_bluetooth(handle, target) {
                tracing::warn!(error = %e, "Address conflict, first owner kept");
                issues.push(e);
            }
        }

        Ok(handle)
    }

    async fn learn_neighbor_macs(
        &mut self,
        collaborators: &Collaborators,
        issues: &mut Vec<RegistryError>,
    ) {
        let candidates: Vec<(DeviceHandle, IpAddr)> = self
            .iter()
            .filter(|(_, r)| r.kind == DeviceKind::Ip)
            .flat_map(|(h, r)| r.ips.iter().map(move |ip| (h, *ip)))
            .collect();

        for (handle, ip) in candidates {
            if let Err(e) = collaborators.prober.probe_host(&ip.to_string()).await {
                tracing::debug!(address = %ip, error = %e, "Startup probe failed");
            }
            let Some(mac) = collaborators.prober.neighbor_mac(ip).await else {
                continue;
            };
            if mac.is_zero() {
                continue;
            }
            match self.learn_mac(handle, mac) {
                Ok(true) => {
                    tracing::info!(device = %self[handle].name, address = %ip, mac = %mac, "Learned MAC from neighbour table");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Address conflict, first owner kept");
                    issues.push(e);
                }
            }
        }
    }

    async fn restore_last_here(&mut self, collaborators: &Collaborators) {
        for handle in self.handles().collect::<Vec<_>>() {
            let key = format!("{}.lasthere", self[handle].id);
            let value = match collaborators.sink.read(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Could not read persisted state");
                    continue;
                }
            };
            let parsed = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            match parsed {
                Some(at) => {
                    self.record_mut(handle)
                        .presence
                        .restore_last_here(at.with_timezone(&Utc));
                }
                None => {
                    tracing::warn!(key = %key, value = %value, "Ignoring malformed persisted timestamp");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{t0, Fakes};
    use serde_json::json;

    fn alice() -> DeviceConfig {
        DeviceConfig::named("alice").with_ip("192.168.1.10")
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  living room.tv "), Some("living_room_tv".into()));
        assert_eq!(normalize_name("a"), None);
        assert_eq!(normalize_name("   "), None);
        assert_eq!(derive_id("guest-"), "guest");
        assert_eq!(derive_id("alice"), "alice");
    }

    #[tokio::test]
    async fn test_same_mac_first_owner_wins() {
        let fakes = Fakes::new();
        let configs = vec![
            DeviceConfig::named("alice").with_macs("aa:bb:cc:dd:ee:ff"),
            DeviceConfig::named("bob").with_macs("AA:BB:CC:DD:EE:FF"),
        ];
        let (registry, issues) = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap();

        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(registry.index_sizes().0, 1);
        assert_eq!(registry[registry.by_mac(&mac).unwrap()].name(), "alice");

        let conflicts: Vec<_> = issues
            .iter()
            .filter(|e| matches!(e, RegistryError::AddressConflict { .. }))
            .collect();
        assert_eq!(conflicts.len(), 1);
        assert!(registry[registry.by_id("bob").unwrap()].macs().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_entries_are_skipped() {
        let fakes = Fakes::new();
        let configs = vec![
            alice(),
            DeviceConfig::named("x").with_ip("10.0.0.1"),
            DeviceConfig::named("alice").with_ip("10.0.0.2"),
            DeviceConfig::named("alice-").with_ip("10.0.0.3"),
            DeviceConfig::named("nothing"),
            DeviceConfig::named("phone").with_bluetooth("11:22:33:44:55:66, zz"),
        ];
        let (registry, issues) = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(issues.contains(&RegistryError::InvalidName { name: "x".into() }));
        assert!(issues.contains(&RegistryError::DuplicateName {
            name: "alice".into()
        }));
        assert!(issues.contains(&RegistryError::DuplicateName {
            name: "alice-".into()
        }));
        assert!(issues.contains(&RegistryError::NoTarget {
            device: "nothing".into()
        }));
        assert!(issues.contains(&RegistryError::InvalidBluetooth {
            device: "phone".into(),
            value: "zz".into()
        }));
    }

    #[tokio::test]
    async fn test_disabled_devices_are_skipped() {
        let fakes = Fakes::new();
        let mut disabled = DeviceConfig::named("bob").with_ip("10.0.0.9");
        disabled.enabled = false;
        let (registry, issues) =
            Registry::build(&[alice(), disabled], &fakes.collaborators(), false)
                .await
                .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_kind_classification() {
        let fakes = Fakes::new();
        let configs = vec![
            alice(),
            DeviceConfig::named("phone").with_bluetooth("11:22:33:44:55:66"),
            DeviceConfig::named("nas").with_ip("https://nas.lan/health"),
            DeviceConfig::named("HP-Office").with_ip("192.168.1.50"),
            DeviceConfig::named("ECB-Boiler").with_ip("192.168.1.51"),
            DeviceConfig::named("tablet").with_macs("aa:bb:cc:00:00:07"),
        ];
        let (registry, _) = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap();

        let kind = |id: &str| registry[registry.by_id(id).unwrap()].kind().label();
        assert_eq!(kind("alice"), "ip");
        assert_eq!(kind("phone"), "bluetooth");
        assert_eq!(kind("nas"), "url");
        assert_eq!(kind("HP-Office"), "printer");
        assert_eq!(kind("ECB-Boiler"), "ecb");
        assert_eq!(kind("tablet"), "ip");

        let printer = &registry[registry.by_id("HP-Office").unwrap()];
        assert!(!printer.is_tracked());
        let ip: IpAddr = "192.168.1.50".parse().unwrap();
        assert!(registry.by_ip(&ip).is_some());
    }

    #[tokio::test]
    async fn test_hostnames_resolved_once() {
        let fakes = Fakes::new();
        fakes.resolver.add_forward("alice-laptop.lan", &["192.168.1.20", "fe80::20"]);
        let configs = vec![
            DeviceConfig::named("alice").with_ip("alice-laptop.lan"),
            DeviceConfig::named("ghost").with_ip("ghost.lan"),
        ];
        let (registry, issues) = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap();

        let alice = &registry[registry.by_id("alice").unwrap()];
        assert_eq!(alice.ips().len(), 2);
        assert_eq!(alice.hosts(), ["alice-laptop.lan".to_string()]);

        let ghost = &registry[registry.by_id("ghost").unwrap()];
        assert!(ghost.ips().is_empty());
        assert_eq!(ghost.probe_hosts(), vec!["ghost.lan".to_string()]);
        assert!(issues.contains(&RegistryError::Unresolvable {
            device: "ghost".into(),
            host: "ghost.lan".into()
        }));
    }

    #[tokio::test]
    async fn test_listen_only_bluetooth() {
        let fakes = Fakes::new();
        let configs = vec![DeviceConfig::named("watch")
            .with_bluetooth("11:22:33:44:55:66, !11:22:33:44:55:67")];
        let (registry, _) = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap();

        let listen: MacAddress = "11:22:33:44:55:67".parse().unwrap();
        assert!(registry.by_bluetooth(&listen).is_some());
        assert_eq!(
            registry.active_bluetooth_targets(),
            vec!["11:22:33:44:55:66".parse::<MacAddress>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_learns_mac_from_neighbor_table() {
        let fakes = Fakes::new();
        fakes
            .prober
            .add_neighbor("192.168.1.10", "aa:bb:cc:dd:ee:10");
        let (registry, _) = Registry::build(&[alice()], &fakes.collaborators(), true)
            .await
            .unwrap();

        let mac: MacAddress = "aa:bb:cc:dd:ee:10".parse().unwrap();
        assert_eq!(registry.by_mac(&mac), registry.by_id("alice"));
    }

    #[tokio::test]
    async fn test_restores_last_here() {
        let fakes = Fakes::new();
        fakes
            .sink
            .seed("alice.lasthere", json!(t0().to_rfc3339()))
            .await;
        let (registry, _) = Registry::build(&[alice()], &fakes.collaborators(), false)
            .await
            .unwrap();
        let alice = &registry[registry.by_id("alice").unwrap()];
        assert_eq!(alice.presence().last_here(), Some(t0()));
    }

    #[tokio::test]
    async fn test_nothing_usable_is_fatal() {
        let fakes = Fakes::new();
        let configs = vec![DeviceConfig::named("x"), DeviceConfig::named("nothing")];
        let err = Registry::build(&configs, &fakes.collaborators(), false)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NoUsableDevices);
    }
}
