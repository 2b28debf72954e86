//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::address::MacAddress;
use crate::clock::{Clock, ManualClock};
use crate::collaborators::{
    AddressSweeper, BluetoothDiscovery, BluetoothFound, CollaboratorError, Collaborators,
    NameResolver, ReachabilityProber, SweepEntry,
};
use crate::config::{DeviceConfig, RadarConfig};
use crate::sink::{MemoryStateSink, SinkError, StateSink};

/// 2024-05-01 08:00:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn config_with(devices: Vec<DeviceConfig>) -> RadarConfig {
    RadarConfig {
        devices,
        ..RadarConfig::default()
    }
}

fn ip(value: &str) -> IpAddr {
    value.parse().unwrap()
}

fn mac(value: &str) -> MacAddress {
    value.parse().unwrap()
}

#[derive(Default)]
pub struct FakeSweeper {
    entries: Mutex<Vec<SweepEntry>>,
    failure: Mutex<Option<CollaboratorError>>,
    delay: Mutex<Duration>,
    commands: Mutex<Vec<String>>,
}

impl FakeSweeper {
    pub fn set_entries(&self, entries: &[(&str, &str)]) {
        *self.entries.lock().unwrap() = entries
            .iter()
            .map(|(i, m)| SweepEntry {
                ip: ip(i),
                mac: mac(m),
                hostname: None,
                vendor: None,
            })
            .collect();
    }

    pub fn fail_with(&self, error: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

impl AddressSweeper for FakeSweeper {
    fn sweep<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SweepEntry>, CollaboratorError>> {
        Box::pin(async move {
            self.commands.lock().unwrap().push(command.to_string());
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(self.entries.lock().unwrap().clone())
        })
    }
}

#[derive(Default)]
pub struct FakeProber {
    reachable: Mutex<HashSet<String>>,
    neighbors: Mutex<HashMap<IpAddr, MacAddress>>,
    probed: Mutex<Vec<String>>,
}

impl FakeProber {
    /// Make a host or URL answer probes.
    pub fn add_reachable(&self, target: &str) {
        self.reachable.lock().unwrap().insert(target.to_string());
    }

    pub fn add_neighbor(&self, ip_addr: &str, mac_addr: &str) {
        self.neighbors
            .lock()
            .unwrap()
            .insert(ip(ip_addr), mac(mac_addr));
    }

    /// Hosts probed so far, URLs excluded.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    pub fn clear_probed(&self) {
        self.probed.lock().unwrap().clear();
    }
}

impl ReachabilityProber for FakeProber {
    fn probe_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>> {
        Box::pin(async move {
            self.probed.lock().unwrap().push(host.to_string());
            Ok(self.reachable.lock().unwrap().contains(host))
        })
    }

    fn probe_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>> {
        Box::pin(async move { Ok(self.reachable.lock().unwrap().contains(url)) })
    }

    fn neighbor_mac(&self, ip: IpAddr) -> BoxFuture<'_, Option<MacAddress>> {
        Box::pin(async move { self.neighbors.lock().unwrap().get(&ip).copied() })
    }
}

#[derive(Default)]
pub struct FakeResolver {
    forward: Mutex<HashMap<String, Vec<IpAddr>>>,
    reverse: Mutex<HashMap<IpAddr, Vec<String>>>,
    reverse_delay: Mutex<Duration>,
}

impl FakeResolver {
    pub fn add_forward(&self, host: &str, ips: &[&str]) {
        self.forward
            .lock()
            .unwrap()
            .insert(host.to_string(), ips.iter().map(|i| ip(i)).collect());
    }

    pub fn add_reverse(&self, ip_addr: &str, names: &[&str]) {
        self.reverse.lock().unwrap().insert(
            ip(ip_addr),
            names.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn set_reverse_delay(&self, delay: Duration) {
        *self.reverse_delay.lock().unwrap() = delay;
    }
}

impl NameResolver for FakeResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> BoxFuture<'a, Result<Vec<IpAddr>, CollaboratorError>> {
        Box::pin(async move {
            Ok(self
                .forward
                .lock()
                .unwrap()
                .get(host)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn reverse(&self, ip: IpAddr) -> BoxFuture<'_, Result<Vec<String>, CollaboratorError>> {
        Box::pin(async move {
            let delay = *self.reverse_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .reverse
                .lock()
                .unwrap()
                .get(&ip)
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[derive(Default)]
pub struct FakeBluetooth {
    found: Mutex<Vec<BluetoothFound>>,
    hang: AtomicBool,
    stopped: AtomicBool,
    windows: Mutex<Vec<Duration>>,
}

impl FakeBluetooth {
    pub fn set_found(&self, found: &[(&str, i16)]) {
        *self.found.lock().unwrap() = found
            .iter()
            .map(|(address, rssi)| BluetoothFound {
                address: mac(address),
                vendor: None,
                rssi: Some(*rssi),
                name: None,
            })
            .collect();
    }

    /// Never finish a pass on its own.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn windows(&self) -> Vec<Duration> {
        self.windows.lock().unwrap().clone()
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl BluetoothDiscovery for FakeBluetooth {
    fn discover<'a>(
        &'a self,
        window: Duration,
        _targets: &'a [MacAddress],
        found: mpsc::Sender<BluetoothFound>,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.windows.lock().unwrap().push(window);
            let devices = self.found.lock().unwrap().clone();
            for device in devices {
                if found.send(device).await.is_err() {
                    return Ok(());
                }
            }
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// A sink that rejects every write.
pub struct FailingSink;

impl StateSink for FailingSink {
    fn write<'a>(
        &'a self,
        key: &'a str,
        _value: Value,
        _persist: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            Err(SinkError::Write {
                key: key.to_string(),
                reason: "sink offline".into(),
            })
        })
    }

    fn read<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<Value>, SinkError>> {
        Box::pin(async { Ok(None) })
    }
}

pub struct Fakes {
    pub sweeper: Arc<FakeSweeper>,
    pub prober: Arc<FakeProber>,
    pub resolver: Arc<FakeResolver>,
    pub bluetooth: Arc<FakeBluetooth>,
    pub sink: Arc<MemoryStateSink>,
    pub clock: ManualClock,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            sweeper: Arc::default(),
            prober: Arc::default(),
            resolver: Arc::default(),
            bluetooth: Arc::default(),
            sink: Arc::new(MemoryStateSink::new()),
            clock: ManualClock::new(t0()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            sweeper: self.sweeper.clone(),
            prober: self.prober.clone(),
            resolver: self.resolver.clone(),
            bluetooth: self.bluetooth.clone(),
            sink: self.sink.clone(),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }
}
