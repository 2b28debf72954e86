//! The engine: sole owner of all mutable presence state.
//!
//! The registry, the unknown buckets, and the per-device presence state are
//! fields of [`Engine`] and are only touched through `&mut Engine`. The round
//! orchestrator and the scheduler borrow it in turn; nothing else holds it,
//! so no locks are needed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::collaborators::Collaborators;
use crate::config::{RadarConfig, ScanConfig, UnknownConfig};
use crate::error::Result;
use crate::presence::{format_channels, AwayPolicy, PresenceChange, SECS_PER_MINUTE};
use crate::registry::{DeviceHandle, DeviceKind, Registry, RegistryError};
use crate::types::{DeviceStatus, PresenceSnapshot, RoundSummary};
use crate::unknown::{KnownAddressAllowlist, UnknownSighting, UnknownSightings};

/// The presence engine.
pub struct Engine {
    pub(crate) registry: Registry,
    pub(crate) unknown: UnknownSightings,
    pub(crate) allowlist: KnownAddressAllowlist,
    pub(crate) scan: ScanConfig,
    pub(crate) unknown_config: UnknownConfig,
    away: AwayPolicy,
    scan_interval: Duration,
    pub(crate) collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    pub(crate) last_round: Option<RoundSummary>,
    pub(crate) last_unknown: (Vec<UnknownSighting>, Vec<UnknownSighting>),
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("devices", &self.registry.len())
            .field("scan_interval", &self.scan_interval)
            .field("away_default_minutes", &self.away.default_minutes())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the registry from `config` and wrap it in an engine.
    ///
    /// Returns the per-entry registration issues alongside the engine.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RadarError::NoUsableDevices`] if no configured device
    /// can be scanned for.
    pub async fn bootstrap(
        config: &RadarConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, Vec<RegistryError>)> {
        let (registry, issues) =
            Registry::build(&config.devices, &collaborators, config.scan.learn_macs).await?;
        Ok((
            Self::from_registry(registry, config, collaborators, clock),
            issues,
        ))
    }

    /// Wrap an already-built registry.
    #[must_use]
    pub fn from_registry(
        registry: Registry,
        config: &RadarConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scan_interval = config.scan.interval();
        Self {
            registry,
            unknown: UnknownSightings::default(),
            allowlist: KnownAddressAllowlist::new(config.allowlist.iter().map(String::as_str)),
            scan: config.scan.clone(),
            unknown_config: config.unknown.clone(),
            away: AwayPolicy::new(config.scan.away_delay_minutes(), scan_interval),
            scan_interval,
            collaborators,
            clock,
            last_round: None,
            last_unknown: (Vec::new(), Vec::new()),
        }
    }

    /// The device registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Unknown sightings collected so far this round.
    #[must_use]
    pub const fn unknown(&self) -> &UnknownSightings {
        &self.unknown
    }

    /// The collaborators this engine talks to.
    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Current round interval.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Engine-wide away policy.
    #[must_use]
    pub const fn away_policy(&self) -> &AwayPolicy {
        &self.away
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Change the round interval and re-clamp the away default to it.
    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = interval;
        self.away.recompute(interval);
        tracing::info!(
            interval_secs = interval.as_secs_f64(),
            away_default_minutes = self.away.default_minutes(),
            "Scan interval changed"
        );
    }

    /// Away threshold in effect for a device.
    #[must_use]
    pub fn threshold_for(&self, handle: DeviceHandle) -> Duration {
        self.away.threshold(self.registry[handle].away_minutes())
    }

    /// Recompute presence for one device and publish any change.
    ///
    /// Untracked devices are ignored.
    pub async fn evaluate(&mut self, handle: DeviceHandle) -> Option<PresenceChange> {
        if !self.registry[handle].is_tracked() {
            return None;
        }
        let now = self.now();
        let threshold = self.threshold_for(handle);
        let change = self
            .registry
            .record_mut(handle)
            .presence
            .evaluate(now, threshold)?;

        let record = &self.registry[handle];
        if change.flipped {
            tracing::info!(
                device = %record.name(),
                present = change.present,
                last_here = %change.last_here,
                "Presence changed"
            );
        } else {
            tracing::trace!(device = %record.name(), last_here = %change.last_here, "Last seen advanced");
        }
        self.publish_change(handle, &change).await;
        Some(change)
    }

    async fn publish_change(&self, handle: DeviceHandle, change: &PresenceChange) {
        let id = self.registry[handle].id().to_string();
        self.write(&id, json!(change.present), true).await;
        self.write(
            &format!("{id}.lasthere"),
            json!(change.last_here.to_rfc3339_opts(SecondsFormat::Secs, true)),
            true,
        )
        .await;
        self.write(
            &format!("{id}.here"),
            json!(format_channels(&change.channels)),
            false,
        )
        .await;
    }

    /// Write one attribute to the state sink. Failures are logged and
    /// reported as `false`.
    pub(crate) async fn write(&self, key: &str, value: Value, persist: bool) -> bool {
        match self.collaborators.sink.write(key, value, persist).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "State write failed");
                false
            }
        }
    }

    /// Mark a device seen on the IP channel by a reachability probe.
    pub async fn mark_reachable(&mut self, handle: DeviceHandle) {
        let now = self.now();
        if self.registry.record_mut(handle).presence.mark_ip(now) {
            tracing::debug!(device = %self.registry[handle].name(), "Reachable");
            self.evaluate(handle).await;
        }
    }

    /// URL-kind targets to probe this round.
    #[must_use]
    pub fn url_targets(&self) -> Vec<(DeviceHandle, String)> {
        self.registry
            .iter()
            .filter_map(|(h, r)| match r.kind() {
                DeviceKind::Url { url } => Some((h, url.clone())),
                _ => None,
            })
            .collect()
    }

    /// IP-kind devices not yet seen this round that have something to probe.
    #[must_use]
    pub fn unseen_probe_targets(&self) -> Vec<(DeviceHandle, Vec<String>)> {
        self.registry
            .iter()
            .filter(|(_, r)| *r.kind() == DeviceKind::Ip && !r.presence().seen_this_round())
            .map(|(h, r)| (h, r.probe_hosts()))
            .filter(|(_, hosts)| !hosts.is_empty())
            .collect()
    }

    /// Read-only view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        let devices: Vec<DeviceStatus> = self
            .registry
            .iter()
            .map(|(h, r)| {
                let presence = r.presence();
                DeviceStatus {
                    id: r.id().to_string(),
                    name: r.name().to_string(),
                    kind: r.kind().label().to_string(),
                    tracked: r.is_tracked(),
                    present: presence.present(),
                    last_here: presence.last_here(),
                    here: format_channels(&presence.here_channels()),
                    present_since_count: presence.present_since_count(),
                    away_minutes: self.threshold_for(h).as_secs() / SECS_PER_MINUTE,
                    ips: r.ips().iter().map(ToString::to_string).collect(),
                    macs: r.macs().iter().map(ToString::to_string).collect(),
                    bluetooth: r
                        .bluetooth()
                        .iter()
                        .map(|t| {
                            if t.listen_only {
                                format!("!{}", t.address)
                            } else {
                                t.address.to_string()
                            }
                        })
                        .collect(),
                }
            })
            .collect();

        PresenceSnapshot {
            generated_at: self.now(),
            scan_interval_secs: self.scan_interval.as_secs(),
            away_default_minutes: self.away.default_minutes(),
            count_here: devices.iter().filter(|d| d.tracked && d.present).count(),
            last_round: self.last_round.clone(),
            devices,
            unknown_network: self.last_unknown.0.clone(),
            unknown_bluetooth: self.last_unknown.1.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::test_utils::{config_with, t0, Fakes};

    #[tokio::test]
    async fn test_bootstrap_reports_no_usable_devices() {
        let fakes = Fakes::new();
        let config = config_with(vec![DeviceConfig::named("nothing")]);
        let err = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_first_evaluation_initialises_absent() {
        let fakes = Fakes::new();
        let config = config_with(vec![DeviceConfig::named("alice").with_ip("192.168.1.10")]);
        let (mut engine, _) = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap();
        let alice = engine.registry().by_id("alice").unwrap();

        let change = engine.evaluate(alice).await.unwrap();
        assert!(!change.present);
        let threshold = chrono::Duration::from_std(engine.threshold_for(alice)).unwrap();
        assert_eq!(
            engine.registry()[alice].presence().last_here(),
            Some(t0() - threshold)
        );
        assert_eq!(
            fakes.sink.value("alice").await,
            Some(serde_json::json!(false))
        );
    }

    #[tokio::test]
    async fn test_change_writes_attributes() {
        let fakes = Fakes::new();
        let config = config_with(vec![DeviceConfig::named("alice").with_ip("192.168.1.10")]);
        let (mut engine, _) = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap();
        let alice = engine.registry().by_id("alice").unwrap();

        engine.mark_reachable(alice).await;

        assert_eq!(fakes.sink.value("alice").await, Some(json!(true)));
        assert_eq!(
            fakes.sink.value("alice.lasthere").await,
            Some(json!("2024-05-01T08:00:00Z"))
        );
        assert_eq!(fakes.sink.value("alice.here").await, Some(json!("IP")));

        let persisted: Vec<_> = fakes
            .sink
            .writes()
            .await
            .into_iter()
            .filter(|w| w.persist)
            .map(|w| w.key)
            .collect();
        assert_eq!(persisted, vec!["alice", "alice.lasthere"]);
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_stop_evaluation() {
        let fakes = Fakes::new();
        let config = config_with(vec![DeviceConfig::named("alice").with_ip("192.168.1.10")]);
        let mut collaborators = fakes.collaborators();
        collaborators.sink = Arc::new(crate::test_utils::FailingSink);
        let (mut engine, _) = Engine::bootstrap(&config, collaborators, fakes.clock())
            .await
            .unwrap();
        let alice = engine.registry().by_id("alice").unwrap();

        engine.mark_reachable(alice).await;
        assert!(engine.registry()[alice].presence().present());
    }

    #[tokio::test]
    async fn test_set_scan_interval_recomputes_away_default() {
        let fakes = Fakes::new();
        let config = config_with(vec![DeviceConfig::named("alice").with_ip("192.168.1.10")]);
        let (mut engine, _) = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap();
        assert_eq!(engine.away_policy().default_minutes(), 2);

        engine.set_scan_interval(Duration::from_secs(150));
        assert_eq!(engine.away_policy().default_minutes(), 6);
        assert!(engine.away_policy().threshold(None) > 2 * engine.scan_interval());
    }

    #[tokio::test]
    async fn test_probe_targets() {
        let fakes = Fakes::new();
        let config = config_with(vec![
            DeviceConfig::named("alice").with_ip("192.168.1.10"),
            DeviceConfig::named("nas").with_ip("http://nas.lan"),
            DeviceConfig::named("phone").with_bluetooth("11:22:33:44:55:66"),
        ]);
        let (mut engine, _) = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap();
        let alice = engine.registry().by_id("alice").unwrap();

        assert_eq!(
            engine.url_targets(),
            vec![(engine.registry().by_id("nas").unwrap(), "http://nas.lan".to_string())]
        );
        assert_eq!(
            engine.unseen_probe_targets(),
            vec![(alice, vec!["192.168.1.10".to_string()])]
        );

        engine.mark_reachable(alice).await;
        assert!(engine.unseen_probe_targets().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot() {
        let fakes = Fakes::new();
        let config = config_with(vec![
            DeviceConfig::named("alice").with_ip("192.168.1.10"),
            DeviceConfig::named("watch").with_bluetooth("!11:22:33:44:55:67"),
        ]);
        let (mut engine, _) = Engine::bootstrap(&config, fakes.collaborators(), fakes.clock())
            .await
            .unwrap();
        let alice = engine.registry().by_id("alice").unwrap();
        engine.mark_reachable(alice).await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.count_here, 1);
        assert_eq!(snapshot.scan_interval_secs, 15);
        let alice = snapshot.device("alice").unwrap();
        assert!(alice.present);
        assert_eq!(alice.here, "IP");
        assert_eq!(alice.away_minutes, 2);
        assert_eq!(
            snapshot.device("watch").unwrap().bluetooth,
            vec!["!11:22:33:44:55:67".to_string()]
        );
    }
}
