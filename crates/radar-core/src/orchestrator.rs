//! One discovery round.
//!
//! A round moves through five phases:
//!
//! 1. **launch**: Bluetooth discovery, URL probes, and the address sweep
//!    followed by probes of still-unseen devices start concurrently
//! 2. **await**: every branch settles; a failing branch never aborts the others
//! 3. **aggregate**: after a short settle delay, every tracked device is
//!    evaluated once and the round summary is written
//! 4. **flush**: the unknown buckets are reported and emptied
//! 5. **reset**: per-round channel timestamps are cleared
//!
//! Branches never touch the engine. They send [`RoundEvent`]s over a channel
//! to a single consumer that owns `&mut Engine`, so correlation stays
//! single-writer even while the branches interleave.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::address::MacAddress;
use crate::collaborators::Collaborators;
use crate::correlation::Sighting;
use crate::engine::Engine;
use crate::registry::{DeviceHandle, DeviceKind};
use crate::types::RoundSummary;
use crate::unknown::{self, UnknownKind, UnknownSighting};

/// Extra time a Bluetooth pass gets beyond its window before it is cut off.
pub const BLUETOOTH_GRACE: Duration = Duration::from_secs(2);

const EVENT_BUFFER: usize = 64;

/// Named phases of a round, used as span fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Plan the round and start the branches.
    Launch,
    /// Wait for every branch to settle.
    Await,
    /// Evaluate every device and write the summary.
    Aggregate,
    /// Report and clear the unknown buckets.
    Flush,
    /// Clear per-round timestamps.
    Reset,
}

impl RoundPhase {
    /// Lower-case phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Await => "await",
            Self::Aggregate => "aggregate",
            Self::Flush => "flush",
            Self::Reset => "reset",
        }
    }

    fn span(self) -> tracing::Span {
        tracing::debug_span!("phase", phase = self.as_str())
    }
}

/// What a round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Presence summary, also kept on the engine for snapshots.
    pub summary: RoundSummary,
    /// Measured wall time of the round.
    pub duration: Duration,
    /// Unknown network entries reported.
    pub unknown_network: usize,
    /// Unknown Bluetooth entries reported.
    pub unknown_bluetooth: usize,
    /// Branches that failed or timed out.
    pub failed_branches: usize,
}

/// Messages from discovery branches to the round's consumer.
#[derive(Debug)]
enum RoundEvent {
    Sighting(Sighting),
    Reachable(DeviceHandle),
    Unseen(oneshot::Sender<Vec<(DeviceHandle, Vec<String>)>>),
}

/// Everything the branches need, captured from the engine at launch.
#[derive(Debug, Clone)]
struct ScanPlan {
    bluetooth_targets: Vec<MacAddress>,
    bluetooth_window: Duration,
    urls: Vec<(DeviceHandle, String)>,
    sweep: Option<String>,
    network: bool,
    probe_delay: Duration,
}

impl ScanPlan {
    fn for_engine(engine: &Engine) -> Self {
        let interval = engine.scan_interval();
        let ratio = engine.scan.bluetooth_window_ratio;
        Self {
            bluetooth_targets: engine.registry.active_bluetooth_targets(),
            bluetooth_window: Duration::try_from_secs_f64(interval.as_secs_f64() * ratio)
                .unwrap_or(interval),
            urls: engine.url_targets(),
            sweep: engine.scan.sweep().map(str::to_string),
            network: engine
                .registry
                .iter()
                .any(|(_, r)| *r.kind() == DeviceKind::Ip),
            probe_delay: engine.scan.probe_delay(),
        }
    }
}

/// Run one full round against `engine`.
pub async fn run_round(engine: &mut Engine) -> RoundReport {
    let id = Uuid::now_v7();
    let span = tracing::info_span!("round", round = %id);
    execute(engine, id).instrument(span).await
}

async fn execute(engine: &mut Engine, id: Uuid) -> RoundReport {
    let started = Instant::now();
    let started_at = engine.now();

    let plan = {
        let _phase = RoundPhase::Launch.span().entered();
        let plan = ScanPlan::for_engine(engine);
        tracing::debug!(
            bluetooth_targets = plan.bluetooth_targets.len(),
            urls = plan.urls.len(),
            sweep = plan.sweep.is_some(),
            "Launching discovery"
        );
        plan
    };

    let failed_branches = discover(engine, plan)
        .instrument(RoundPhase::Await.span())
        .await;

    tokio::time::sleep(engine.scan.settle_delay()).await;
    let (here, not_here, who_here) = aggregate(engine)
        .instrument(RoundPhase::Aggregate.span())
        .await;

    let (unknown_network, unknown_bluetooth) = flush_unknown(engine)
        .instrument(RoundPhase::Flush.span())
        .await;

    {
        let _phase = RoundPhase::Reset.span().entered();
        reset(engine);
    }

    let duration = started.elapsed();
    let summary = summary(id, started_at, duration, here, not_here, who_here);
    tracing::info!(
        here = summary.here.len(),
        not_here = summary.not_here.len(),
        unknown_network,
        unknown_bluetooth,
        failed_branches,
        duration_ms = summary.duration_ms,
        "Round complete"
    );
    engine.last_round = Some(summary.clone());

    RoundReport {
        summary,
        duration,
        unknown_network,
        unknown_bluetooth,
        failed_branches,
    }
}

fn summary(
    id: Uuid,
    started_at: DateTime<Utc>,
    duration: Duration,
    here: Vec<String>,
    not_here: Vec<String>,
    who_here: Vec<String>,
) -> RoundSummary {
    RoundSummary {
        id,
        started_at,
        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        here,
        not_here,
        who_here,
    }
}

/// Run the three branches against a consumer that feeds the engine.
/// Returns the number of failed branches.
async fn discover(engine: &mut Engine, plan: ScanPlan) -> usize {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let collaborators = engine.collaborators.clone();

    let branches = async move {
        let results = tokio::join!(
            bluetooth_branch(&collaborators, &plan, tx.clone()),
            url_branch(&collaborators, &plan, tx.clone()),
            network_branch(&collaborators, &plan, tx.clone()),
        );
        drop(tx);
        [results.0, results.1, results.2]
            .into_iter()
            .filter(|ok| !ok)
            .count()
    };

    let consume = async {
        while let Some(event) = rx.recv().await {
            match event {
                RoundEvent::Sighting(sighting) => {
                    engine.observe(sighting).await;
                }
                RoundEvent::Reachable(handle) => engine.mark_reachable(handle).await,
                RoundEvent::Unseen(reply) => {
                    // The branch may have given up waiting; nothing to do then.
                    let _ = reply.send(engine.unseen_probe_targets());
                }
            }
        }
    };

    let (failed, ()) = tokio::join!(branches, consume);
    failed
}

async fn bluetooth_branch(
    collaborators: &Collaborators,
    plan: &ScanPlan,
    events: mpsc::Sender<RoundEvent>,
) -> bool {
    if plan.bluetooth_targets.is_empty() {
        return true;
    }

    let (found_tx, mut found_rx) = mpsc::channel(EVENT_BUFFER);
    let limit = plan.bluetooth_window + BLUETOOTH_GRACE;
    let discovery = tokio::time::timeout(
        limit,
        collaborators
            .bluetooth
            .discover(plan.bluetooth_window, &plan.bluetooth_targets, found_tx),
    );
    let forward = async {
        let mut found = 0usize;
        while let Some(device) = found_rx.recv().await {
            found += 1;
            if events.send(RoundEvent::Sighting(device.into())).await.is_err() {
                break;
            }
        }
        found
    };

    let (result, found) = tokio::join!(discovery, forward);
    match result {
        Ok(Ok(())) => {
            tracing::debug!(found, "Bluetooth pass finished");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, found, "Bluetooth discovery failed");
            false
        }
        Err(_) => {
            tracing::warn!(limit_ms = limit.as_millis(), found, "Bluetooth discovery timed out");
            collaborators.bluetooth.stop();
            false
        }
    }
}

async fn url_branch(
    collaborators: &Collaborators,
    plan: &ScanPlan,
    events: mpsc::Sender<RoundEvent>,
) -> bool {
    let mut ok = true;
    for (i, (handle, url)) in plan.urls.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(plan.probe_delay).await;
        }
        match collaborators.prober.probe_url(url).await {
            Ok(true) => {
                if events.send(RoundEvent::Reachable(*handle)).await.is_err() {
                    break;
                }
            }
            Ok(false) => tracing::debug!(url = %url, "URL not reachable"),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "URL probe failed");
                ok = false;
            }
        }
    }
    ok
}

async fn network_branch(
    collaborators: &Collaborators,
    plan: &ScanPlan,
    events: mpsc::Sender<RoundEvent>,
) -> bool {
    if !plan.network {
        return true;
    }

    let mut ok = true;
    if let Some(command) = plan.sweep.as_deref() {
        match collaborators.sweeper.sweep(command).await {
            Ok(entries) => {
                tracing::debug!(entries = entries.len(), "Sweep finished");
                for entry in entries {
                    if events.send(RoundEvent::Sighting(entry.into())).await.is_err() {
                        return ok;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Address sweep failed");
                ok = false;
            }
        }
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    if events.send(RoundEvent::Unseen(reply_tx)).await.is_err() {
        return ok;
    }
    let Ok(targets) = reply_rx.await else {
        return ok;
    };

    for (handle, hosts) in targets {
        for host in hosts {
            tokio::time::sleep(plan.probe_delay).await;
            match collaborators.prober.probe_host(&host).await {
                Ok(true) => {
                    if events.send(RoundEvent::Reachable(handle)).await.is_err() {
                        return ok;
                    }
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Reachability probe failed");
                    ok = false;
                }
            }
        }
    }
    ok
}

/// Evaluate every tracked device once and write the round summary.
async fn aggregate(engine: &mut Engine) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut here = Vec::new();
    let mut not_here = Vec::new();
    let mut who_here = Vec::new();

    let tracked: Vec<DeviceHandle> = engine
        .registry
        .iter()
        .filter(|(_, r)| r.is_tracked())
        .map(|(h, _)| h)
        .collect();

    for handle in tracked {
        engine.evaluate(handle).await;
        let count = engine.registry.record_mut(handle).presence.record_round();

        let record = &engine.registry[handle];
        let id = record.id().to_string();
        if record.presence().present() {
            if record.in_who_here() {
                who_here.push(id.clone());
            }
            here.push(id.clone());
        } else {
            not_here.push(id.clone());
        }
        engine.write(&format!("{id}.count"), json!(count), false).await;
    }

    engine.write("_countHere", json!(here.len()), false).await;
    engine.write("_allHere", json!(here.join(", ")), false).await;
    engine.write("_notHere", json!(not_here.join(", ")), false).await;
    engine.write("_whoHere", json!(who_here.join(", ")), false).await;

    (here, not_here, who_here)
}

/// Report both unknown buckets per the reporting toggles, then empty them.
async fn flush_unknown(engine: &mut Engine) -> (usize, usize) {
    let (network, bluetooth) = engine.unknown.take();
    let persist = engine.unknown_config.persist;

    if engine.unknown_config.log_ip {
        publish_unknown(engine, UnknownKind::Network, &network, persist).await;
    }
    if engine.unknown_config.log_bluetooth {
        publish_unknown(engine, UnknownKind::Bluetooth, &bluetooth, persist).await;
    }
    if !network.is_empty() || !bluetooth.is_empty() {
        tracing::debug!(
            network = network.len(),
            bluetooth = bluetooth.len(),
            "Unknown devices this round"
        );
    }

    let counts = (network.len(), bluetooth.len());
    engine.last_unknown = (network, bluetooth);
    counts
}

async fn publish_unknown(
    engine: &Engine,
    kind: UnknownKind,
    entries: &[UnknownSighting],
    persist: bool,
) {
    for entry in entries {
        match serde_json::to_value(entry) {
            Ok(value) => {
                engine
                    .write(&unknown::sink_key(kind, &entry.address), value, persist)
                    .await;
            }
            Err(e) => tracing::warn!(address = %entry.address, error = %e, "Could not encode unknown entry"),
        }
    }
    let keys: Vec<&str> = entries.iter().map(|e| e.address.as_str()).collect();
    engine.write(kind.sink_prefix(), json!(keys), persist).await;
}

fn reset(engine: &mut Engine) {
    for handle in engine.registry.handles().collect::<Vec<_>>() {
        engine.registry.record_mut(handle).presence.reset_round();
    }
}
