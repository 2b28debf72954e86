//! Periodic round scheduling.
//!
//! The scheduler owns the [`Engine`] for the lifetime of the process. It runs
//! one round immediately, widens the interval once if that round overran it,
//! and then runs a round on every tick. Between rounds it correlates passive
//! sightings pushed through a [`SchedulerHandle`]. After every change it
//! publishes a fresh [`PresenceSnapshot`] on a watch channel for readers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::correlation::Sighting;
use crate::engine::Engine;
use crate::orchestrator::run_round;
use crate::types::PresenceSnapshot;

/// Added to a measured round duration when the interval is widened.
pub const INTERVAL_MARGIN: Duration = Duration::from_secs(2);

const PASSIVE_BUFFER: usize = 256;

/// The widened interval to use when a round took at least `interval`.
#[must_use]
pub fn corrected_interval(interval: Duration, measured: Duration) -> Option<Duration> {
    (measured >= interval).then(|| measured + INTERVAL_MARGIN)
}

/// Cloneable access to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    passive: mpsc::Sender<Sighting>,
    snapshots: watch::Receiver<PresenceSnapshot>,
}

impl SchedulerHandle {
    /// Queue a passive sighting for correlation between rounds.
    ///
    /// Returns `false` once the scheduler has stopped.
    pub async fn report(&self, sighting: Sighting) -> bool {
        self.passive.send(sighting).await.is_ok()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.snapshots.clone()
    }
}

/// Drives rounds for one engine.
#[derive(Debug)]
pub struct Scheduler {
    engine: Engine,
    passive: mpsc::Receiver<Sighting>,
    snapshots: watch::Sender<PresenceSnapshot>,
}

impl Scheduler {
    /// Wrap `engine`, returning the scheduler and a handle to it.
    #[must_use]
    pub fn new(engine: Engine) -> (Self, SchedulerHandle) {
        let (passive_tx, passive_rx) = mpsc::channel(PASSIVE_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        (
            Self {
                engine,
                passive: passive_rx,
                snapshots: snapshot_tx,
            },
            SchedulerHandle {
                passive: passive_tx,
                snapshots: snapshot_rx,
            },
        )
    }

    /// Run until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Collaborators are told to stop before the engine is handed back.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Engine {
        tracing::info!(
            interval_secs = self.engine.scan_interval().as_secs(),
            devices = self.engine.registry().len(),
            "Scheduler starting"
        );

        let first = run_round(&mut self.engine).await;
        let configured = self.engine.scan_interval();
        if let Some(corrected) = corrected_interval(configured, first.duration) {
            tracing::warn!(
                configured_ms = configured.as_millis(),
                measured_ms = first.duration.as_millis(),
                corrected_ms = corrected.as_millis(),
                "First round overran the scan interval, widening it"
            );
            self.engine.set_scan_interval(corrected);
        }
        self.publish();

        let period = self.engine.scan_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        run_round(&mut self.engine).await;
                        self.publish();
                    }
                    Some(sighting) = self.passive.recv() => {
                        let observation = self.engine.observe(sighting).await;
                        if !observation.matched.is_empty() {
                            self.publish();
                        }
                    }
                }
            }
        }

        self.engine.collaborators().stop_all();
        tracing::info!("Scheduler stopped");
        self.engine
    }

    fn publish(&self) {
        // No receivers left only means nobody is reading; keep scanning.
        self.snapshots.send_replace(self.engine.snapshot());
    }
}
