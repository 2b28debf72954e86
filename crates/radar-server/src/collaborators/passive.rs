//! Passive sightings from the kernel neighbour table.
//!
//! Every host that talks to this machine ends up in `/proc/net/arp`. The
//! watcher polls the table between rounds and reports each entry that
//! appeared since the previous poll to the scheduler.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use radar_core::{MacAddress, SchedulerHandle, Sighting, SightingSource};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::probe::{parse_proc_arp, NEIGHBOR_TABLE};

/// How often the neighbour table is read.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Reports new neighbour-table entries as passive sightings.
#[derive(Debug)]
pub struct NeighborWatcher {
    path: PathBuf,
    every: Duration,
    known: HashSet<(IpAddr, MacAddress)>,
}

impl Default for NeighborWatcher {
    fn default() -> Self {
        Self::new(NEIGHBOR_TABLE, WATCH_INTERVAL)
    }
}

impl NeighborWatcher {
    /// Watch the table at `path`, reading it every `every`.
    pub fn new(path: impl Into<PathBuf>, every: Duration) -> Self {
        Self {
            path: path.into(),
            every,
            known: HashSet::new(),
        }
    }

    /// Entries of `table` that were not present at the previous call, in
    /// address order.
    pub fn fresh(&mut self, table: &str) -> Vec<(IpAddr, MacAddress)> {
        let current: HashSet<_> = parse_proc_arp(table).into_iter().collect();
        let mut fresh: Vec<_> = current.difference(&self.known).copied().collect();
        fresh.sort_unstable();
        self.known = current;
        fresh
    }

    /// Read the table once and return the new entries.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the table cannot be read.
    pub async fn poll(&mut self) -> std::io::Result<Vec<(IpAddr, MacAddress)>> {
        let table = tokio::fs::read_to_string(&self.path).await?;
        Ok(self.fresh(&table))
    }

    /// Poll until `shutdown` flips or the scheduler stops.
    ///
    /// A table that cannot be read ends the watcher; rounds are unaffected.
    pub async fn run(mut self, handle: SchedulerHandle, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let fresh = match self.poll().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Neighbour table unreadable; passive sightings disabled"
                    );
                    break;
                }
            };
            for (ip, mac) in fresh {
                tracing::trace!(%ip, %mac, "Passive neighbour sighting");
                let sighting =
                    Sighting::network(SightingSource::Passive, ip.to_string(), mac.to_string());
                if !handle.report(sighting).await {
                    return;
                }
            }
        }
        tracing::debug!("Neighbour watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "IP address       HW type     Flags       HW address            Mask     Device\n";

    fn table(rows: &[(&str, &str)]) -> String {
        let mut table = HEADER.to_string();
        for (ip, mac) in rows {
            table.push_str(&format!("{ip}  0x1  0x2  {mac}  *  eth0\n"));
        }
        table
    }

    fn entry(ip: &str, mac: &str) -> (IpAddr, MacAddress) {
        (ip.parse().unwrap(), mac.parse().unwrap())
    }

    #[test]
    fn test_only_new_entries_are_fresh() {
        let mut watcher = NeighborWatcher::default();
        let first = table(&[("192.168.1.10", "aa:bb:cc:dd:ee:10")]);
        assert_eq!(
            watcher.fresh(&first),
            vec![entry("192.168.1.10", "aa:bb:cc:dd:ee:10")]
        );
        assert!(watcher.fresh(&first).is_empty());

        let second = table(&[
            ("192.168.1.10", "aa:bb:cc:dd:ee:10"),
            ("192.168.1.11", "aa:bb:cc:dd:ee:11"),
        ]);
        assert_eq!(
            watcher.fresh(&second),
            vec![entry("192.168.1.11", "aa:bb:cc:dd:ee:11")]
        );
    }

    #[test]
    fn test_entry_that_returns_is_fresh_again() {
        let mut watcher = NeighborWatcher::default();
        let present = table(&[("192.168.1.10", "aa:bb:cc:dd:ee:10")]);
        watcher.fresh(&present);
        assert!(watcher.fresh(&table(&[])).is_empty());
        assert_eq!(watcher.fresh(&present).len(), 1);
    }

    #[tokio::test]
    async fn test_poll_reads_table_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arp");
        std::fs::write(&path, table(&[("10.0.0.5", "aa:bb:cc:dd:ee:ff")])).unwrap();

        let mut watcher = NeighborWatcher::new(&path, WATCH_INTERVAL);
        assert_eq!(
            watcher.poll().await.unwrap(),
            vec![entry("10.0.0.5", "aa:bb:cc:dd:ee:ff")]
        );
        assert!(watcher.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = NeighborWatcher::new(dir.path().join("missing"), WATCH_INTERVAL);
        assert!(watcher.poll().await.is_err());
    }
}
