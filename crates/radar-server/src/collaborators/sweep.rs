//! Address sweep through the `arp-scan` command.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use radar_core::{AddressSweeper, CollaboratorError, MacAddress, SweepEntry};
use tokio::process::Command;
use tokio::sync::Notify;

const NAME: &str = "arp-scan";

/// Upper bound on a single sweep.
pub const SWEEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs the configured sweep command line and parses its output.
#[derive(Debug, Default)]
pub struct ArpScanSweeper {
    stop: Notify,
}

impl ArpScanSweeper {
    /// A sweeper with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, command: &str) -> Result<Vec<SweepEntry>, CollaboratorError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CollaboratorError::failed(NAME, "empty command line"))?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    CollaboratorError::unavailable(NAME, format!("'{program}' is not installed"))
                }
                ErrorKind::PermissionDenied => {
                    CollaboratorError::unavailable(NAME, format!("not allowed to run '{program}'"))
                }
                _ => CollaboratorError::failed(NAME, e.to_string()),
            })?;

        let output = tokio::select! {
            output = tokio::time::timeout(SWEEP_TIMEOUT, child.wait_with_output()) => output,
            () = self.stop.notified() => return Ok(Vec::new()),
        };
        let output = output
            .map_err(|_| CollaboratorError::Timeout {
                collaborator: NAME,
                after: SWEEP_TIMEOUT,
            })?
            .map_err(|e| CollaboratorError::failed(NAME, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::failed(
                NAME,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(parse_arp_scan_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl AddressSweeper for ArpScanSweeper {
    fn sweep<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SweepEntry>, CollaboratorError>> {
        Box::pin(self.run(command))
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}

/// Parse `arp-scan` output into entries.
///
/// Result lines are tab-separated `ip`, `mac` and, without `-q`, a vendor.
/// Banner and summary lines do not start with an address and are skipped.
#[must_use]
pub fn parse_arp_scan_output(output: &str) -> Vec<SweepEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let ip: IpAddr = fields.next()?.trim().parse().ok()?;
            let mac: MacAddress = fields.next()?.trim().parse().ok()?;
            let vendor = fields
                .next()
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.starts_with("(Unknown"))
                .map(str::to_string);
            Some(SweepEntry {
                ip,
                mac,
                hostname: None,
                vendor,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "Interface: eth0, type: EN10MB, MAC: dc:a6:32:01:02:03, IPv4: 192.168.1.2
Starting arp-scan 1.10.0 with 256 hosts (https://github.com/royhills/arp-scan)
192.168.1.1\t00:11:32:aa:bb:cc\tSynology Incorporated
192.168.1.10\tAA:BB:CC:DD:EE:10
192.168.1.20\t3a:bb:cc:dd:ee:20\t(Unknown: locally administered)
192.168.1.30\tnot-a-mac

4 packets received by filter, 0 packets dropped by kernel
Ending arp-scan 1.10.0: 256 hosts scanned in 1.915 seconds (133.68 hosts/sec). 3 responded
";

    #[test]
    fn test_parse_arp_scan_output() {
        let entries = parse_arp_scan_output(OUTPUT);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].ip.to_string(), "192.168.1.1");
        assert_eq!(entries[0].vendor.as_deref(), Some("Synology Incorporated"));

        assert_eq!(entries[1].mac.to_string(), "aa:bb:cc:dd:ee:10");
        assert_eq!(entries[1].vendor, None);

        assert_eq!(entries[2].vendor, None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_arp_scan_output("").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let sweeper = ArpScanSweeper::new();
        let err = sweeper
            .sweep("radar-test-no-such-tool -lq")
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_fails() {
        let sweeper = ArpScanSweeper::new();
        let err = sweeper.sweep("   ").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Failed { .. }));
    }
}
