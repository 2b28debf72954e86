//! Reachability probes: `ping` for hosts, HTTP for URLs, and the kernel
//! neighbour table for MAC learning.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use radar_core::{CollaboratorError, MacAddress, ReachabilityProber};
use tokio::process::Command;
use tokio::sync::Notify;

/// Per-request timeout for URL probes.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds `ping` waits for its single reply.
const PING_WAIT_SECS: &str = "1";

pub(crate) const NEIGHBOR_TABLE: &str = "/proc/net/arp";

/// Probes through the host's tools.
#[derive(Debug)]
pub struct SystemProber {
    http: reqwest::Client,
    stop: Notify,
}

impl SystemProber {
    /// Build a prober with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("radar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::failed("http", e.to_string()))?;
        Ok(Self {
            http,
            stop: Notify::new(),
        })
    }

    async fn ping(&self, host: &str) -> Result<bool, CollaboratorError> {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", PING_WAIT_SECS, host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        let status = tokio::select! {
            status = status => status,
            () = self.stop.notified() => return Ok(false),
        };

        match status {
            Ok(status) => {
                tracing::trace!(host, code = ?status.code(), "ping finished");
                Ok(status.success())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CollaboratorError::unavailable(
                "ping",
                "'ping' is not installed",
            )),
            Err(e) => Err(CollaboratorError::failed("ping", e.to_string())),
        }
    }

    async fn get(&self, url: &str) -> Result<bool, CollaboratorError> {
        let response = tokio::select! {
            response = self.http.get(url).send() => response,
            () = self.stop.notified() => return Ok(false),
        };
        match response {
            Ok(response) => {
                let status = response.status();
                tracing::trace!(url, %status, "URL answered");
                Ok(status.is_success() || status.is_redirection())
            }
            Err(e) if e.is_builder() => Err(CollaboratorError::failed("http", e.to_string())),
            Err(e) => {
                tracing::trace!(url, error = %e, "URL did not answer");
                Ok(false)
            }
        }
    }
}

impl ReachabilityProber for SystemProber {
    fn probe_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>> {
        Box::pin(self.ping(host))
    }

    fn probe_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, CollaboratorError>> {
        Box::pin(self.get(url))
    }

    fn neighbor_mac(&self, ip: IpAddr) -> BoxFuture<'_, Option<MacAddress>> {
        Box::pin(async move {
            let table = tokio::fs::read_to_string(NEIGHBOR_TABLE).await.ok()?;
            parse_proc_arp(&table)
                .into_iter()
                .find_map(|(entry_ip, mac)| (entry_ip == ip).then_some(mac))
        })
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}

/// Parse the kernel's `/proc/net/arp` table.
///
/// Incomplete entries (flags `0x0`) and all-zero hardware addresses are
/// skipped.
#[must_use]
pub fn parse_proc_arp(table: &str) -> Vec<(IpAddr, MacAddress)> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (ip, flags, mac) = (fields.first()?, fields.get(2)?, fields.get(3)?);
            if *flags == "0x0" {
                return None;
            }
            let mac: MacAddress = mac.parse().ok()?;
            if mac.is_zero() {
                return None;
            }
            Some((ip.parse().ok()?, mac))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         00:11:32:aa:bb:cc     *        eth0
192.168.1.10     0x1         0x2         aa:bb:cc:dd:ee:10     *        eth0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.60     0x1         0x2         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn test_parse_proc_arp() {
        let entries = parse_proc_arp(TABLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0.to_string(), "192.168.1.10");
        assert_eq!(entries[1].1.to_string(), "aa:bb:cc:dd:ee:10");
    }

    #[test]
    fn test_parse_proc_arp_header_only() {
        assert!(parse_proc_arp(TABLE.lines().next().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_url_is_an_error() {
        let prober = SystemProber::new().unwrap();
        let result = prober.probe_url("not a url").await;
        assert!(result.is_err());
    }
}
