//! Name lookups through the system resolver.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use radar_core::{CollaboratorError, NameResolver};
use tokio::process::Command;

/// `getent` exit code for "key not found".
const GETENT_NOT_FOUND: i32 = 2;

/// How long a reverse lookup may take before it is abandoned.
pub const GETENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Forward lookups via the runtime resolver, reverse lookups via `getent`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    async fn forward(host: &str) -> Result<Vec<IpAddr>, CollaboratorError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| CollaboratorError::failed("dns", format!("{host}: {e}")))?;
        let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
        ips.sort_unstable();
        ips.dedup();
        Ok(ips)
    }

    async fn backward(ip: IpAddr) -> Result<Vec<String>, CollaboratorError> {
        let ip = ip.to_string();
        let lookup = Command::new("getent")
            .args(["hosts", ip.as_str()])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(GETENT_TIMEOUT, lookup)
            .await
            .map_err(|_| CollaboratorError::Timeout {
                collaborator: "getent",
                after: GETENT_TIMEOUT,
            })?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    CollaboratorError::unavailable("getent", "'getent' is not installed")
                }
                _ => CollaboratorError::failed("getent", e.to_string()),
            })?;

        match output.status.code() {
            Some(0) => Ok(parse_getent_hosts(&String::from_utf8_lossy(&output.stdout))),
            Some(GETENT_NOT_FOUND) => Ok(Vec::new()),
            _ => Err(CollaboratorError::failed(
                "getent",
                format!("exited with {}", output.status),
            )),
        }
    }
}

impl NameResolver for SystemResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> BoxFuture<'a, Result<Vec<IpAddr>, CollaboratorError>> {
        Box::pin(Self::forward(host))
    }

    fn reverse(&self, ip: IpAddr) -> BoxFuture<'_, Result<Vec<String>, CollaboratorError>> {
        Box::pin(Self::backward(ip))
    }
}

/// Hostnames from `getent hosts` output (`<ip> <name> [aliases...]`).
#[must_use]
pub fn parse_getent_hosts(output: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in output
        .lines()
        .flat_map(|line| line.split_whitespace().skip(1))
    {
        let name = name.to_ascii_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent_hosts() {
        let names = parse_getent_hosts("192.168.1.10    Alice-Laptop.lan alice-laptop\n");
        assert_eq!(names, vec!["alice-laptop.lan", "alice-laptop"]);
    }

    #[test]
    fn test_parse_getent_dedupes() {
        let output = "192.168.1.10 nas.lan\n192.168.1.10 nas.lan nas\n";
        assert_eq!(parse_getent_hosts(output), vec!["nas.lan", "nas"]);
    }

    #[tokio::test]
    async fn test_ip_literals_resolve_to_themselves() {
        let ips = SystemResolver.resolve("192.168.1.10").await.unwrap();
        assert_eq!(ips, vec!["192.168.1.10".parse::<IpAddr>().unwrap()]);
    }
}
