//! Address classification and normalisation.
//!
//! Every other component validates addresses through this module before
//! indexing or comparing them:
//! - [`MacAddress`] covers both Ethernet/Wi-Fi MACs and Bluetooth device addresses
//! - [`parse_ip`] accepts IPv4 and IPv6 literals
//! - [`vendor_for`] gives a best-effort manufacturer guess from the OUI prefix

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Six hex octets separated consistently by `:` or `-`.
static MAC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(?:[0-9a-f]{2}(?::[0-9a-f]{2}){5}|[0-9a-f]{2}(?:-[0-9a-f]{2}){5})$")
        .expect("MAC address pattern is valid")
});

/// Vendor name reported for locally administered (randomised) addresses.
pub const LOCALLY_ADMINISTERED: &str = "locally administered";

/// Errors returned when parsing an address string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Not six hex octets with a consistent separator.
    #[error("invalid MAC address '{0}': expected 6 hex octets separated by ':' or '-'")]
    InvalidMac(String),

    /// Neither an IPv4 nor an IPv6 literal.
    #[error("invalid IP address '{0}'")]
    InvalidIp(String),
}

/// A MAC or Bluetooth device address stored as six bytes.
///
/// Displays in the canonical lower-case colon form (`aa:bb:cc:dd:ee:ff`), which
/// is also the form used for state keys and log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The organisationally unique identifier (first three octets).
    #[must_use]
    pub const fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Whether the address has the locally-administered bit set.
    ///
    /// Phones use such addresses for MAC randomisation, so their OUI carries
    /// no vendor information.
    #[must_use]
    pub const fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// All-zero address, as reported for incomplete neighbour entries.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !MAC_REGEX.is_match(trimmed) {
            return Err(AddressError::InvalidMac(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(trimmed.split([':', '-'])) {
            *slot =
                u8::from_str_radix(part, 16).map_err(|_| AddressError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Trim and lower-case an address string.
#[must_use]
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Returns `true` if `s` is a MAC/Bluetooth address (case-insensitive).
#[must_use]
pub fn is_mac(s: &str) -> bool {
    MAC_REGEX.is_match(s.trim())
}

/// Returns `true` if `s` is an IPv4 or IPv6 literal.
#[must_use]
pub fn is_ipv4_or_ipv6(s: &str) -> bool {
    parse_ip(s).is_ok()
}

/// Parse an IPv4 or IPv6 literal, ignoring surrounding whitespace.
///
/// # Errors
///
/// Returns [`AddressError::InvalidIp`] for anything else, including hostnames.
pub fn parse_ip(s: &str) -> Result<IpAddr, AddressError> {
    normalize(s)
        .parse()
        .map_err(|_| AddressError::InvalidIp(s.to_string()))
}

static VENDORS: Lazy<HashMap<[u8; 3], &'static str>> = Lazy::new(|| {
    [
        ([0x00, 0x03, 0x93], "Apple"),
        ([0x00, 0x1b, 0x63], "Apple"),
        ([0x28, 0xcf, 0xe9], "Apple"),
        ([0xa4, 0x83, 0xe7], "Apple"),
        ([0xf0, 0x18, 0x98], "Apple"),
        ([0x00, 0x1a, 0x11], "Google"),
        ([0x3c, 0x5a, 0xb4], "Google"),
        ([0xf4, 0xf5, 0xd8], "Google"),
        ([0x18, 0xb4, 0x30], "Nest Labs"),
        ([0x00, 0x12, 0xfb], "Samsung Electronics"),
        ([0x5c, 0x0a, 0x5b], "Samsung Electronics"),
        ([0xb8, 0x27, 0xeb], "Raspberry Pi Foundation"),
        ([0xdc, 0xa6, 0x32], "Raspberry Pi Trading"),
        ([0xe4, 0x5f, 0x01], "Raspberry Pi Trading"),
        ([0x00, 0x0c, 0x29], "VMware"),
        ([0x00, 0x50, 0x56], "VMware"),
        ([0x00, 0x15, 0x5d], "Microsoft"),
        ([0x3c, 0xd9, 0x2b], "Hewlett Packard"),
        ([0x24, 0x0a, 0xc4], "Espressif"),
        ([0x30, 0xae, 0xa4], "Espressif"),
        ([0x84, 0xf3, 0xeb], "Espressif"),
        ([0x00, 0x04, 0x0e], "AVM"),
        ([0x38, 0x10, 0xd5], "AVM"),
        ([0xc0, 0x25, 0x06], "AVM"),
        ([0x00, 0x17, 0x88], "Philips Lighting"),
        ([0x50, 0xc7, 0xbf], "TP-Link"),
        ([0xb0, 0xbe, 0x76], "TP-Link"),
    ]
    .into_iter()
    .collect()
});

/// Best-effort vendor lookup by OUI prefix.
///
/// Locally administered addresses report [`LOCALLY_ADMINISTERED`]; unknown
/// prefixes return `None`.
#[must_use]
pub fn vendor_for(mac: &MacAddress) -> Option<&'static str> {
    if mac.is_locally_administered() {
        return Some(LOCALLY_ADMINISTERED);
    }
    VENDORS.get(&mac.oui()).copied()
}
