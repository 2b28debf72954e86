//! Application configuration management.
//!
//! Handles loading, saving, and validating radar configuration including:
//! - Scan pacing (round interval, away delay, Bluetooth window)
//! - The address sweep command line
//! - Unknown-device reporting toggles
//! - The allowlist of expected-but-untracked addresses
//! - The list of tracked devices
//!
//! Files are TOML. Loading goes through the `config` crate so any value can be
//! overridden from the environment, e.g. `RADAR__SCAN__INTERVAL_SECS=30`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::address;

/// Shortest round interval the engine will run with.
pub const MIN_SCAN_INTERVAL_SECS: u64 = 15;

/// Smallest engine-wide away delay, in minutes.
pub const MIN_AWAY_DELAY_MINUTES: u32 = 2;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RADAR";

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration sources could not be merged or deserialised.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialised back to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Round pacing and discovery settings.
    pub scan: ScanConfig,

    /// Reporting of sightings that match no configured device.
    pub unknown: UnknownConfig,

    /// Addresses that are expected on the network but not tracked.
    pub allowlist: Vec<String>,

    /// Devices to track, in registration order.
    pub devices: Vec<DeviceConfig>,
}

/// Round pacing and discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Seconds between round starts. Values below 15 are raised to 15.
    pub interval_secs: u64,

    /// Engine-wide away delay in minutes. Values below 2 are raised to 2.
    pub away_delay_minutes: u32,

    /// Whether to run the address-resolution sweep each round.
    pub sweep_enabled: bool,

    /// Sweep command line, program first.
    pub sweep_command: String,

    /// Fraction of the round interval the Bluetooth pass may use.
    pub bluetooth_window_ratio: f64,

    /// Pause between consecutive reachability probes.
    pub probe_delay_ms: u64,

    /// Pause between the discovery barrier and aggregation.
    pub settle_delay_ms: u64,

    /// Probe IP devices at startup to learn their MAC from the neighbour table.
    pub learn_macs: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: MIN_SCAN_INTERVAL_SECS,
            away_delay_minutes: MIN_AWAY_DELAY_MINUTES,
            sweep_enabled: true,
            sweep_command: "arp-scan -lgq --retry=4 --timeout=400".to_string(),
            bluetooth_window_ratio: 0.85,
            probe_delay_ms: 100,
            settle_delay_ms: 500,
            learn_macs: true,
        }
    }
}

impl ScanConfig {
    /// Round interval, clamped to the minimum.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_SCAN_INTERVAL_SECS))
    }

    /// Configured away delay in minutes, clamped to the minimum.
    #[must_use]
    pub fn away_delay_minutes(&self) -> u32 {
        self.away_delay_minutes.max(MIN_AWAY_DELAY_MINUTES)
    }

    /// Pause between consecutive reachability probes.
    #[must_use]
    pub const fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    /// Pause before aggregation.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Sweep command if sweeping is enabled and a command is set.
    #[must_use]
    pub fn sweep(&self) -> Option<&str> {
        let command = self.sweep_command.trim();
        (self.sweep_enabled && !command.is_empty()).then_some(command)
    }
}

/// Reporting of sightings that match no configured device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnknownConfig {
    /// Write unknown network addresses to the state sink.
    pub log_ip: bool,

    /// Write unknown Bluetooth addresses to the state sink.
    pub log_bluetooth: bool,

    /// Ask the state sink to persist unknown-address reports.
    pub persist: bool,
}

impl Default for UnknownConfig {
    fn default() -> Self {
        Self {
            log_ip: true,
            log_bluetooth: true,
            persist: false,
        }
    }
}

/// One tracked device as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique display name (at least two characters).
    pub name: String,

    /// IP literals, hostnames, or a single `http(s)://` URL.
    #[serde(default)]
    pub ip: AddressList,

    /// MAC addresses.
    #[serde(default)]
    pub macs: AddressList,

    /// Bluetooth addresses; a leading `!` marks a listen-only address.
    #[serde(default)]
    pub bluetooth: AddressList,

    /// Per-device away delay in minutes; negative or absent uses the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_minutes: Option<i64>,

    /// Disabled devices are skipped at registration.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl DeviceConfig {
    /// A device entry with only a name; addresses are added with the builder methods.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: AddressList::default(),
            macs: AddressList::default(),
            bluetooth: AddressList::default(),
            away_minutes: None,
            enabled: true,
        }
    }

    /// Set the IP/hostname/URL list.
    #[must_use]
    pub fn with_ip(mut self, list: &str) -> Self {
        self.ip = AddressList::parse(list);
        self
    }

    /// Set the MAC list.
    #[must_use]
    pub fn with_macs(mut self, list: &str) -> Self {
        self.macs = AddressList::parse(list);
        self
    }

    /// Set the Bluetooth list.
    #[must_use]
    pub fn with_bluetooth(mut self, list: &str) -> Self {
        self.bluetooth = AddressList::parse(list);
        self
    }

    /// Set the per-device away override.
    #[must_use]
    pub const fn with_away_minutes(mut self, minutes: i64) -> Self {
        self.away_minutes = Some(minutes);
        self
    }
}

/// An address field written either as `"a, b"` or as `["a", "b"]`.
///
/// Entries are trimmed and empty entries dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList(pub Vec<String>);

impl AddressList {
    /// Split a comma-separated list.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::from_items(list.split(','))
    }

    fn from_items<'a>(items: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            items
                .into_iter()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for AddressList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AddressList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = AddressList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a comma-separated string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(AddressList::parse(v))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(AddressList::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(AddressList::from_items(items.iter().map(String::as_str)))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

impl RadarConfig {
    /// Load configuration from `path`, applying `RADAR__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let merged = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed: Self = merged.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from `path`, or fall back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed or fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::NotFound(path)) => {
                tracing::warn!(path = %path, "Configuration file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save configuration as TOML, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check engine-wide settings.
    ///
    /// Per-device problems are not configuration errors: the registry skips
    /// and logs bad entries individually.
    ///
    /// # Errors
    ///
    /// Returns every problem found, wrapped in
    /// [`ConfigError::MultipleValidationErrors`] when there is more than one.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let ratio = self.scan.bluetooth_window_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            errors.push(ConfigError::ValidationError {
                field: "scan.bluetooth_window_ratio".into(),
                message: format!("must be in (0, 1], got {ratio}"),
            });
        }

        if self.scan.sweep_enabled && self.scan.sweep_command.trim().is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "scan.sweep_command".into(),
                message: "must not be empty while sweeping is enabled".into(),
            });
        }

        for (i, entry) in self.allowlist.iter().enumerate() {
            if !address::is_mac(entry) && !address::is_ipv4_or_ipv6(entry) {
                errors.push(ConfigError::ValidationError {
                    field: format!("allowlist[{i}]"),
                    message: format!("'{entry}' is neither a MAC nor an IP address"),
                });
            }
        }

        if self.devices.is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "devices".into(),
                message: "at least one device must be configured".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Get the default configuration file path.
    ///
    /// `RADAR_CONFIG` overrides the platform default.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("RADAR_CONFIG") {
            return PathBuf::from(path);
        }
        // On Linux hosts: /etc/radar/config.toml
        // Elsewhere: the platform config dir, e.g. ~/Library/Application Support/radar
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/radar/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "radar").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
allowlist = ["AA:BB:CC:00:00:01", "192.168.1.1"]

[scan]
interval_secs = 30
away_delay_minutes = 5
sweep_command = "arp-scan -lq"

[unknown]
persist = true

[[devices]]
name = "alice"
ip = "192.168.1.10, alice-laptop.lan"
macs = ["aa:bb:cc:dd:ee:ff"]

[[devices]]
name = "phone"
bluetooth = "11:22:33:44:55:66, !11:22:33:44:55:67"
away_minutes = 10
enabled = false
"#;

    fn write_sample(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_load_sample() {
        let dir = tempfile::tempdir().unwrap();
        let config = RadarConfig::load(write_sample(&dir)).unwrap();

        assert_eq!(config.scan.interval(), Duration::from_secs(30));
        assert_eq!(config.scan.away_delay_minutes(), 5);
        assert_eq!(config.scan.sweep(), Some("arp-scan -lq"));
        assert!(config.unknown.persist);
        assert!(config.unknown.log_ip);
        assert_eq!(config.allowlist.len(), 2);
        assert_eq!(config.devices.len(), 2);

        let alice = &config.devices[0];
        assert_eq!(
            alice.ip.0,
            vec!["192.168.1.10".to_string(), "alice-laptop.lan".to_string()]
        );
        assert_eq!(alice.macs.0, vec!["aa:bb:cc:dd:ee:ff".to_string()]);
        assert!(alice.enabled);

        let phone = &config.devices[1];
        assert_eq!(phone.bluetooth.0.len(), 2);
        assert_eq!(phone.away_minutes, Some(10));
        assert!(!phone.enabled);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RadarConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));

        let fallback = RadarConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert!(fallback.devices.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RadarConfig::load(write_sample(&dir)).unwrap();
        config.scan.interval_secs = 45;

        let path = dir.path().join("nested").join("saved.toml");
        config.save(&path).unwrap();
        let reloaded = RadarConfig::load(&path).unwrap();
        assert_eq!(reloaded.scan.interval_secs, 45);
        assert_eq!(reloaded.devices[0].ip, config.devices[0].ip);
    }

    #[test]
    fn test_clamps() {
        let scan = ScanConfig {
            interval_secs: 3,
            away_delay_minutes: 0,
            ..ScanConfig::default()
        };
        assert_eq!(scan.interval(), Duration::from_secs(MIN_SCAN_INTERVAL_SECS));
        assert_eq!(scan.away_delay_minutes(), MIN_AWAY_DELAY_MINUTES);
    }

    #[test]
    fn test_sweep_disabled() {
        let scan = ScanConfig {
            sweep_enabled: false,
            ..ScanConfig::default()
        };
        assert_eq!(scan.sweep(), None);
    }

    #[test]
    fn test_validate_collects_errors() {
        let config = RadarConfig {
            scan: ScanConfig {
                bluetooth_window_ratio: 1.5,
                sweep_command: "  ".into(),
                ..ScanConfig::default()
            },
            allowlist: vec!["not-an-address".into()],
            ..RadarConfig::default()
        };
        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_single_error() {
        let config = RadarConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("devices"));
    }

    #[test]
    fn test_address_list_parse() {
        let list = AddressList::parse(" a, ,b ,c,");
        assert_eq!(list.0, vec!["a", "b", "c"]);
        assert!(AddressList::parse("").is_empty());
    }
}
