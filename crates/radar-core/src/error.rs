//! Unified error types for the radar core library.
//!
//! [`RadarError`] covers every failure mode that can leave the core. Each
//! module also keeps its own narrower error type (`ConfigError`,
//! `RegistryError`, `CollaboratorError`, `SinkError`, `AddressError`) and
//! converts into this one at the boundary.
//!
//! Most runtime failures never become a `RadarError` at all: a failed sweep
//! or a rejected state write is logged and the round carries on. Only startup
//! problems and API lookups surface through this type.
//!
//! # Example
//!
//! ```rust
//! use radar_core::error::{RadarError, Result};
//! use std::path::PathBuf;
//!
//! fn load_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(RadarError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all radar operations.
#[derive(Debug, Error)]
pub enum RadarError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // REGISTRY ERRORS
    // =========================================================================
    /// An address string could not be classified.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No configured device has anything the engine can scan for.
    #[error(
        "No usable devices configured. Add at least one device with an IP, MAC, URL, hostname or Bluetooth address."
    )]
    NoUsableDevices,

    /// A device id was looked up but is not registered.
    #[error("Device not found: '{0}'")]
    DeviceNotFound(String),

    // =========================================================================
    // COLLABORATOR ERRORS
    // =========================================================================
    /// A discovery tool or adapter is missing on this host.
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// A discovery tool ran but failed.
    #[error("Collaborator failed: {0}")]
    CollaboratorFailed(String),

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// The state sink or configuration file could not be read or written.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for radar operations.
pub type Result<T> = std::result::Result<T, RadarError>;

impl RadarError {
    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error came from device registration or lookup.
    #[inline]
    #[must_use]
    pub const fn is_registry_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_) | Self::NoUsableDevices | Self::DeviceNotFound(_)
        )
    }

    /// Returns `true` if this error came from a discovery collaborator.
    #[inline]
    #[must_use]
    pub const fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorUnavailable(_) | Self::CollaboratorFailed(_)
        )
    }

    /// Returns `true` if this error came from the state sink.
    #[inline]
    #[must_use]
    pub const fn is_sink_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_))
    }

    /// Returns `true` if the engine cannot start or keep running after this error.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::NoUsableDevices) || self.is_config_error()
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidAddress(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) | Self::NoUsableDevices => {
                422
            }

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::CollaboratorFailed(_) => 500,

            // 503 Service Unavailable - missing tools or hardware
            Self::CollaboratorUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::NoUsableDevices => "NO_USABLE_DEVICES",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::CollaboratorUnavailable(_) => "COLLABORATOR_UNAVAILABLE",
            Self::CollaboratorFailed(_) => "COLLABORATOR_FAILED",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for RadarError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::address::AddressError> for RadarError {
    fn from(err: crate::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

impl From<crate::registry::RegistryError> for RadarError {
    fn from(err: crate::registry::RegistryError) -> Self {
        use crate::registry::RegistryError;
        match err {
            RegistryError::NoUsableDevices => Self::NoUsableDevices,
            other => Self::ConfigValidationError(other.to_string()),
        }
    }
}

impl From<crate::collaborators::CollaboratorError> for RadarError {
    fn from(err: crate::collaborators::CollaboratorError) -> Self {
        use crate::collaborators::CollaboratorError;
        match err {
            CollaboratorError::Unavailable { .. } => Self::CollaboratorUnavailable(err.to_string()),
            CollaboratorError::Failed { .. } | CollaboratorError::Timeout { .. } => {
                Self::CollaboratorFailed(err.to_string())
            }
        }
    }
}

impl From<crate::sink::SinkError> for RadarError {
    fn from(err: crate::sink::SinkError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
