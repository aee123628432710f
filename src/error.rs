//! Error handling module for pkgbroker
//!
//! Provides the failure taxonomy of the privileged package broker using thiserror.
//! Everything below the two top-level entry points (`perform_uninstall`,
//! `perform_reinstall`) reports through these types; the entry points collapse
//! them to `false` plus a log line.

use thiserror::Error;

/// Main error type for pkgbroker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Elevation broker not installed, not running, or not authorized
    #[error("Broker unauthorized: {0}")]
    Unauthorized(String),

    /// Platform API shape mismatch (hidden method or session variant missing)
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The platform refused the call despite apparent authorization
    #[error("Privileged call rejected: {0}")]
    PrivilegedCallRejected(String),

    /// Connection to the broker died before or during the call
    #[error("Broker disconnected: {0}")]
    BrokerDisconnected(String),

    /// Package unknown to the platform package database
    #[error("Package not found: {0}")]
    NotFound(String),

    /// Another operation on the same package is still in flight
    #[error("Operation already in progress for {0}")]
    Busy(String),

    /// State errors (mutex poisoning, invalid operation transition)
    #[error("State error: {0}")]
    State(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors (spawning the broker shell, reading cached files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

// Convenient error constructors
impl BrokerError {
    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an unsupported platform error
    pub fn unsupported_platform(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }

    /// Create a rejected privileged call error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::PrivilegedCallRejected(msg.into())
    }

    /// Create a broker disconnected error
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::BrokerDisconnected(msg.into())
    }

    /// Create a package not found error
    pub fn not_found(package: impl Into<String>) -> Self {
        Self::NotFound(package.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true when the cached privileged handle must not be reused.
    pub fn invalidates_handle(&self) -> bool {
        matches!(self, Self::BrokerDisconnected(_) | Self::Io(_))
    }

    /// Short advice for the user, keyed on the failure class.
    ///
    /// Keeps "unsupported Android version" apart from "try again" so a caller
    /// can tell a permanent mismatch from a transient rejection.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "start the broker and grant access, then try again",
            Self::UnsupportedPlatform(_) => "unsupported Android version",
            Self::PrivilegedCallRejected(_) => "re-authorize the broker and try again",
            Self::BrokerDisconnected(_) | Self::Io(_) => "broker connection lost, try again",
            Self::NotFound(_) => "refresh the package list",
            Self::Busy(_) => "wait for the running operation to finish",
            Self::State(_) | Self::Config(_) | Self::Json(_) => "check the configuration",
        }
    }
}
