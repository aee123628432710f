//! Core value types shared across the broker
//!
//! Package snapshots, operation requests and outcomes, and the enums used by
//! the recommendation list. All of them are plain values: a new snapshot is
//! derived whenever the platform state changes, nothing is mutated in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Snapshot of one package's platform-visible attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageState {
    pub package_name: String,
    /// Currently resolvable as an active install for the user
    pub is_installed: bool,
    /// Shipped as part of the OS image
    pub is_system_app: bool,
    /// System app whose factory version is overlaid by an update
    pub has_system_update: bool,
    /// Present but administratively disabled
    pub is_disabled: bool,
}

impl PackageState {
    /// Returns true if the factory version can be restored before removal.
    #[inline]
    pub fn can_reset_to_factory(&self) -> bool {
        self.is_system_app && self.has_system_update
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [installed: {}, system: {}, updated: {}, disabled: {}]",
            self.package_name,
            self.is_installed,
            self.is_system_app,
            self.has_system_update,
            self.is_disabled
        )
    }
}

/// Validate an Android package name (`android`, `com.example.app`, ...).
///
/// Segments are dot-separated, start with a letter and contain only ASCII
/// letters, digits and underscores. Names are spliced into broker shell
/// commands, so anything else is refused.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Kind of privileged action requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Uninstall,
    Reinstall,
}

/// One user-initiated privileged action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    package_name: String,
    kind: OperationKind,
    reset_to_factory_first: bool,
}

impl OperationRequest {
    /// Uninstall request, optionally resetting an updated system app first.
    pub fn uninstall(package_name: impl Into<String>, reset_to_factory_first: bool) -> Self {
        Self {
            package_name: package_name.into(),
            kind: OperationKind::Uninstall,
            reset_to_factory_first,
        }
    }

    /// Reinstall request for a package that is still registered as a stub.
    pub fn reinstall(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            kind: OperationKind::Reinstall,
            reset_to_factory_first: false,
        }
    }

    #[inline]
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Reset flag; always false for reinstall requests.
    #[inline]
    pub fn reset_to_factory_first(&self) -> bool {
        self.kind == OperationKind::Uninstall && self.reset_to_factory_first
    }
}

impl fmt::Display for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.package_name)?;
        if self.reset_to_factory_first() {
            write!(f, " (reset to factory first)")?;
        }
        Ok(())
    }
}

/// Result of one operation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    /// Human-readable cause, present on failure
    pub diagnostic: Option<String>,
}

impl OperationOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Availability of the external elevation broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum BrokerStatus {
    /// Broker reachable and answering
    Active,
    /// Broker installed but its service is not running
    NotActive,
    /// Broker not present on the device
    NotInstalled,
}

/// Removal recommendation from the community bloat list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RemovalRecommendation {
    Recommended,
    Advanced,
    Expert,
    Unsafe,
    System,
}

impl RemovalRecommendation {
    /// Returns a one-line description of the risk class.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Recommended => {
                "Pointless or outright negative packages, and/or apps available through Google Play."
            }
            Self::Advanced => {
                "Breaks obscure or minor functionality, or apps that are not easily reinstalled through Settings/Google Play."
            }
            Self::Expert => {
                "Breaks widespread and/or important functionality, but nothing vital to the basic operation of the OS."
            }
            Self::Unsafe => "Can break vital parts of the OS; removal risks a bootloop.",
            Self::System => "Pre-installed with the device.",
        }
    }

    /// Returns true if removal may break the device.
    #[inline]
    pub const fn is_risky(self) -> bool {
        matches!(self, Self::Expert | Self::Unsafe)
    }
}

/// Which list a bloat entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum InstallList {
    Oem,
    Carrier,
}
