//! Version-keyed strategy table
//!
//! The hidden installer surface changed shape across Android releases. Instead
//! of branching at every call site, each supported API range maps to one
//! [`VersionStrategy`] row:
//!
//! ```text
//! SDK 21-22  LegacyContext  raw flags    install-existing unavailable
//! SDK 23-25  LegacyContext  raw flags    IPackageManager.installExistingPackageAsUser
//! SDK 26-28  Modern         raw flags    IPackageManager.installExistingPackageAsUser
//! SDK 29-30  Modern         raw flags    IPackageInstaller.installExistingPackage
//! SDK 31-32  Attributed     raw flags    IPackageInstaller.installExistingPackage
//! SDK 33+    Attributed     typed flags  IPackageInstaller.installExistingPackage
//! ```

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Android API level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SdkLevel(pub u32);

impl SdkLevel {
    pub const LOLLIPOP: Self = Self(21);
    pub const MARSHMALLOW: Self = Self(23);
    pub const OREO: Self = Self(26);
    pub const Q: Self = Self(29);
    pub const R: Self = Self(30);
    pub const TIRAMISU: Self = Self(33);

    /// Oldest release with a privileged uninstall path.
    pub const MINIMUM: Self = Self::LOLLIPOP;

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SdkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API {}", self.0)
    }
}

impl FromStr for SdkLevel {
    type Err = BrokerError;

    /// Parses the output of `getprop ro.build.version.sdk`.
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| BrokerError::unsupported_platform(format!("unreadable SDK level {s:?}")))
    }
}

/// Installer session constructor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionVariant {
    /// `(Context, PackageManager, IPackageInstaller, String, int)`
    LegacyContext,
    /// `(IPackageInstaller, String, int)`
    Modern,
    /// `(IPackageInstaller, String, String attributionTag, int)`
    Attributed,
}

/// How package query flags are passed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagShape {
    /// Plain `int` flags
    Raw,
    /// `PackageInfoFlags.of(long)`
    Typed,
}

/// Which hidden method restores an uninstalled system stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallExistingVariant {
    /// No privileged install-existing on this release
    Unavailable,
    /// `IPackageManager.installExistingPackageAsUser`
    PackageManagerAsUser,
    /// `IPackageInstaller.installExistingPackage`
    Installer,
}

/// Package query flags in the shape the platform expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageInfoFlags {
    Raw(i32),
    Typed(i64),
}

impl PackageInfoFlags {
    /// Assemble `flags` in the given shape.
    pub fn of(shape: FlagShape, flags: u32) -> Self {
        match shape {
            FlagShape::Raw => Self::Raw(flags as i32),
            FlagShape::Typed => Self::Typed(i64::from(flags)),
        }
    }

    /// Flag bits regardless of shape.
    pub fn bits(self) -> u32 {
        match self {
            Self::Raw(v) => v as u32,
            Self::Typed(v) => v as u32,
        }
    }

    #[inline]
    pub fn contains(self, flag: u32) -> bool {
        self.bits() & flag == flag
    }
}

/// One row of the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionStrategy {
    pub min_sdk: u32,
    /// Inclusive upper bound, `None` for the open-ended newest row
    pub max_sdk: Option<u32>,
    pub session: SessionVariant,
    pub query_flags: FlagShape,
    pub install_existing: InstallExistingVariant,
}

impl VersionStrategy {
    pub fn covers(&self, sdk: SdkLevel) -> bool {
        sdk.0 >= self.min_sdk && self.max_sdk.is_none_or(|max| sdk.0 <= max)
    }
}

const STRATEGY_TABLE: &[VersionStrategy] = &[
    VersionStrategy {
        min_sdk: 21,
        max_sdk: Some(22),
        session: SessionVariant::LegacyContext,
        query_flags: FlagShape::Raw,
        install_existing: InstallExistingVariant::Unavailable,
    },
    VersionStrategy {
        min_sdk: 23,
        max_sdk: Some(25),
        session: SessionVariant::LegacyContext,
        query_flags: FlagShape::Raw,
        install_existing: InstallExistingVariant::PackageManagerAsUser,
    },
    VersionStrategy {
        min_sdk: 26,
        max_sdk: Some(28),
        session: SessionVariant::Modern,
        query_flags: FlagShape::Raw,
        install_existing: InstallExistingVariant::PackageManagerAsUser,
    },
    VersionStrategy {
        min_sdk: 29,
        max_sdk: Some(30),
        session: SessionVariant::Modern,
        query_flags: FlagShape::Raw,
        install_existing: InstallExistingVariant::Installer,
    },
    VersionStrategy {
        min_sdk: 31,
        max_sdk: Some(32),
        session: SessionVariant::Attributed,
        query_flags: FlagShape::Raw,
        install_existing: InstallExistingVariant::Installer,
    },
    VersionStrategy {
        min_sdk: 33,
        max_sdk: None,
        session: SessionVariant::Attributed,
        query_flags: FlagShape::Typed,
        install_existing: InstallExistingVariant::Installer,
    },
];

/// Look up the strategy row for `sdk`.
///
/// # Errors
///
/// `UnsupportedPlatform` for releases older than [`SdkLevel::MINIMUM`].
pub fn strategy_for(sdk: SdkLevel) -> Result<&'static VersionStrategy> {
    STRATEGY_TABLE
        .iter()
        .find(|row| row.covers(sdk))
        .ok_or_else(|| {
            BrokerError::unsupported_platform(format!(
                "{sdk} is older than the supported minimum {}",
                SdkLevel::MINIMUM
            ))
        })
}
