//! Package State Inspector
//!
//! Read-only derivation of [`PackageState`] snapshots from the platform
//! package database. The flag shape for queries (raw int vs. typed flag
//! object) is picked from the version strategy table here and nowhere else.
//!
//! The one real algorithm is the uninstalled-stub diff:
//!
//! ```text
//! uninstalled = all_registered(MATCH_UNINSTALLED_PACKAGES) - installed(GET_META_DATA)
//! ```
//!
//! compared by package name.

use crate::error::{BrokerError, Result};
use crate::platform::{
    GET_META_DATA, MATCH_UNINSTALLED_PACKAGES, PackageInfoFlags, PackageRecord, PackageRegistry,
    strategy_for,
};
use crate::types::PackageState;
use std::collections::HashSet;
use std::sync::Arc;

/// Query flags for packages currently installed for the user.
pub const INSTALLED_QUERY: u32 = GET_META_DATA;
/// Query flags that also return system stubs left behind by uninstall.
pub const ALL_REGISTERED_QUERY: u32 = GET_META_DATA | MATCH_UNINSTALLED_PACKAGES;

/// Names present in `all_registered` but not in `installed`.
///
/// Order of `all_registered` is preserved; duplicates are dropped.
pub fn uninstalled_names<'a>(
    all_registered: impl IntoIterator<Item = &'a str>,
    installed: impl IntoIterator<Item = &'a str>,
) -> Vec<&'a str> {
    let installed: HashSet<&str> = installed.into_iter().collect();
    let mut seen = HashSet::new();
    all_registered
        .into_iter()
        .filter(|name| !installed.contains(name) && seen.insert(*name))
        .collect()
}

fn to_state(record: &PackageRecord, is_installed: bool) -> PackageState {
    PackageState {
        package_name: record.package_name.clone(),
        is_installed,
        is_system_app: record.is_system(),
        has_system_update: record.is_updated_system(),
        is_disabled: !record.enabled,
    }
}

/// Reads package state from a [`PackageRegistry`].
#[derive(Clone)]
pub struct PackageInspector {
    registry: Arc<dyn PackageRegistry>,
}

impl PackageInspector {
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self { registry }
    }

    fn flags(&self, bits: u32) -> Result<PackageInfoFlags> {
        let sdk = self.registry.sdk_level()?;
        let shape = strategy_for(sdk)?.query_flags;
        Ok(PackageInfoFlags::of(shape, bits))
    }

    /// Snapshot of one package.
    ///
    /// # Errors
    ///
    /// `NotFound` when the platform has no record of the package at all.
    /// An uninstalled system stub is *not* an error: it is returned with
    /// `is_installed == false`.
    pub fn inspect(&self, package_name: &str) -> Result<PackageState> {
        let installed = self
            .registry
            .query_package(package_name, self.flags(INSTALLED_QUERY)?)?;
        if let Some(record) = installed {
            return Ok(to_state(&record, true));
        }

        let registered = self
            .registry
            .query_package(package_name, self.flags(ALL_REGISTERED_QUERY)?)?;
        match registered {
            Some(record) => Ok(to_state(&record, false)),
            None => Err(BrokerError::not_found(package_name)),
        }
    }

    /// Same as [`inspect`](Self::inspect), but unknown packages yield `None`.
    pub fn try_inspect(&self, package_name: &str) -> Result<Option<PackageState>> {
        match self.inspect(package_name) {
            Ok(state) => Ok(Some(state)),
            Err(BrokerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True if the package is an updated system app whose factory image can be restored.
    pub fn can_reset_to_factory(&self, package_name: &str) -> bool {
        match self.try_inspect(package_name) {
            Ok(Some(state)) => state.can_reset_to_factory(),
            Ok(None) => false,
            Err(e) => {
                log::warn!("Could not check factory reset for {}: {}", package_name, e);
                false
            }
        }
    }

    /// Packages currently installed for the user.
    pub fn list_installed(&self) -> Result<Vec<PackageState>> {
        let records = self.registry.query_packages(self.flags(INSTALLED_QUERY)?)?;
        Ok(records.iter().map(|r| to_state(r, true)).collect())
    }

    /// Registered system stubs that are no longer installed.
    pub fn list_uninstalled(&self) -> Result<Vec<PackageState>> {
        let installed = self.registry.query_packages(self.flags(INSTALLED_QUERY)?)?;
        let all = self
            .registry
            .query_packages(self.flags(ALL_REGISTERED_QUERY)?)?;
        Ok(Self::diff(&all, &installed))
    }

    /// Installed packages followed by uninstalled stubs.
    pub fn list_all(&self) -> Result<Vec<PackageState>> {
        let installed = self.registry.query_packages(self.flags(INSTALLED_QUERY)?)?;
        let all = self
            .registry
            .query_packages(self.flags(ALL_REGISTERED_QUERY)?)?;

        let mut states: Vec<PackageState> = installed.iter().map(|r| to_state(r, true)).collect();
        states.extend(Self::diff(&all, &installed));
        log::debug!("Inspected {} packages", states.len());
        Ok(states)
    }

    fn diff(all: &[PackageRecord], installed: &[PackageRecord]) -> Vec<PackageState> {
        let names = uninstalled_names(
            all.iter().map(|r| r.package_name.as_str()),
            installed.iter().map(|r| r.package_name.as_str()),
        );
        let names: HashSet<&str> = names.into_iter().collect();
        let mut emitted = HashSet::new();
        all.iter()
            .filter(|r| {
                names.contains(r.package_name.as_str()) && emitted.insert(r.package_name.as_str())
            })
            .map(|r| to_state(r, false))
            .collect()
    }
}
