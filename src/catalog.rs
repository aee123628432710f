//! App catalog
//!
//! The cached list of packages as the front-end shows it: package states from
//! the inspector joined with bloat recommendations. After a successful
//! operation the owning thread flips the entry with
//! [`Catalog::change_app_status`]; a fresh [`Catalog::build`] is the
//! authoritative correction.

use crate::bloat::{BloatData, BloatMap};
use crate::types::{PackageState, RemovalRecommendation};
use serde::Serialize;
use strum::{Display, EnumString};

/// One package row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppEntry {
    pub state: PackageState,
    pub bloat: Option<BloatData>,
}

impl AppEntry {
    pub fn package_name(&self) -> &str {
        &self.state.package_name
    }

    pub fn removal(&self) -> Option<RemovalRecommendation> {
        self.bloat.as_ref().and_then(|b| b.removal)
    }
}

/// Which half of the list is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tab {
    #[default]
    Installed,
    Uninstalled,
}

/// Row filter. Every populated criterion must match.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub tab: Option<Tab>,
    pub system_only: bool,
    pub removal: Option<RemovalRecommendation>,
    /// Case-insensitive substring of the package name
    pub query: Option<String>,
}

impl CatalogFilter {
    pub fn matches(&self, entry: &AppEntry) -> bool {
        let tab_ok = match self.tab {
            Some(Tab::Installed) => entry.state.is_installed,
            Some(Tab::Uninstalled) => !entry.state.is_installed,
            None => true,
        };
        let system_ok = !self.system_only || entry.state.is_system_app;
        let removal_ok = self.removal.is_none_or(|r| entry.removal() == Some(r));
        let query_ok = self.query.as_deref().is_none_or(|q| {
            entry
                .package_name()
                .to_lowercase()
                .contains(&q.to_lowercase())
        });
        tab_ok && system_ok && removal_ok && query_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<AppEntry>,
}

impl Catalog {
    /// Join package states with recommendations, sorted by package name.
    pub fn build(states: Vec<PackageState>, bloat: &BloatMap) -> Self {
        let mut entries: Vec<AppEntry> = states
            .into_iter()
            .map(|state| {
                let bloat = bloat.get(&state.package_name).cloned();
                AppEntry { state, bloat }
            })
            .collect();
        entries.sort_by(|a, b| a.package_name().cmp(b.package_name()));
        Self { entries }
    }

    pub fn entries(&self) -> &[AppEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, package_name: &str) -> Option<&AppEntry> {
        self.entries
            .iter()
            .find(|e| e.package_name() == package_name)
    }

    /// Flip a package between installed and uninstalled.
    ///
    /// Returns false if the package is not in the catalog.
    pub fn change_app_status(&mut self, package_name: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.state.package_name == package_name)
        {
            Some(entry) => {
                entry.state.is_installed = !entry.state.is_installed;
                log::debug!(
                    "{} now {}",
                    package_name,
                    if entry.state.is_installed { "installed" } else { "uninstalled" }
                );
                true
            }
            None => false,
        }
    }

    pub fn filter<'a>(&'a self, filter: &'a CatalogFilter) -> impl Iterator<Item = &'a AppEntry> + 'a {
        self.entries.iter().filter(move |e| filter.matches(e))
    }
}
