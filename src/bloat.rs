//! Community bloat list (UAD) support
//!
//! The list maps package names to a removal recommendation and a short
//! description. It is cached on disk and refreshed when the upstream commit
//! hash changes. Every failure here degrades to an empty list; recommendations
//! are advisory and never block an operation.

use crate::config_file::BrokerConfig;
use crate::types::{InstallList, RemovalRecommendation};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Recommendation data for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloatData {
    pub install_list: Option<InstallList>,
    pub description: Option<String>,
    pub removal: Option<RemovalRecommendation>,
}

/// Package name -> recommendation.
pub type BloatMap = BTreeMap<String, BloatData>;

/// One entry as found upstream. Other upstream fields are ignored.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    list: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    removal: Option<String>,
}

impl From<RawEntry> for BloatData {
    fn from(raw: RawEntry) -> Self {
        Self {
            install_list: raw.list.and_then(|l| InstallList::from_str(&l).ok()),
            description: raw.description.filter(|d| !d.trim().is_empty()),
            removal: raw
                .removal
                .and_then(|r| RemovalRecommendation::from_str(&r).ok()),
        }
    }
}

/// Parse the upstream list JSON.
///
/// Unknown list or removal names become `None` instead of failing the entry.
pub fn parse_bloat_list(json: &str) -> Result<BloatMap> {
    let raw: BTreeMap<String, RawEntry> =
        serde_json::from_str(json).context("Failed to parse bloat list JSON")?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

/// Latest commit hash from the commits API response.
///
/// Anything other than a non-empty array whose first entry has a `sha`
/// yields `None`.
pub fn parse_latest_hash(commits: &str) -> Option<String> {
    let commits: Vec<CommitEntry> = serde_json::from_str(commits).ok()?;
    commits
        .into_iter()
        .next()
        .map(|c| c.sha)
        .filter(|sha| !sha.is_empty())
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
}

/// Read the cached list without touching the network.
///
/// A missing or unreadable cache yields an empty map.
pub fn load_cached(path: &Path) -> BloatMap {
    match fs::read_to_string(path) {
        Ok(content) => parse_bloat_list(&content).unwrap_or_else(|e| {
            log::warn!("Cached bloat list unreadable: {:#}", e);
            BloatMap::new()
        }),
        Err(_) => BloatMap::new(),
    }
}

/// Packages among `names` whose removal may break the device.
pub fn risky_removals<'a>(
    map: &BloatMap,
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<(&'a str, RemovalRecommendation)> {
    names
        .into_iter()
        .filter_map(|name| {
            map.get(name)
                .and_then(|data| data.removal)
                .filter(|removal| removal.is_risky())
                .map(|removal| (name, removal))
        })
        .collect()
}

/// Whether the cached list has to be fetched again.
///
/// A missing or blank cache always refreshes. Otherwise a refresh happens
/// only with auto-update on and a remote hash that differs from the cached one.
pub fn needs_refresh(
    cached_list: Option<&str>,
    auto_update: bool,
    cached_hash: &str,
    remote_hash: Option<&str>,
) -> bool {
    if cached_list.is_none_or(|c| c.trim().is_empty()) {
        return true;
    }
    auto_update && remote_hash.is_some_and(|h| h != cached_hash)
}

/// Timeout for each bloat list request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads the list over HTTPS.
pub struct BloatFetcher {
    agent: ureq::Agent,
    list_url: String,
    commits_url: String,
}

impl BloatFetcher {
    pub fn new(list_url: impl Into<String>, commits_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build(),
            list_url: list_url.into(),
            commits_url: commits_url.into(),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(&config.bloat_list_url, &config.bloat_commits_url)
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {} failed", url))?;
        response
            .into_string()
            .with_context(|| format!("Failed to read response body from {}", url))
    }

    /// Current upstream commit hash.
    pub fn latest_hash(&self) -> Result<String> {
        let commits = self.fetch(&self.commits_url)?;
        parse_latest_hash(&commits).context("No commit hash in commits response")
    }

    /// Download the list, write it to `cache`, and return it with its hash.
    pub fn fetch_bloat_list(&self, cache: &Path) -> Result<(BloatMap, String)> {
        let body = self.fetch(&self.list_url)?;
        let map = parse_bloat_list(&body)?;
        let hash = self.latest_hash()?;

        fs::write(cache, &body)
            .with_context(|| format!("Failed to write bloat list to {:?}", cache))?;
        log::info!("Fetched bloat list: {} entries at {}", map.len(), hash);

        Ok((map, hash))
    }

    /// Load the list, refreshing the cache when needed.
    ///
    /// `config.latest_bloat_hash` is updated only when both the list and the
    /// hash were fetched; the caller decides whether to persist it.
    pub fn sync(&self, config: &mut BrokerConfig) -> BloatMap {
        let cached = fs::read_to_string(&config.bloat_list_path).ok();

        let remote_hash = if config.auto_update_bloat_list && cached.is_some() {
            match self.latest_hash() {
                Ok(hash) => Some(hash),
                Err(e) => {
                    log::error!("Failed to check for bloat list updates: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        if !needs_refresh(
            cached.as_deref(),
            config.auto_update_bloat_list,
            &config.latest_bloat_hash,
            remote_hash.as_deref(),
        ) {
            if let Some(content) = cached {
                return match parse_bloat_list(&content) {
                    Ok(map) => map,
                    Err(e) => {
                        log::error!("Cached bloat list unreadable: {:#}", e);
                        BloatMap::new()
                    }
                };
            }
        }

        match self.fetch_bloat_list(&config.bloat_list_path) {
            Ok((map, hash)) => {
                if !map.is_empty() && !hash.is_empty() {
                    config.latest_bloat_hash = hash;
                }
                map
            }
            Err(e) => {
                log::error!("Failed to fetch bloat list: {:#}", e);
                BloatMap::new()
            }
        }
    }
}
