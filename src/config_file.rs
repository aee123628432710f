//! Configuration file handling for the broker.
//!
//! Everything has a default, so a missing or partial file is fine. Unknown
//! fields are ignored so older binaries can read newer files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::SdkLevel;
use crate::platform::shell::ShellConfig;
use crate::types::is_valid_package_name;

/// Community bloat list (package -> recommendation).
pub const DEFAULT_BLOAT_LIST_URL: &str = "https://raw.githubusercontent.com/Universal-Debloater-Alliance/universal-android-debloater-next-generation/main/resources/assets/uad_lists.json";
/// Commit history of the bloat list, used to detect updates.
pub const DEFAULT_BLOAT_COMMITS_URL: &str = "https://api.github.com/repos/Universal-Debloater-Alliance/universal-android-debloater-next-generation/commits?path=resources%2Fassets%2Fuad_lists.json";
/// Local cache file of the bloat list.
pub const DEFAULT_BLOAT_LIST_PATH: &str = "uad_lists.json";

/// Broker configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How the broker shell is reached
    pub broker: ShellConfig,
    /// Installer package recorded on installer sessions
    pub installer_package: String,

    // Bloat list
    pub bloat_list_path: PathBuf,
    pub bloat_list_url: String,
    pub bloat_commits_url: String,
    pub auto_update_bloat_list: bool,
    /// Commit hash of the cached bloat list, empty if never fetched
    pub latest_bloat_hash: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker: ShellConfig::default(),
            installer_package: crate::platform::SHELL_INSTALLER_PACKAGE.to_string(),
            bloat_list_path: PathBuf::from(DEFAULT_BLOAT_LIST_PATH),
            bloat_list_url: DEFAULT_BLOAT_LIST_URL.to_string(),
            bloat_commits_url: DEFAULT_BLOAT_COMMITS_URL.to_string(),
            auto_update_bloat_list: true,
            latest_bloat_hash: String::new(),
        }
    }
}

impl BrokerConfig {
    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.broker.program.trim().is_empty() {
            anyhow::bail!("Broker program must be specified");
        }
        if self.broker.program.chars().any(char::is_whitespace) {
            anyhow::bail!("Broker program cannot contain whitespace; put arguments in broker.args");
        }

        if !is_valid_package_name(&self.installer_package) {
            anyhow::bail!(
                "Installer package '{}' is not a valid package name",
                self.installer_package
            );
        }

        if let Some(sdk) = self.broker.sdk_override {
            if sdk < SdkLevel::MINIMUM.0 {
                anyhow::bail!(
                    "SDK override {} is below the minimum supported level {}",
                    sdk,
                    SdkLevel::MINIMUM.0
                );
            }
        }

        for (name, url) in [
            ("bloat_list_url", &self.bloat_list_url),
            ("bloat_commits_url", &self.bloat_commits_url),
        ] {
            if !url.starts_with("https://") {
                anyhow::bail!("{} must be an https URL, got '{}'", name, url);
            }
        }

        if !self.latest_bloat_hash.is_empty()
            && !self.latest_bloat_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            anyhow::bail!("latest_bloat_hash must be a hex commit hash");
        }

        Ok(())
    }
}
