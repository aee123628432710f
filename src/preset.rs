//! Presets: named sets of packages to remove together.
//!
//! The on-disk export format is shared with other debloater front-ends:
//!
//! ```json
//! { "name": "...", "description": "...", "createdDate": 1700000000000,
//!   "version": "1.0", "apps": [ { "packageName": "com.example.bloat" } ] }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::is_valid_package_name;

pub const PRESET_VERSION: &str = "1.0";

fn default_version() -> String {
    PRESET_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PresetApp {
    #[serde(rename = "packageName")]
    package_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresetFile {
    name: String,
    #[serde(default)]
    description: String,
    created_date: i64,
    #[serde(default = "default_version")]
    version: String,
    apps: Vec<PresetApp>,
}

/// A named set of packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub description: String,
    /// Milliseconds since the unix epoch
    pub created_date: i64,
    pub apps: BTreeSet<String>,
    pub version: String,
}

impl Preset {
    /// New preset stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        apps: impl IntoIterator<Item = String>,
    ) -> Self {
        let created_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            name: name.into(),
            description: description.into(),
            created_date,
            apps: apps.into_iter().collect(),
            version: default_version(),
        }
    }

    /// Serialize to the export format.
    pub fn to_json(&self) -> Result<String> {
        let file = PresetFile {
            name: self.name.clone(),
            description: self.description.clone(),
            created_date: self.created_date,
            version: self.version.clone(),
            apps: self
                .apps
                .iter()
                .map(|p| PresetApp {
                    package_name: p.clone(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&file).context("Failed to serialize preset")
    }

    /// Parse the export format. Invalid package names are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: PresetFile = serde_json::from_str(json).context("Failed to parse preset JSON")?;
        if file.name.trim().is_empty() {
            anyhow::bail!("Preset name must be specified");
        }
        if let Some(bad) = file
            .apps
            .iter()
            .find(|a| !is_valid_package_name(&a.package_name))
        {
            anyhow::bail!("Preset contains invalid package name '{}'", bad.package_name);
        }
        Ok(Self {
            name: file.name,
            description: file.description,
            created_date: file.created_date,
            apps: file.apps.into_iter().map(|a| a.package_name).collect(),
            version: if file.version.is_empty() {
                default_version()
            } else {
                file.version
            },
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read preset from {:?}", path.as_ref()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid preset file {:?}", path.as_ref()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(&path, self.to_json()?)
            .with_context(|| format!("Failed to write preset to {:?}", path.as_ref()))?;
        log::info!("Preset saved: {}", self.name);
        Ok(())
    }
}

/// Presets kept together in one JSON file (an array in export format).
pub struct PresetStore {
    path: PathBuf,
}

impl PresetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All stored presets; a missing store file is an empty store.
    pub fn list(&self) -> Result<Vec<Preset>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read presets from {:?}", self.path));
            }
        };
        let raw: Vec<serde_json::Value> =
            serde_json::from_str(&content).context("Failed to parse preset store")?;
        raw.into_iter()
            .map(|v| Preset::from_json(&v.to_string()))
            .collect()
    }

    fn write(&self, presets: &[Preset]) -> Result<()> {
        let values = presets
            .iter()
            .map(|p| {
                p.to_json()
                    .and_then(|j| serde_json::from_str(&j).context("Failed to re-read preset"))
            })
            .collect::<Result<Vec<serde_json::Value>>>()?;
        let json = serde_json::to_string_pretty(&values).context("Failed to serialize presets")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write presets to {:?}", self.path))
    }

    pub fn add(&self, preset: Preset) -> Result<()> {
        let mut presets = self.list()?;
        log::info!("Preset saved: {}", preset.name);
        presets.push(preset);
        self.write(&presets)
    }

    /// Remove the preset matching name and creation date. Returns false if absent.
    pub fn delete(&self, name: &str, created_date: i64) -> Result<bool> {
        let mut presets = self.list()?;
        let before = presets.len();
        presets.retain(|p| !(p.name == name && p.created_date == created_date));
        if presets.len() == before {
            return Ok(false);
        }
        self.write(&presets)?;
        log::info!("Preset deleted: {}", name);
        Ok(true)
    }

    /// Replace the preset matching `old`'s name and creation date.
    pub fn update(&self, old: &Preset, new: Preset) -> Result<bool> {
        let mut presets = self.list()?;
        let Some(slot) = presets
            .iter_mut()
            .find(|p| p.name == old.name && p.created_date == old.created_date)
        else {
            return Ok(false);
        };
        *slot = new;
        self.write(&presets)?;
        log::info!("Preset updated: {}", old.name);
        Ok(true)
    }
}
