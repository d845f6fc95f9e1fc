//! Persisted dependency-name -> package mapping
//!
//! ```json
//! { "<name>": { "apt": "libfoo-dev" | ["a", "b"],
//!               "vcpkg": "foo" | [...],
//!               "flags": { "apt": ["-DFOO=ON"], "vcpkg": [] } } }
//! ```
//!
//! Entries without any installable name are "known-unresolved".

use crate::persist::{read_json, write_json_atomic};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Package installer available inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    Apt,
    Vcpkg,
}

impl InstallMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Vcpkg => "vcpkg",
        }
    }
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "apt" => Ok(Self::Apt),
            "vcpkg" => Ok(Self::Vcpkg),
            other => bail!("Unknown install method: {}", other),
        }
    }
}

/// A single package name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageNames {
    One(String),
    Many(Vec<String>),
}

impl PackageNames {
    pub fn names(&self) -> Vec<String> {
        let names: Vec<&String> = match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names.iter().collect(),
        };
        names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFlags {
    #[serde(default)]
    pub apt: Vec<String>,
    #[serde(default)]
    pub vcpkg: Vec<String>,
}

/// Installable packages and configure hints for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apt: Option<PackageNames>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpkg: Option<PackageNames>,
    #[serde(default)]
    pub flags: MethodFlags,
}

impl DependencyMapping {
    pub fn packages(&self, method: InstallMethod) -> Vec<String> {
        let names = match method {
            InstallMethod::Apt => &self.apt,
            InstallMethod::Vcpkg => &self.vcpkg,
        };
        names.as_ref().map(PackageNames::names).unwrap_or_default()
    }

    pub fn flags(&self, method: InstallMethod) -> &[String] {
        match method {
            InstallMethod::Apt => &self.flags.apt,
            InstallMethod::Vcpkg => &self.flags.vcpkg,
        }
    }

    /// At least one installable name for some method.
    pub fn is_resolved(&self) -> bool {
        !self.packages(InstallMethod::Apt).is_empty()
            || !self.packages(InstallMethod::Vcpkg).is_empty()
    }
}

/// On-disk cache shared by all workers.
#[derive(Debug, Clone)]
pub struct DependencyCache {
    path: PathBuf,
    entries: BTreeMap<String, DependencyMapping>,
}

impl DependencyCache {
    /// Load the cache; a missing or empty file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_json::<BTreeMap<String, DependencyMapping>>(path)
            .with_context(|| format!("Malformed dependency cache {}", path.display()))?
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        })
    }

    /// In-memory cache not backed by a file.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&DependencyMapping> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn insert(&mut self, name: &str, mapping: DependencyMapping) {
        self.entries.insert(name.to_lowercase(), mapping);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick up entries other workers wrote since we loaded; ours win.
    pub fn refresh(&mut self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let on_disk = Self::load(&self.path)?;
        for (name, mapping) in on_disk.entries {
            self.entries.entry(name).or_insert(mapping);
        }
        Ok(())
    }

    /// Merge with the file and write atomically.
    pub fn save(&mut self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        self.refresh()?;
        write_json_atomic(&self.path, &self.entries)
            .with_context(|| format!("Failed to write dependency cache {}", self.path.display()))
    }
}
