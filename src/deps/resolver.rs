//! Dependency resolution: cached mappings, LLM fallback, in-sandbox install

use super::cache::{DependencyCache, DependencyMapping, InstallMethod};
use crate::llm::{extract_json_object, ChatEndpoint};
use crate::sandbox::{shell_quote, Sandbox};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub struct DependencyResolver<'a> {
    cache: DependencyCache,
    method: InstallMethod,
    vcpkg_root: String,
    chat: Option<&'a dyn ChatEndpoint>,
    model: String,
    llm_timeout: Duration,
    installed: BTreeSet<String>,
    apt_updated: bool,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(cache: DependencyCache, method: InstallMethod) -> Self {
        Self {
            cache,
            method,
            vcpkg_root: "/opt/vcpkg".to_string(),
            chat: None,
            model: String::new(),
            llm_timeout: Duration::from_secs(120),
            installed: BTreeSet::new(),
            apt_updated: false,
        }
    }

    /// Enable the LLM fallback.
    pub fn with_llm(mut self, chat: &'a dyn ChatEndpoint, model: &str, timeout: Duration) -> Self {
        self.chat = Some(chat);
        self.model = model.to_string();
        self.llm_timeout = timeout;
        self
    }

    pub fn with_vcpkg_root(mut self, root: &str) -> Self {
        self.vcpkg_root = root.trim_end_matches('/').to_string();
        self
    }

    pub fn method(&self) -> InstallMethod {
        self.method
    }

    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }

    /// Packages successfully installed in this sandbox so far.
    pub fn installed(&self) -> &BTreeSet<String> {
        &self.installed
    }

    /// Cached mapping for `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<DependencyMapping> {
        self.cache.get(name).cloned()
    }

    /// Cached configure hints for `name` under `method`.
    pub fn flags_for(&self, name: &str, method: InstallMethod) -> BTreeSet<String> {
        self.cache
            .get(name)
            .map(|m| m.flags(method).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve every name against the cache, asking the LLM about misses.
    ///
    /// Returns the names that remain unresolved and the configure flags of
    /// the resolved ones.
    pub fn resolve_all(&mut self, names: &BTreeSet<String>) -> (BTreeSet<String>, BTreeSet<String>) {
        if let Err(e) = self.cache.refresh() {
            tracing::warn!("Could not refresh dependency cache: {:#}", e);
        }

        let mut unresolved = BTreeSet::new();
        let mut flags = BTreeSet::new();
        let mut unknown = BTreeSet::new();

        for name in names {
            match self.cache.get(name) {
                Some(mapping) if !mapping.packages(self.method).is_empty() => {
                    flags.extend(mapping.flags(self.method).iter().cloned());
                }
                // Known-unresolved: asked before, nothing installable
                Some(_) => {
                    unresolved.insert(name.clone());
                }
                None => {
                    unknown.insert(name.clone());
                }
            }
        }

        if !unknown.is_empty() {
            let (still, extra) = self.llm_fallback(&unknown);
            unresolved.extend(still);
            flags.extend(extra);
        }

        (unresolved, flags)
    }

    /// Ask the LLM for mappings of `unresolved`, merge them into the cache
    /// and retry the lookup. On timeout or a malformed answer the input set
    /// is returned unchanged.
    pub fn llm_fallback(
        &mut self,
        unresolved: &BTreeSet<String>,
    ) -> (BTreeSet<String>, BTreeSet<String>) {
        let Some(chat) = self.chat else {
            return (unresolved.clone(), BTreeSet::new());
        };
        if unresolved.is_empty() {
            return (BTreeSet::new(), BTreeSet::new());
        }

        let prompt = dependency_prompt(unresolved);
        let response = match chat.chat(&self.model, &prompt, self.llm_timeout) {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!("Dependency lookup timed out for {:?}", unresolved);
                return (unresolved.clone(), BTreeSet::new());
            }
            Err(e) => {
                tracing::warn!("Dependency lookup failed: {:#}", e);
                return (unresolved.clone(), BTreeSet::new());
            }
        };

        let mappings = match parse_mappings(&response) {
            Some(m) => m,
            None => {
                tracing::warn!("Unparseable dependency mapping response");
                return (unresolved.clone(), BTreeSet::new());
            }
        };

        for (name, mapping) in mappings {
            let key = name.to_lowercase();
            if unresolved.contains(&key) {
                tracing::info!("LLM mapped dependency {}: {:?}", key, mapping);
                self.cache.insert(&key, mapping);
            }
        }
        if let Err(e) = self.cache.save() {
            tracing::warn!("Could not persist dependency cache: {:#}", e);
        }

        let mut still = BTreeSet::new();
        let mut flags = BTreeSet::new();
        for name in unresolved {
            match self.cache.get(name) {
                Some(m) if !m.packages(self.method).is_empty() => {
                    flags.extend(m.flags(self.method).iter().cloned())
                }
                _ => {
                    still.insert(name.clone());
                }
            }
        }
        (still, flags)
    }

    /// Install the packages mapped to `name` inside the sandbox.
    pub fn install(&mut self, sandbox: &Sandbox, name: &str, method: InstallMethod) -> Result<bool> {
        let packages: Vec<String> = self
            .cache
            .get(name)
            .map(|m| m.packages(method))
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !self.installed.contains(p))
            .collect();
        if packages.is_empty() {
            return Ok(self.cache.get(name).is_some_and(|m| !m.packages(method).is_empty()));
        }

        let command = match method {
            InstallMethod::Apt => {
                let update = if self.apt_updated {
                    String::new()
                } else {
                    "apt-get update -qq && ".to_string()
                };
                format!(
                    "{}DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                    update,
                    quoted(&packages)
                )
            }
            InstallMethod::Vcpkg => {
                format!("{}/vcpkg install {}", self.vcpkg_root, quoted(&packages))
            }
        };

        let result = sandbox.shell(&command, None, None)?;
        if result.success() {
            if method == InstallMethod::Apt {
                self.apt_updated = true;
            }
            tracing::info!("Installed {} via {}: {}", name, method, packages.join(" "));
            self.installed.extend(packages);
            Ok(true)
        } else {
            tracing::warn!(
                "Installing {} via {} failed (exit {})",
                name,
                method,
                result.exit_code
            );
            Ok(false)
        }
    }
}

fn quoted(packages: &[String]) -> String {
    packages
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dependency_prompt(names: &BTreeSet<String>) -> String {
    let list = names
        .iter()
        .map(|n| format!("- {}", n))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "A C++ project built with CMake on Ubuntu cannot find these dependencies:\n{list}\n\n\
         For each one give the Ubuntu apt package(s) and the vcpkg port(s) that provide it, \
         plus any extra CMake flags needed after installing with each method. \
         Use an empty list when no package exists.\n\
         Answer only with JSON of the form:\n\
         {{\"<name>\": {{\"apt\": \"pkg\" or [\"pkg\", ...], \"vcpkg\": \"port\" or [...], \
         \"flags\": {{\"apt\": [], \"vcpkg\": []}}}}}}"
    )
}

/// Parse a response into mappings; entries that violate the schema are dropped.
pub fn parse_mappings(response: &str) -> Option<BTreeMap<String, DependencyMapping>> {
    let json = extract_json_object(response)?;
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json).ok()?;
    Some(
        raw.into_iter()
            .filter_map(|(name, value)| match serde_json::from_value(value) {
                Ok(mapping) => Some((name, mapping)),
                Err(e) => {
                    tracing::debug!("Dropping invalid mapping for {}: {}", name, e);
                    None
                }
            })
            .collect(),
    )
}
