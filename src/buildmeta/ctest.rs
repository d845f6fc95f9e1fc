//! Post-configure CTest manifests
//!
//! `CTestTestfile.cmake` lists `add_test(name exe args...)` entries and
//! `subdirs(dir)` links to child manifests. The files live wherever the
//! build tree lives (possibly inside a container), so reading is delegated
//! to a caller-supplied function.

use super::cmake::parse_commands;
use super::lexical_normalize;
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "CTestTestfile.cmake";

/// One registered test in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CTestEntry {
    pub name: String,
    pub executable: String,
    pub args: Vec<String>,
}

/// Parsed contents of a single manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CTestManifest {
    pub tests: Vec<CTestEntry>,
    pub subdirs: Vec<String>,
}

/// Parse the text of one `CTestTestfile.cmake`.
pub fn parse_manifest(text: &str) -> CTestManifest {
    let mut manifest = CTestManifest::default();
    for cmd in parse_commands(text) {
        let args = cmd.arguments();
        match cmd.name.as_str() {
            "add_test" if args.len() >= 2 => {
                // NOT_AVAILABLE marks tests whose target was not built
                if args[1] == "NOT_AVAILABLE" {
                    continue;
                }
                manifest.tests.push(CTestEntry {
                    name: args[0].clone(),
                    executable: args[1].clone(),
                    args: args[2..].to_vec(),
                });
            }
            "subdirs" => manifest.subdirs.extend(args),
            _ => {}
        }
    }
    manifest
}

/// All test executables reachable from the manifest in `dir`, following
/// `subdirs(...)` transitively. `read` returns `None` for a missing file.
pub fn collect_executables<F>(dir: &Path, mut read: F) -> Result<BTreeSet<String>>
where
    F: FnMut(&Path) -> Result<Option<String>>,
{
    let mut executables = BTreeSet::new();
    for entry in collect_entries(dir, &mut read)? {
        executables.insert(entry.executable);
    }
    Ok(executables)
}

/// All entries reachable from `dir`, in traversal order.
pub fn collect_entries<F>(dir: &Path, read: &mut F) -> Result<Vec<CTestEntry>>
where
    F: FnMut(&Path) -> Result<Option<String>>,
{
    let mut entries = Vec::new();
    let mut visited = BTreeSet::new();
    let mut pending = vec![lexical_normalize(dir)];

    while let Some(current) = pending.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(text) = read(&current.join(MANIFEST_NAME))? else {
            tracing::debug!("No CTest manifest in {}", current.display());
            continue;
        };
        let manifest = parse_manifest(&text);
        entries.extend(manifest.tests);
        // Reverse so children are visited in declaration order
        for sub in manifest.subdirs.iter().rev() {
            let child = PathBuf::from(sub);
            let next = if child.is_absolute() {
                child
            } else {
                current.join(child)
            };
            pending.push(lexical_normalize(&next));
        }
    }

    Ok(entries)
}
