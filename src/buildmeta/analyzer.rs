// Build-metadata scan of a CMake source tree
//
// Walks every CMakeLists.txt / *.cmake file under the root and records:
// - test registrations (add_test, *_discover_tests) and enable_testing sites
// - option()/cache BOOL declarations
// - find_package / pkg_check_modules references
// - test framework hints and discovery macros
// - add_subdirectory edges, each with the guard vector around the call
//
// Guard vectors for a test site are the concatenation of the guards on
// every add_subdirectory edge from the root down to the site's directory,
// followed by the guards inside the site's own file.

use super::cmake::{parse_commands, CMakeCommand};
use super::guards::{condition_variables, ConditionStack, GuardTerm};
use super::lexical_normalize;
use super::normalize::normalize_package_name;
use crate::model::Framework;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const ROOT_FILE: &str = "CMakeLists.txt";

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".git", ".svn", "_deps", "node_modules", ".cache"];

/// Discovery macros and the framework they imply.
const DISCOVERY_MACROS: &[(&str, Framework)] = &[
    ("gtest_discover_tests", Framework::Gtest),
    ("gtest_add_tests", Framework::Gtest),
    ("catch_discover_tests", Framework::Catch),
    ("parseandaddcatchtests", Framework::Catch),
    ("doctest_discover_tests", Framework::Doctest),
];

/// Kind of test-related directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `add_test` or a discovery macro
    RegisterTest,
    /// `enable_testing()` or `include(CTest)`
    EnableTesting,
}

/// A test-related directive with its full root-to-leaf guard vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSite {
    /// File relative to the root
    pub file: PathBuf,
    pub line: usize,
    pub kind: DirectiveKind,
    pub guards: Vec<GuardTerm>,
}

/// Declared boolean option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDecl {
    pub name: String,
    pub default_on: bool,
}

#[derive(Debug, Clone)]
struct SubdirEdge {
    parent: PathBuf,
    child: PathBuf,
    guards: Vec<GuardTerm>,
}

#[derive(Debug, Clone)]
struct LocalSite {
    file: PathBuf,
    dir: PathBuf,
    line: usize,
    kind: DirectiveKind,
    guards: Vec<GuardTerm>,
}

/// Result of scanning a source tree.
#[derive(Debug, Clone, Default)]
pub struct BuildMeta {
    root: PathBuf,
    has_root: bool,
    sites: Vec<TestSite>,
    options: BTreeMap<String, OptionDecl>,
    dependencies: BTreeSet<String>,
    framework_hits: BTreeMap<Framework, usize>,
    discovery_macros: BTreeSet<String>,
    includes_ctest: bool,
}

impl BuildMeta {
    /// Scan the tree rooted at `root`.
    pub fn analyze(root: &Path) -> Result<Self> {
        let mut meta = BuildMeta {
            root: root.to_path_buf(),
            has_root: root.join(ROOT_FILE).is_file(),
            ..Default::default()
        };
        if !meta.has_root {
            tracing::debug!("No {} at {}", ROOT_FILE, root.display());
            return Ok(meta);
        }

        let mut files = Vec::new();
        collect_build_files(root, &mut files)?;
        files.sort();

        let mut edges = Vec::new();
        let mut local_sites = Vec::new();
        for path in &files {
            let source = match fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    // Non-UTF-8 or unreadable scripts are skipped
                    tracing::debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            meta.scan_file(&rel, &source, &mut edges, &mut local_sites);
        }

        meta.sites = local_sites
            .into_iter()
            .map(|site| {
                let mut guards = guards_to_dir(&site.dir, &edges);
                guards.extend(site.guards);
                TestSite {
                    file: site.file,
                    line: site.line,
                    kind: site.kind,
                    guards,
                }
            })
            .collect();

        tracing::debug!(
            "Analyzed {} build files: {} test sites, {} dependencies",
            files.len(),
            meta.sites.len(),
            meta.dependencies.len()
        );
        Ok(meta)
    }

    fn scan_file(
        &mut self,
        rel: &Path,
        source: &str,
        edges: &mut Vec<SubdirEdge>,
        sites: &mut Vec<LocalSite>,
    ) {
        let dir = rel.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut stack = ConditionStack::new();

        for cmd in parse_commands(source) {
            match cmd.name.as_str() {
                "if" => stack.push_if(&cmd.args),
                "elseif" => stack.push_elseif(&cmd.args),
                "else" => stack.push_else(),
                "endif" => stack.pop_endif(),
                "add_test" => sites.push(local_site(rel, &dir, &cmd, DirectiveKind::RegisterTest, &stack)),
                "enable_testing" => {
                    sites.push(local_site(rel, &dir, &cmd, DirectiveKind::EnableTesting, &stack))
                }
                "include" => {
                    let args = cmd.arguments();
                    if args.first().is_some_and(|a| a == "CTest") {
                        self.includes_ctest = true;
                        sites.push(local_site(rel, &dir, &cmd, DirectiveKind::EnableTesting, &stack));
                    }
                }
                "add_subdirectory" => {
                    if let Some(child) = cmd.arguments().first() {
                        edges.push(SubdirEdge {
                            parent: dir.clone(),
                            child: resolve_subdir(&dir, child),
                            guards: stack.guards(),
                        });
                    }
                }
                "option" | "cmake_dependent_option" => {
                    let args = cmd.arguments();
                    if let Some(name) = args.first() {
                        let default_on = args.get(2).map(|v| is_truthy(v)).unwrap_or(false);
                        self.declare_option(name, default_on);
                    }
                }
                "set" => {
                    let args = cmd.arguments();
                    if args.len() >= 4 && args[2] == "CACHE" && args[3] == "BOOL" {
                        self.declare_option(&args[0], is_truthy(&args[1]));
                    }
                }
                "find_package" => {
                    let args = cmd.arguments();
                    if let Some(name) = args.first() {
                        self.record_package(name, &args[1..]);
                    }
                }
                "pkg_check_modules" | "pkg_search_module" => {
                    for module in cmd.arguments().iter().skip(1) {
                        if is_pkg_keyword(module) {
                            continue;
                        }
                        self.add_dependency(module);
                    }
                }
                name => {
                    if let Some((_, fw)) = DISCOVERY_MACROS.iter().find(|(m, _)| *m == name) {
                        self.discovery_macros.insert(name.to_string());
                        *self.framework_hits.entry(*fw).or_default() += 1;
                        sites.push(local_site(rel, &dir, &cmd, DirectiveKind::RegisterTest, &stack));
                    } else if name == "target_link_libraries" || name == "link_libraries" {
                        for lib in cmd.arguments() {
                            if let Some(fw) = framework_from_library(&lib) {
                                *self.framework_hits.entry(fw).or_default() += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    fn declare_option(&mut self, name: &str, default_on: bool) {
        self.options.insert(
            name.to_string(),
            OptionDecl {
                name: name.to_string(),
                default_on,
            },
        );
    }

    fn record_package(&mut self, name: &str, rest: &[String]) {
        match name.to_ascii_lowercase().as_str() {
            "gtest" | "googletest" | "gmock" => {
                *self.framework_hits.entry(Framework::Gtest).or_default() += 1
            }
            "catch2" | "catch" => *self.framework_hits.entry(Framework::Catch).or_default() += 1,
            "doctest" => *self.framework_hits.entry(Framework::Doctest).or_default() += 1,
            "boost" if rest.iter().any(|c| c == "unit_test_framework") => {
                *self.framework_hits.entry(Framework::Boost).or_default() += 1
            }
            "qt5test" | "qt6test" => *self.framework_hits.entry(Framework::Qt).or_default() += 1,
            "qt5" | "qt6" | "qt" if rest.iter().any(|c| c == "Test") => {
                *self.framework_hits.entry(Framework::Qt).or_default() += 1
            }
            _ => {}
        }
        self.add_dependency(name);
    }

    fn add_dependency(&mut self, raw: &str) {
        if raw.contains("${") {
            return;
        }
        let normalized = normalize_package_name(raw);
        if !normalized.is_empty() {
            self.dependencies.insert(normalized);
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A top-level CMakeLists.txt exists.
    pub fn has_root(&self) -> bool {
        self.has_root
    }

    /// Tests are both registered and enabled somewhere in the tree.
    pub fn declares_tests(&self) -> bool {
        let registers = self.sites.iter().any(|s| s.kind == DirectiveKind::RegisterTest);
        let enables = self.sites.iter().any(|s| s.kind == DirectiveKind::EnableTesting);
        registers && enables
    }

    pub fn test_sites(&self) -> &[TestSite] {
        &self.sites
    }

    /// Normalized names from find_package / pkg_check_modules.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn discovery_macros(&self) -> &BTreeSet<String> {
        &self.discovery_macros
    }

    pub fn options(&self) -> impl Iterator<Item = &OptionDecl> {
        self.options.values()
    }

    /// Most referenced test framework, if any.
    pub fn framework(&self) -> Option<Framework> {
        self.framework_hits
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(fw, _)| *fw)
    }

    /// Directories (relative to the root) holding enable_testing sites.
    pub fn enable_testing_dirs(&self) -> Vec<PathBuf> {
        let dirs: BTreeSet<PathBuf> = self
            .sites
            .iter()
            .filter(|s| s.kind == DirectiveKind::EnableTesting)
            .map(|s| s.file.parent().map(Path::to_path_buf).unwrap_or_default())
            .collect();
        dirs.into_iter().collect()
    }

    /// Boolean options that gate test compilation.
    ///
    /// Options referenced by the guard vectors of test sites, plus options
    /// whose name mentions tests. `BUILD_TESTING` counts as declared when
    /// the tree includes the CTest module.
    pub fn test_flags(&self) -> Vec<String> {
        let mut flags = BTreeSet::new();
        for site in &self.sites {
            for term in &site.guards {
                for var in condition_variables(&term.condition) {
                    let declared = self.options.contains_key(&var)
                        || (var == "BUILD_TESTING" && self.includes_ctest);
                    if declared {
                        flags.insert(var);
                    }
                }
            }
        }
        for name in self.options.keys() {
            if name.to_ascii_uppercase().contains("TEST") {
                flags.insert(name.clone());
            }
        }
        flags.into_iter().collect()
    }
}

/// `-D<flag>=ON|OFF` value for a test-enabling flag.
pub fn flag_value(flag: &str) -> &'static str {
    if flag.to_ascii_lowercase().contains("disable") {
        "OFF"
    } else {
        "ON"
    }
}

fn local_site(
    rel: &Path,
    dir: &Path,
    cmd: &CMakeCommand,
    kind: DirectiveKind,
    stack: &ConditionStack,
) -> LocalSite {
    LocalSite {
        file: rel.to_path_buf(),
        dir: dir.to_path_buf(),
        line: cmd.line,
        kind,
        guards: stack.guards(),
    }
}

/// Directory named by `add_subdirectory`, relative to the root.
fn resolve_subdir(dir: &Path, arg: &str) -> PathBuf {
    for prefix in ["${CMAKE_SOURCE_DIR}/", "${PROJECT_SOURCE_DIR}/"] {
        if let Some(rest) = arg.strip_prefix(prefix) {
            return lexical_normalize(Path::new(rest));
        }
    }
    let rest = arg
        .strip_prefix("${CMAKE_CURRENT_SOURCE_DIR}/")
        .or_else(|| arg.strip_prefix("${CMAKE_CURRENT_LIST_DIR}/"))
        .unwrap_or(arg);
    lexical_normalize(&dir.join(rest))
}

/// Guards on the add_subdirectory chain from the root down to `dir`.
fn guards_to_dir(dir: &Path, edges: &[SubdirEdge]) -> Vec<GuardTerm> {
    let mut chain: Vec<Vec<GuardTerm>> = Vec::new();
    let mut current = dir.to_path_buf();
    let mut visited = BTreeSet::new();

    while !current.as_os_str().is_empty() && visited.insert(current.clone()) {
        if let Some(edge) = edges.iter().find(|e| e.child == current) {
            chain.push(edge.guards.clone());
            current = edge.parent.clone();
        } else {
            // Not added directly; try the enclosing directory
            current = current.parent().map(Path::to_path_buf).unwrap_or_default();
        }
    }

    chain.into_iter().rev().flatten().collect()
}

fn collect_build_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if file_type.is_dir() {
            if SKIP_DIRS.contains(&&*name) || is_build_dir(&path) {
                continue;
            }
            collect_build_files(&path, out)?;
        } else if file_type.is_file() && (name == ROOT_FILE || name.ends_with(".cmake")) {
            out.push(path);
        }
    }
    Ok(())
}

/// Configured build trees carry a CMakeCache.txt.
fn is_build_dir(path: &Path) -> bool {
    path.join("CMakeCache.txt").is_file()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_uppercase().as_str(),
        "ON" | "1" | "TRUE" | "YES" | "Y"
    )
}

fn is_pkg_keyword(arg: &str) -> bool {
    matches!(
        arg,
        "REQUIRED" | "QUIET" | "IMPORTED_TARGET" | "GLOBAL" | "NO_CMAKE_PATH"
            | "NO_CMAKE_ENVIRONMENT_PATH"
    )
}

fn framework_from_library(lib: &str) -> Option<Framework> {
    let lower = lib.to_ascii_lowercase();
    if lower.starts_with("gtest") || lower.starts_with("gmock") || lower.starts_with("gtest::") {
        Some(Framework::Gtest)
    } else if lower.starts_with("catch2") {
        Some(Framework::Catch)
    } else if lower.starts_with("doctest") {
        Some(Framework::Doctest)
    } else if lower.contains("unit_test_framework") {
        Some(Framework::Boost)
    } else if lower.starts_with("qt") && lower.ends_with("test") {
        Some(Framework::Qt)
    } else {
        None
    }
}
