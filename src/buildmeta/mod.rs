// Build-metadata analysis for CMake projects
//
// Answers, from a checked-out source tree:
// - is there a build-system root, and does it declare tests?
// - which boolean options gate test compilation?
// - which external packages are referenced?
// - which test framework and discovery macros are used?
// - after configure: which test executables does CTest know about?
//
// Pure read-only scanning; nothing here runs the build.

mod analyzer;
pub mod cmake;
pub mod ctest;
pub mod guards;
mod normalize;

pub use analyzer::{flag_value, BuildMeta, DirectiveKind, OptionDecl, TestSite};
pub use ctest::{collect_entries, collect_executables, parse_manifest, CTestEntry, CTestManifest};
pub use guards::{ConditionStack, Guard, GuardTerm};
pub use normalize::normalize_package_name;

use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests;
