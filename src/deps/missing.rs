//! Missing-dependency detection in configure/build output

use crate::buildmeta::normalize_package_name;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"Could NOT find ([A-Za-z0-9_.+-]+)",
            r#"By not providing "Find([A-Za-z0-9_.+-]+)\.cmake""#,
            r#"Could not find a package configuration file provided by\s+"([A-Za-z0-9_.+-]+)""#,
            r#"Could not find a configuration file for package\s+"([A-Za-z0-9_.+-]+)""#,
            r"No package '([^']+)' found",
            r"Package '([^']+)', required by '[^']*', not found",
            r"None of the required '([^']+)' found",
            r"cannot find -l([A-Za-z0-9_.+-]+)",
            r"fatal error: ([A-Za-z0-9_+-]+)(?:/[^:\s]*)?\.h(?:pp|h)?: No such file or directory",
            r"fatal error: ([A-Za-z0-9_+-]+)/[^:\s]+: No such file or directory",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("missing-dependency regex"))
        .collect()
    })
}

/// Normalized names of dependencies the output complains about.
pub fn find_missing(output: &str) -> BTreeSet<String> {
    let mut missing = BTreeSet::new();
    for re in patterns() {
        for caps in re.captures_iter(output) {
            if let Some(name) = caps.get(1) {
                let normalized = normalize_package_name(name.as_str());
                if !normalized.is_empty() {
                    missing.insert(normalized);
                }
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(output: &str) -> Vec<String> {
        find_missing(output).into_iter().collect()
    }

    #[test]
    fn test_cmake_find_package_failures() {
        let output = "CMake Error at /usr/share/cmake/Modules/FindPackageHandleStandardArgs.cmake:230 (message):\n  Could NOT find Foo (missing: FOO_LIBRARY FOO_INCLUDE_DIR)\n";
        assert_eq!(names(output), vec!["foo"]);

        let output = r#"  By not providing "FindEigen3.cmake" in CMAKE_MODULE_PATH this project has
  asked CMake to find a package configuration file provided by "Eigen3", but
  CMake did not find one.

  Could not find a package configuration file provided by "Eigen3" with any
  of the following names:"#;
        assert_eq!(names(output), vec!["eigen3"]);
    }

    #[test]
    fn test_pkg_config_failures() {
        let output = "-- Checking for module 'glib-2.0>=2.56'\n--   No package 'glib-2.0' found\n";
        assert_eq!(names(output), vec!["glib"]);
        let output = "Package 'libpng16', required by 'virtual:world', not found";
        assert_eq!(names(output), vec!["libpng16"]);
    }

    #[test]
    fn test_compiler_and_linker_failures() {
        let output = "src/a.cpp:3:10: fatal error: zlib.h: No such file or directory\n/usr/bin/ld: cannot find -lssl\nsrc/b.cpp:1:10: fatal error: boost/asio.hpp: No such file or directory";
        assert_eq!(names(output), vec!["boost", "ssl", "zlib"]);
    }

    #[test]
    fn test_clean_output() {
        assert!(find_missing("-- Configuring done\n-- Generating done\n").is_empty());
    }
}
