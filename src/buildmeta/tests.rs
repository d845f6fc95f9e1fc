// Scenario tests for the build-metadata analyzer
//
// Small synthetic CMake trees written into temp directories.

use super::*;
use crate::model::Framework;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn guards_of(meta: &BuildMeta, file: &str, kind: DirectiveKind) -> Vec<Vec<String>> {
    meta.test_sites()
        .iter()
        .filter(|s| s.file == Path::new(file) && s.kind == kind)
        .map(|s| guards::render(&s.guards))
        .collect()
}

#[test]
fn test_no_root() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/main.cpp", "int main() {}");
    let meta = BuildMeta::analyze(dir.path()).unwrap();
    assert!(!meta.has_root());
    assert!(!meta.declares_tests());
    assert!(meta.test_flags().is_empty());
}

#[test]
fn test_if_else_guards_on_add_test() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "CMakeLists.txt",
        r#"cmake_minimum_required(VERSION 3.10)
project(demo CXX)
enable_testing()
if(A)
  add_test(NAME first COMMAND first)
else()
  add_test(NAME second COMMAND second)
endif()
"#,
    );
    let meta = BuildMeta::analyze(dir.path()).unwrap();
    assert!(meta.has_root());
    assert!(meta.declares_tests());
    assert_eq!(
        guards_of(&meta, "CMakeLists.txt", DirectiveKind::RegisterTest),
        vec![vec!["1(A)".to_string()], vec!["0(A)".to_string()]]
    );
}

#[test]
fn test_subdirectory_chain_concatenates_guards() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "CMakeLists.txt",
        r#"project(demo)
option(MYLIB_BUILD_TESTS "Build tests" OFF)
option(MYLIB_USE_SIMD "SIMD" ON)
if(MYLIB_BUILD_TESTS)
  enable_testing()
  add_subdirectory(test)
endif()
"#,
    );
    write(
        dir.path(),
        "test/CMakeLists.txt",
        r#"find_package(GTest REQUIRED)
add_executable(unit unit.cpp)
target_link_libraries(unit GTest::gtest_main)
if(NOT WIN32)
  add_subdirectory(${CMAKE_CURRENT_SOURCE_DIR}/posix)
endif()
gtest_discover_tests(unit)
"#,
    );
    write(
        dir.path(),
        "test/posix/CMakeLists.txt",
        "add_test(NAME posix_only COMMAND posix_only)\n",
    );

    let meta = BuildMeta::analyze(dir.path()).unwrap();
    assert!(meta.declares_tests());
    assert_eq!(
        guards_of(&meta, "test/posix/CMakeLists.txt", DirectiveKind::RegisterTest),
        vec![vec!["1(MYLIB_BUILD_TESTS)".to_string(), "1(NOT WIN32)".to_string()]]
    );
    assert_eq!(
        guards_of(&meta, "test/CMakeLists.txt", DirectiveKind::RegisterTest),
        vec![vec!["1(MYLIB_BUILD_TESTS)".to_string()]]
    );

    assert_eq!(meta.test_flags(), vec!["MYLIB_BUILD_TESTS".to_string()]);
    assert_eq!(meta.framework(), Some(Framework::Gtest));
    assert!(meta.discovery_macros().contains("gtest_discover_tests"));
    assert!(meta.dependencies().contains("gtest"));
    assert_eq!(meta.enable_testing_dirs(), vec![std::path::PathBuf::new()]);
}

#[test]
fn test_ctest_module_and_disable_flag() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "CMakeLists.txt",
        r#"project(demo)
include(CTest)
set(FOO_DISABLE_TESTS OFF CACHE BOOL "skip tests")
if(BUILD_TESTING AND NOT FOO_DISABLE_TESTS)
  add_subdirectory(tests)
endif()
"#,
    );
    write(
        dir.path(),
        "tests/CMakeLists.txt",
        "find_package(Catch2 3 REQUIRED)\nadd_test(NAME t COMMAND t)\n",
    );

    let meta = BuildMeta::analyze(dir.path()).unwrap();
    assert!(meta.declares_tests());
    assert_eq!(
        meta.test_flags(),
        vec!["BUILD_TESTING".to_string(), "FOO_DISABLE_TESTS".to_string()]
    );
    assert_eq!(flag_value("FOO_DISABLE_TESTS"), "OFF");
    assert_eq!(flag_value("BUILD_TESTING"), "ON");
    assert_eq!(meta.framework(), Some(Framework::Catch));
}

#[test]
fn test_dependencies_normalized() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "CMakeLists.txt",
        r#"project(demo)
find_package(Boost 1.70 REQUIRED COMPONENTS unit_test_framework)
find_package(ZLIB)
find_package(${DYNAMIC_NAME})
include(FindPkgConfig)
pkg_check_modules(GLIB REQUIRED IMPORTED_TARGET glib-2.0>=2.56 libxml++-2.6)
"#,
    );
    let meta = BuildMeta::analyze(dir.path()).unwrap();
    let deps: Vec<&str> = meta.dependencies().iter().map(String::as_str).collect();
    assert_eq!(deps, vec!["boost", "glib", "libxmlpp", "zlib"]);
    assert_eq!(meta.framework(), Some(Framework::Boost));
    assert!(!meta.declares_tests());
}

#[test]
fn test_configured_build_tree_skipped() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "CMakeLists.txt", "project(demo)\n");
    write(dir.path(), "build/CMakeCache.txt", "");
    write(dir.path(), "build/CMakeLists.txt", "add_test(NAME stale COMMAND stale)\n");
    let meta = BuildMeta::analyze(dir.path()).unwrap();
    assert!(meta.test_sites().is_empty());
}

#[test]
fn test_lexical_normalize() {
    assert_eq!(
        lexical_normalize(Path::new("/build/tests/../")),
        Path::new("/build")
    );
    assert_eq!(lexical_normalize(Path::new("a/./b/../c")), Path::new("a/c"));
    assert_eq!(lexical_normalize(Path::new("../x")), Path::new("../x"));
}
