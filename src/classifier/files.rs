//! Pre-classifier file filter
//!
//! A candidate may only touch C++ sources and headers outside test and
//! vendored directories.

use crate::model::FileChange;

const CPP_EXTENSIONS: &[&str] = &[
    "cpp", "cc", "cxx", "c++", "cp", "hpp", "hh", "hxx", "h++", "h", "ipp", "tpp", "inl", "inc",
];

const TEST_DIRS: &[&str] = &[
    "test",
    "tests",
    "testing",
    "unittest",
    "unittests",
    "unit_tests",
    "unit-tests",
    "testsuite",
    "test_suite",
    "gtest",
];

const VENDOR_DIRS: &[&str] = &[
    "third_party",
    "thirdparty",
    "third-party",
    "3rdparty",
    "3rd_party",
    "vendor",
    "vendored",
    "external",
    "extern",
    "deps",
];

/// Why a file disqualifies a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotCpp,
    TestFile,
    Vendored,
}

pub fn is_cpp_source(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| CPP_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn directories(path: &str) -> impl Iterator<Item = String> + '_ {
    let mut parts: Vec<&str> = path.split('/').collect();
    parts.pop();
    parts.into_iter().map(str::to_ascii_lowercase)
}

pub fn is_test_path(path: &str) -> bool {
    if directories(path).any(|d| TEST_DIRS.contains(&d.as_str())) {
        return true;
    }
    let file = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    let stem = file.split('.').next().unwrap_or(&file);
    stem.ends_with("_test")
        || stem.ends_with("_tests")
        || stem.ends_with("_unittest")
        || stem.starts_with("test_")
}

pub fn is_vendored(path: &str) -> bool {
    directories(path).any(|d| VENDOR_DIRS.contains(&d.as_str()))
}

/// First disqualifying file, if any.
pub fn check_file(path: &str) -> Option<Rejection> {
    if !is_cpp_source(path) {
        Some(Rejection::NotCpp)
    } else if is_vendored(path) {
        Some(Rejection::Vendored)
    } else if is_test_path(path) {
        Some(Rejection::TestFile)
    } else {
        None
    }
}

/// True when every file is an eligible C++ source and there is at least one.
pub fn passes_file_filter(files: &[FileChange]) -> bool {
    !files.is_empty() && files.iter().all(|f| check_file(&f.path).is_none())
}
