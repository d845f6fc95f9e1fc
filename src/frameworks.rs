//! Per-framework test listing, selection and timing
//!
//! Each supported unit-test framework implements [`TestFramework`]: the
//! flag that lists its tests, a parser for that listing, the argv that
//! runs a single test, and a parser that pulls the test's duration out
//! of its output.

use crate::model::Framework;
use crate::sandbox::parse_real_line;
use regex::Regex;
use std::sync::OnceLock;

/// Repeat count used when gtest reports a zero duration.
pub const GTEST_REPEAT: u32 = 100;

pub trait TestFramework: Send + Sync {
    fn kind(&self) -> Framework;

    /// Arguments that make an executable print its test names.
    fn list_flags(&self) -> &'static [&'static str];

    /// Test names from the output of [`Self::list_flags`].
    fn parse_list(&self, output: &str) -> Vec<String>;

    /// Command running exactly `test_name` from `executable`.
    fn argv(&self, executable: &str, test_name: &str) -> Vec<String>;

    /// Seconds reported by the framework for `test_name`.
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64>;
}

pub fn framework_for(kind: Framework) -> &'static dyn TestFramework {
    match kind {
        Framework::Gtest => &Gtest,
        Framework::Catch => &Catch,
        Framework::Doctest => &Doctest,
        Framework::Boost => &Boost,
        Framework::Qt => &Qt,
        Framework::GenericCtest => &GenericCtest,
    }
}

/// Framework time if reported and positive, then the `real` line, else 0.
pub fn parse_time_or_fallback(kind: Framework, output: &str, test_name: &str) -> f64 {
    framework_for(kind)
        .parse_time(output, test_name)
        .filter(|t| *t > 0.0)
        .or_else(|| parse_real_line(output))
        .unwrap_or(0.0)
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub struct Gtest;

impl TestFramework for Gtest {
    fn kind(&self) -> Framework {
        Framework::Gtest
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["--gtest_list_tests"]
    }

    /// `Suite.` lines followed by indented `Test` lines; `#` starts a
    /// parameter comment.
    fn parse_list(&self, output: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut suite: Option<String> = None;
        for line in output.lines() {
            let content = line.split('#').next().unwrap_or("").trim_end();
            if content.trim().is_empty() {
                continue;
            }
            if !line.starts_with(' ') {
                suite = content
                    .strip_suffix('.')
                    .filter(|s| !s.contains(' '))
                    .map(str::to_string);
            } else if let Some(suite) = &suite {
                names.push(format!("{}.{}", suite, content.trim()));
            }
        }
        names
    }

    fn argv(&self, executable: &str, test_name: &str) -> Vec<String> {
        vec![
            executable.to_string(),
            format!("--gtest_filter={}", test_name),
            "--gtest_print_time".to_string(),
        ]
    }

    /// Sum of all `[ OK ]`/`[ FAILED ]` lines for the test, so a
    /// `--gtest_repeat` run reports the total.
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?m)^\[\s*(?:OK|FAILED)\s*\]\s+(\S+)\s+\((\d+)\s*ms\)")
                .expect("gtest time regex")
        });
        let millis: Vec<f64> = re
            .captures_iter(output)
            .filter(|c| &c[1] == test_name)
            .filter_map(|c| c[2].parse::<f64>().ok())
            .collect();
        if millis.is_empty() {
            None
        } else {
            Some(millis.iter().sum::<f64>() / 1000.0)
        }
    }
}

pub struct Catch;

impl TestFramework for Catch {
    fn kind(&self) -> Framework {
        Framework::Catch
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["--list-test-names-only"]
    }

    fn parse_list(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| !l.starts_with('['))
            .filter(|l| !l.ends_with("test cases") && !l.ends_with("test case"))
            .filter(|l| !l.ends_with(':'))
            .map(str::to_string)
            .collect()
    }

    fn argv(&self, executable: &str, test_name: &str) -> Vec<String> {
        owned(&[executable, test_name, "--durations", "yes"])
    }

    /// `0.123 s: name` lines printed by `--durations yes`.
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64> {
        seconds_colon_name(output, test_name)
    }
}

fn seconds_colon_name(output: &str, test_name: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\d+(?:\.\d+)?(?:[eE][-+]?\d+)?) s: (.+?)\s*$")
            .expect("duration line regex")
    });
    re.captures_iter(output)
        .filter(|c| &c[2] == test_name)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .last()
}

pub struct Doctest;

impl TestFramework for Doctest {
    fn kind(&self) -> Framework {
        Framework::Doctest
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["--list-test-cases"]
    }

    fn parse_list(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| !l.starts_with("[doctest]"))
            .filter(|l| !l.chars().all(|c| c == '='))
            .map(str::to_string)
            .collect()
    }

    fn argv(&self, executable: &str, test_name: &str) -> Vec<String> {
        vec![executable.to_string(), format!("--test-case={}", test_name)]
    }

    /// Only present when the binary was run with `--duration=true`.
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64> {
        seconds_colon_name(output, test_name)
    }
}

pub struct Boost;

impl TestFramework for Boost {
    fn kind(&self) -> Framework {
        Framework::Boost
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["--list_content"]
    }

    /// Indented suite/case tree (four spaces per level, `*` marks enabled
    /// units); leaves become `suite/case` paths.
    fn parse_list(&self, output: &str) -> Vec<String> {
        let entries: Vec<(usize, String)> = output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter(|l| !l.trim_start().starts_with("Running") && !l.contains("***"))
            .map(|l| {
                let depth = (l.len() - l.trim_start().len()) / 4;
                let name = l.trim().trim_end_matches('*').trim().to_string();
                (depth, name)
            })
            .collect();

        let mut names = Vec::new();
        let mut path: Vec<String> = Vec::new();
        for (i, (depth, name)) in entries.iter().enumerate() {
            path.truncate(*depth);
            path.push(name.clone());
            let is_leaf = entries.get(i + 1).map_or(true, |(next, _)| next <= depth);
            if is_leaf {
                names.push(path.join("/"));
            }
        }
        names
    }

    fn argv(&self, executable: &str, test_name: &str) -> Vec<String> {
        vec![
            executable.to_string(),
            format!("--run_test={}", test_name),
            "--log_level=test_suite".to_string(),
            "--report_level=detailed".to_string(),
        ]
    }

    /// `Leaving test case "name"; testing time: 123us`
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r#"Leaving test case "([^"]+)"; testing time: (\d+(?:\.\d+)?)(us|mks|ms|s)\b"#)
                .expect("boost time regex")
        });
        let leaf = test_name.rsplit('/').next().unwrap_or(test_name);
        let total: Vec<f64> = re
            .captures_iter(output)
            .filter(|c| &c[1] == leaf)
            .filter_map(|c| {
                let value: f64 = c[2].parse().ok()?;
                Some(match &c[3] {
                    "us" | "mks" => value / 1e6,
                    "ms" => value / 1e3,
                    _ => value,
                })
            })
            .collect();
        if total.is_empty() {
            None
        } else {
            Some(total.iter().sum())
        }
    }
}

pub struct Qt;

impl TestFramework for Qt {
    fn kind(&self) -> Framework {
        Framework::Qt
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["-functions"]
    }

    fn parse_list(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .map(str::trim)
            .filter_map(|l| l.strip_suffix("()"))
            .filter(|l| !l.is_empty() && !l.contains(' '))
            .map(str::to_string)
            .collect()
    }

    fn argv(&self, executable: &str, test_name: &str) -> Vec<String> {
        owned(&[executable, test_name])
    }

    /// Benchmark `RESULT : Class::name():` lines followed by `N msecs per iteration`.
    fn parse_time(&self, output: &str, test_name: &str) -> Option<f64> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"RESULT\s*:\s*(?:\S+::)?(\w+)\(\):\s*(?:\n\s*)?(\d+(?:\.\d+)?)\s*msecs? per iteration")
                .expect("qt time regex")
        });
        re.captures_iter(output)
            .filter(|c| &c[1] == test_name)
            .filter_map(|c| c[2].parse::<f64>().ok())
            .map(|ms| ms / 1000.0)
            .last()
    }
}

pub struct GenericCtest;

impl GenericCtest {
    pub fn suite_argv() -> Vec<String> {
        owned(&["ctest", "--output-on-failure"])
    }
}

impl TestFramework for GenericCtest {
    fn kind(&self) -> Framework {
        Framework::GenericCtest
    }

    fn list_flags(&self) -> &'static [&'static str] {
        &["-N"]
    }

    /// `  Test #1: name` lines of `ctest -N`.
    fn parse_list(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|l| l.trim().strip_prefix("Test"))
            .filter_map(|l| l.split_once(": "))
            .filter(|(num, _)| num.trim().starts_with('#'))
            .map(|(_, name)| name.trim().to_string())
            .collect()
    }

    fn argv(&self, _executable: &str, _test_name: &str) -> Vec<String> {
        Self::suite_argv()
    }

    /// `Total Test time (real) =   1.23 sec`
    fn parse_time(&self, output: &str, _test_name: &str) -> Option<f64> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"Total Test time \(real\)\s*=\s*(\d+(?:\.\d+)?)\s*sec")
                .expect("ctest total time regex")
        });
        re.captures_iter(output)
            .filter_map(|c| c[1].parse::<f64>().ok())
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gtest_list_and_time() {
        let listing = "Running main() from gtest_main.cc\nFooTest.\n  Bar\n  Baz  # GetParam() = 3\nParam/Suite.\n  Case/0  # GetParam() = (1, 2)\n";
        let names = Gtest.parse_list(listing);
        assert_eq!(names, vec!["FooTest.Bar", "FooTest.Baz", "Param/Suite.Case/0"]);

        let out = "[ RUN      ] FooTest.Bar\n[       OK ] FooTest.Bar (12 ms)\n[       OK ] FooTest.Baz (3 ms)\n";
        assert_eq!(Gtest.parse_time(out, "FooTest.Bar"), Some(0.012));
        assert_eq!(Gtest.parse_time(out, "Other.Test"), None);
    }

    #[test]
    fn test_gtest_repeat_sums() {
        let out = "[       OK ] A.B (2 ms)\n[       OK ] A.B (3 ms)\n[  FAILED  ] A.B (5 ms)\n";
        assert_eq!(Gtest.parse_time(out, "A.B"), Some(0.010));
        assert_eq!(
            Gtest.argv("/b/t", "A.B"),
            vec!["/b/t", "--gtest_filter=A.B", "--gtest_print_time"]
        );
    }

    #[test]
    fn test_catch_list_and_durations() {
        let listing = "All available test cases:\n  vector grows\n      [vector]\n  string concat\n2 test cases\n";
        assert_eq!(Catch.parse_list(listing), vec!["vector grows", "string concat"]);
        let out = "0.250 s: vector grows\n0.001 s: string concat\n";
        assert_eq!(Catch.parse_time(out, "vector grows"), Some(0.25));
        assert_eq!(
            Catch.argv("t", "vector grows"),
            vec!["t", "vector grows", "--durations", "yes"]
        );
    }

    #[test]
    fn test_doctest_list() {
        let listing = "[doctest] doctest version is \"2.4.11\"\n[doctest] run with \"--help\" for options\n===============================================================================\nparse ints\nparse floats\n===============================================================================\n[doctest] unskipped test cases passing the current filters: 2\n";
        assert_eq!(Doctest.parse_list(listing), vec!["parse ints", "parse floats"]);
        assert_eq!(Doctest.argv("t", "parse ints"), vec!["t", "--test-case=parse ints"]);
    }

    #[test]
    fn test_boost_tree_and_time() {
        let listing = "Algo*\n    sort_small*\n    sort_large*\n    Nested*\n        deep*\nStandalone*\n";
        assert_eq!(
            Boost.parse_list(listing),
            vec!["Algo/sort_small", "Algo/sort_large", "Algo/Nested/deep", "Standalone"]
        );
        let out = "Entering test case \"sort_large\"\nLeaving test case \"sort_large\"; testing time: 1500us\n";
        assert_eq!(Boost.parse_time(out, "Algo/sort_large"), Some(0.0015));
        let out = "Leaving test case \"deep\"; testing time: 12ms\n";
        assert_eq!(Boost.parse_time(out, "Algo/Nested/deep"), Some(0.012));
    }

    #[test]
    fn test_qt_functions() {
        let listing = "initTestCase()\ntestParse()\ntestRender()\ncleanupTestCase()\n";
        assert_eq!(
            Qt.parse_list(listing),
            vec!["initTestCase", "testParse", "testRender", "cleanupTestCase"]
        );
        let out = "RESULT : Bench::testParse():\n     0.75 msecs per iteration (total: 96, iterations: 128)\n";
        assert_eq!(Qt.parse_time(out, "testParse"), Some(0.00075));
    }

    #[test]
    fn test_ctest_listing_and_total() {
        let out = "Test project /b\n  Test #1: unit\n  Test #2: integration\n\nTotal Tests: 2\n";
        assert_eq!(GenericCtest.parse_list(out), vec!["unit", "integration"]);
        let out = "100% tests passed, 0 tests failed out of 2\n\nTotal Test time (real) =   1.23 sec\n";
        assert_eq!(GenericCtest.parse_time(out, ""), Some(1.23));
        assert_eq!(GenericCtest.argv("x", "y"), vec!["ctest", "--output-on-failure"]);
    }

    #[test]
    fn test_fallback_to_real_line() {
        let out = "[       OK ] A.B (0 ms)\n\nreal 0m0.042000000s\n";
        assert!((parse_time_or_fallback(Framework::Gtest, out, "A.B") - 0.042).abs() < 1e-9);
        assert_eq!(parse_time_or_fallback(Framework::Gtest, "nothing", "A.B"), 0.0);
    }

    #[test]
    fn test_dispatch_covers_every_kind() {
        for kind in [
            Framework::Gtest,
            Framework::Catch,
            Framework::Doctest,
            Framework::Boost,
            Framework::Qt,
            Framework::GenericCtest,
        ] {
            assert_eq!(framework_for(kind).kind(), kind);
        }
    }
}
