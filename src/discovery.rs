//! Test discovery inside a configured build tree
//!
//! Per-test path: read the CTest manifests under the enable-testing
//! directory, list each executable's tests with the framework's list
//! flag and emit one invocation per (executable, test). Generic path: a
//! single `ctest --output-on-failure` run of the whole suite.

use crate::buildmeta::collect_executables;
use crate::buildmeta::ctest::MANIFEST_NAME;
use crate::frameworks::{framework_for, GenericCtest};
use crate::model::{Framework, TestInvocation};
use crate::sandbox::{shell_quote, Sandbox};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Invocations for one tree, indexed by serialized argv.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredTests {
    pub invocations: Vec<TestInvocation>,
    pub unit_tests_map: BTreeMap<String, TestInvocation>,
}

impl DiscoveredTests {
    pub fn from_invocations(mut invocations: Vec<TestInvocation>) -> Self {
        invocations.sort_by_key(|inv| inv.pairing_key());
        invocations.dedup_by(|a, b| a.pairing_key() == b.pairing_key());
        let unit_tests_map = invocations
            .iter()
            .map(|inv| (inv.argv_key(), inv.clone()))
            .collect();
        Self {
            invocations,
            unit_tests_map,
        }
    }

    /// The whole suite through the test driver, rooted at `ctest_dir`.
    pub fn generic(ctest_dir: &str) -> Self {
        Self::from_invocations(vec![TestInvocation {
            executable: "ctest".to_string(),
            framework: Framework::GenericCtest,
            test_name: "ctest".to_string(),
            argv: GenericCtest::suite_argv(),
            workdir: ctest_dir.to_string(),
        }])
    }

    pub fn is_generic(&self) -> bool {
        self.invocations
            .iter()
            .all(|inv| inv.framework == Framework::GenericCtest)
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn lookup(&self, argv: &[String]) -> Option<&TestInvocation> {
        self.unit_tests_map.get(&argv.join(" "))
    }
}

pub struct TestDiscovery<'a> {
    sandbox: &'a Sandbox,
    list_timeout: Duration,
}

impl<'a> TestDiscovery<'a> {
    pub fn new(sandbox: &'a Sandbox, list_timeout: Duration) -> Self {
        Self {
            sandbox,
            list_timeout,
        }
    }

    /// Test executables registered under `ctest_dir`, following `subdirs`.
    pub fn executables(&self, ctest_dir: &str) -> Result<BTreeSet<String>> {
        collect_executables(Path::new(ctest_dir), |path| {
            let result = self.sandbox.shell(
                &format!("cat {}", shell_quote(&path.to_string_lossy())),
                None,
                None,
            )?;
            if result.success() {
                Ok(Some(result.stdout_body().to_string()))
            } else {
                Ok(None)
            }
        })
    }

    /// Test names `executable` reports through the framework's list flag.
    pub fn list_tests(&self, executable: &str, framework: Framework, workdir: &str) -> Result<Vec<String>> {
        let fw = framework_for(framework);
        let mut argv = vec![executable.to_string()];
        argv.extend(fw.list_flags().iter().map(|f| f.to_string()));
        let result = self
            .sandbox
            .exec(&argv, Some(workdir), Some(self.list_timeout))?;
        if !result.success() || result.timed_out {
            tracing::debug!(
                "Listing {} with {} failed (exit {})",
                executable,
                framework,
                result.exit_code
            );
            return Ok(Vec::new());
        }
        // Boost writes its listing to stderr
        let listing = format!("{}\n{}", result.stdout_body(), result.stderr);
        Ok(fw.parse_list(&listing))
    }

    /// Per-test invocations for `framework` under `ctest_dir`.
    ///
    /// Executables that cannot list their tests contribute nothing; the
    /// result is empty when no executable could be enumerated.
    pub fn discover(&self, framework: Framework, ctest_dir: &str) -> Result<DiscoveredTests> {
        if framework == Framework::GenericCtest {
            return Ok(DiscoveredTests::generic(ctest_dir));
        }
        let fw = framework_for(framework);
        let executables = self.executables(ctest_dir)?;
        tracing::info!(
            "Found {} test executable(s) in {}/{}",
            executables.len(),
            ctest_dir,
            MANIFEST_NAME
        );

        let mut invocations = Vec::new();
        for executable in &executables {
            let names = self.list_tests(executable, framework, ctest_dir)?;
            tracing::debug!("{}: {} {} test(s)", executable, names.len(), framework);
            for name in names {
                invocations.push(TestInvocation {
                    executable: executable.clone(),
                    framework,
                    argv: fw.argv(executable, &name),
                    test_name: name,
                    workdir: ctest_dir.to_string(),
                });
            }
        }
        Ok(DiscoveredTests::from_invocations(invocations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeHost;
    use crate::sandbox::{ExecOutput, SandboxSpec};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn sandbox(host: Arc<FakeHost>) -> Sandbox {
        Sandbox::start(
            host,
            SandboxSpec {
                image: "base".into(),
                name: "disc".into(),
                mount_host: PathBuf::from("/tmp/disc"),
                mount_target: "/workspace".into(),
                test_dir: "/test_workspace".into(),
                cpuset: None,
                mem_limit: None,
                memswap_limit: None,
                cpu_quota: None,
                cpu_period: None,
            },
        )
        .unwrap()
    }

    fn ok(stdout: &str) -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            stdout: format!("{}\nreal 0m0.001000000s\n", stdout),
            stderr: String::new(),
        }
    }

    fn gtest_host() -> Arc<FakeHost> {
        let host = Arc::new(FakeHost::with_responder(|script| {
            if script.contains("cat /b/CTestTestfile.cmake") {
                ok("add_test(unit \"/b/unit\")\nsubdirs(\"tools\")")
            } else if script.contains("cat /b/tools/CTestTestfile.cmake") {
                ok("add_test(tool /b/tools/tool_test)\nadd_test(gone NOT_AVAILABLE)")
            } else if script.contains("/b/unit --gtest_list_tests") {
                ok("Vec.\n  Push\n  Pop\n")
            } else if script.contains("/b/tools/tool_test --gtest_list_tests") {
                ok("Tool.\n  Run\n")
            } else if script.contains("cat ") {
                ExecOutput {
                    exit_code: 1,
                    ..Default::default()
                }
            } else {
                ok("")
            }
        }));
        host.add_dir("/b");
        host
    }

    #[test]
    fn test_discovers_gtest_invocations() {
        let host = gtest_host();
        let sandbox = sandbox(host);
        let discovery = TestDiscovery::new(&sandbox, Duration::from_secs(30));

        let exes = discovery.executables("/b").unwrap();
        assert_eq!(
            exes.into_iter().collect::<Vec<_>>(),
            vec!["/b/tools/tool_test", "/b/unit"]
        );

        let found = discovery.discover(Framework::Gtest, "/b").unwrap();
        assert_eq!(found.len(), 3);
        assert!(!found.is_generic());
        let keys: Vec<String> = found.invocations.iter().map(|i| i.pairing_key()).collect();
        assert_eq!(keys, vec!["tool_test::Tool.Run", "unit::Vec.Pop", "unit::Vec.Push"]);

        let argv = vec![
            "/b/unit".to_string(),
            "--gtest_filter=Vec.Push".to_string(),
            "--gtest_print_time".to_string(),
        ];
        let inv = found.lookup(&argv).unwrap();
        assert_eq!(inv.test_name, "Vec.Push");
        assert_eq!(inv.workdir, "/b");
    }

    #[test]
    fn test_unlistable_executable_yields_nothing() {
        let host = Arc::new(FakeHost::with_responder(|script| {
            if script.contains("cat /b/CTestTestfile.cmake") {
                ok("add_test(script /usr/bin/python3 run.py)")
            } else if script.contains("--list-test-names-only") {
                ExecOutput {
                    exit_code: 2,
                    stdout: String::new(),
                    stderr: "unknown option".into(),
                }
            } else {
                ok("")
            }
        }));
        let sandbox = sandbox(host);
        let discovery = TestDiscovery::new(&sandbox, Duration::from_secs(30));
        let found = discovery.discover(Framework::Catch, "/b").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_generic_invocation() {
        let found = DiscoveredTests::generic("/b");
        assert!(found.is_generic());
        assert_eq!(found.invocations[0].argv, vec!["ctest", "--output-on-failure"]);
        assert_eq!(found.invocations[0].workdir, "/b");
    }
}
