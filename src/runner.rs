//! Paired new/old test execution
//!
//! For every invocation pair and every repeat the two sides run in a
//! coin-flipped order, so both complete before the next repeat starts.
//! Any failing per-test invocation restarts the whole protocol with a
//! single generic `ctest` run per side.

use crate::discovery::DiscoveredTests;
use crate::error::PipelineError;
use crate::frameworks::{framework_for, GTEST_REPEAT};
use crate::model::{Framework, TestInvocation, TimingVector};
use crate::sandbox::{parse_real_line, ExecResult, Sandbox};
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub warmup: usize,
    pub repeats: usize,
    /// Per-invocation time budget
    pub timeout: Duration,
}

impl RunnerSettings {
    pub fn total_runs(&self) -> usize {
        self.warmup + self.repeats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    New,
    Old,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::New => "new",
            Side::Old => "old",
        }
    }
}

/// Timings of one test on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMeasurement {
    pub key: String,
    pub framework: Framework,
    pub new_argv: Vec<String>,
    pub old_argv: Vec<String>,
    pub new: TimingVector,
    pub old: TimingVector,
}

/// Outcome of the paired protocol.
#[derive(Debug, Clone, Default)]
pub struct PairedRun {
    pub measurements: Vec<TestMeasurement>,
    /// The per-test path failed and the suite ran through ctest
    pub generic_fallback: bool,
    /// Order the sides ran in per repeat, new first = true
    pub new_first: Vec<bool>,
    pub log: String,
}

impl PairedRun {
    /// `(old, new)` effective times per test with the warmup prefix removed.
    pub fn vectors(&self, warmup: usize) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
        self.measurements
            .iter()
            .map(|m| (m.key.clone(), (m.old.measured(warmup), m.new.measured(warmup))))
            .collect()
    }

    /// Per-repeat sums across all tests, as timing vectors.
    pub fn aggregate(&self) -> (TimingVector, TimingVector) {
        let len = self.measurements.first().map(|m| m.new.len()).unwrap_or(0);
        let mut new = TimingVector::with_len(len);
        let mut old = TimingVector::with_len(len);
        for m in &self.measurements {
            let (eff_new, eff_old) = (m.new.effective(), m.old.effective());
            for k in 0..len {
                new.parsed[k] += eff_new[k];
                new.wallclock[k] += m.new.wallclock[k];
                old.parsed[k] += eff_old[k];
                old.wallclock[k] += m.old.wallclock[k];
            }
        }
        (new, old)
    }
}

enum Measured {
    Time { parsed: f64, wallclock: f64 },
    Failed(String),
}

pub struct PairedRunner<'a, R: Rng> {
    sandbox: &'a Sandbox,
    settings: RunnerSettings,
    rng: R,
}

impl<'a, R: Rng> PairedRunner<'a, R> {
    pub fn new(sandbox: &'a Sandbox, settings: RunnerSettings, rng: R) -> Self {
        Self {
            sandbox,
            settings,
            rng,
        }
    }

    /// Run the paired protocol; falls back to the generic suite rooted at
    /// `new_ctest_dir`/`old_ctest_dir` when a per-test invocation fails.
    pub fn run(
        &mut self,
        new: &DiscoveredTests,
        old: &DiscoveredTests,
        new_ctest_dir: &str,
        old_ctest_dir: &str,
    ) -> Result<PairedRun> {
        let pairs = pair_invocations(new, old)?;
        let mut run = PairedRun::default();
        match self.run_pairs(&pairs, &mut run)? {
            None => Ok(run),
            Some(reason) if !new.is_generic() => {
                tracing::warn!("Per-test run failed ({}); falling back to ctest", reason);
                let generic_new = DiscoveredTests::generic(new_ctest_dir);
                let generic_old = DiscoveredTests::generic(old_ctest_dir);
                let pairs = pair_invocations(&generic_new, &generic_old)?;
                let mut fallback = PairedRun {
                    generic_fallback: true,
                    log: run.log,
                    ..Default::default()
                };
                match self.run_pairs(&pairs, &mut fallback)? {
                    None => Ok(fallback),
                    Some(reason) => Err(PipelineError::candidate(format!(
                        "generic ctest run failed: {}",
                        reason
                    ))
                    .into()),
                }
            }
            Some(reason) => Err(PipelineError::candidate(format!(
                "generic ctest run failed: {}",
                reason
            ))
            .into()),
        }
    }

    /// Returns the failure reason of the first invocation that could not be measured.
    fn run_pairs(
        &mut self,
        pairs: &[(TestInvocation, TestInvocation)],
        run: &mut PairedRun,
    ) -> Result<Option<String>> {
        let total = self.settings.total_runs();
        for (new_inv, old_inv) in pairs {
            let mut new_tv = TimingVector::with_len(total);
            let mut old_tv = TimingVector::with_len(total);
            for k in 0..total {
                let new_first: bool = self.rng.gen();
                run.new_first.push(new_first);
                let order = if new_first {
                    [Side::New, Side::Old]
                } else {
                    [Side::Old, Side::New]
                };
                for side in order {
                    let (inv, tv) = match side {
                        Side::New => (new_inv, &mut new_tv),
                        Side::Old => (old_inv, &mut old_tv),
                    };
                    match self.measure(inv, side, k, &mut run.log)? {
                        Measured::Time { parsed, wallclock } => tv.record(k, parsed, wallclock),
                        Measured::Failed(reason) => {
                            return Ok(Some(format!("{} {}: {}", side.label(), inv.pairing_key(), reason)));
                        }
                    }
                }
            }
            run.measurements.push(TestMeasurement {
                key: new_inv.pairing_key(),
                framework: new_inv.framework,
                new_argv: new_inv.argv.clone(),
                old_argv: old_inv.argv.clone(),
                new: new_tv,
                old: old_tv,
            });
        }
        Ok(None)
    }

    fn exec(&self, argv: &[String], workdir: &str) -> Result<ExecResult> {
        let result = self
            .sandbox
            .exec(argv, Some(workdir), Some(self.settings.timeout))?;
        if result.timed_out {
            tracing::debug!("Retrying timed-out invocation: {}", argv.join(" "));
            return self
                .sandbox
                .exec(argv, Some(workdir), Some(self.settings.timeout));
        }
        Ok(result)
    }

    fn measure(
        &self,
        inv: &TestInvocation,
        side: Side,
        repeat: usize,
        log: &mut String,
    ) -> Result<Measured> {
        let fw = framework_for(inv.framework);
        let result = self.exec(&inv.argv, &inv.workdir)?;
        let output = result.combined();
        let mut parsed = fw
            .parse_time(&output, &inv.test_name)
            .filter(|t| *t > 0.0)
            .unwrap_or(0.0);

        if parsed == 0.0 && inv.framework == Framework::Gtest && !result.timed_out {
            let mut argv = inv.argv.clone();
            argv.push(format!("--gtest_repeat={}", GTEST_REPEAT));
            let repeated = self.exec(&argv, &inv.workdir)?;
            parsed = fw
                .parse_time(&repeated.combined(), &inv.test_name)
                .map(|total| total / f64::from(GTEST_REPEAT))
                .unwrap_or(0.0);
        }

        log.push_str(&format!(
            "[{} #{}] {} exit={} parsed={:.6} wall={:.6}\n",
            side.label(),
            repeat,
            inv.argv.join(" "),
            result.exit_code,
            parsed,
            result.wallclock
        ));

        if result.timed_out {
            return Ok(Measured::Failed(format!(
                "timed out after {:?}",
                self.settings.timeout
            )));
        }
        if parsed == 0.0 {
            if !result.success() {
                return Ok(Measured::Failed(format!("exit code {}", result.exit_code)));
            }
            parsed = parse_real_line(&result.stdout).unwrap_or(0.0);
        }
        Ok(Measured::Time {
            parsed,
            wallclock: result.wallclock,
        })
    }
}

/// Match new and old invocations by pairing key.
///
/// Both lists must hold the same tests; anything else abandons the pair.
pub fn pair_invocations(
    new: &DiscoveredTests,
    old: &DiscoveredTests,
) -> Result<Vec<(TestInvocation, TestInvocation)>> {
    if new.len() != old.len() {
        return Err(PipelineError::assertion(format!(
            "new tree has {} invocations, old tree has {}",
            new.len(),
            old.len()
        ))
        .into());
    }
    let mut pairs = Vec::with_capacity(new.len());
    for (n, o) in new.invocations.iter().zip(&old.invocations) {
        if n.pairing_key() != o.pairing_key() {
            return Err(PipelineError::assertion(format!(
                "invocation mismatch: {} vs {}",
                n.pairing_key(),
                o.pairing_key()
            ))
            .into());
        }
        pairs.push((n.clone(), o.clone()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeHost;
    use crate::sandbox::{ExecOutput, SandboxSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn sandbox(host: Arc<FakeHost>) -> Sandbox {
        Sandbox::start(
            host,
            SandboxSpec {
                image: "base".into(),
                name: "runner".into(),
                mount_host: PathBuf::from("/tmp/runner"),
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

    fn gtest(tree: &str, name: &str) -> TestInvocation {
        let exe = format!("/t/{}/build/unit", tree);
        TestInvocation {
            argv: framework_for(Framework::Gtest).argv(&exe, name),
            executable: exe,
            framework: Framework::Gtest,
            test_name: name.into(),
            workdir: format!("/t/{}/build", tree),
        }
    }

    fn settings(warmup: usize, repeats: usize) -> RunnerSettings {
        RunnerSettings {
            warmup,
            repeats,
            timeout: Duration::from_secs(60),
        }
    }

    fn out(stdout: String) -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        }
    }

    #[test]
    fn test_shape_and_interleaving() {
        let host = Arc::new(FakeHost::with_responder(|script| {
            let ms = if script.contains("/t/new/") { 30 } else { 40 };
            let name = if script.contains("A.One") { "A.One" } else { "A.Two" };
            out(format!("[       OK ] {} ({} ms)\n", name, ms))
        }));
        let sandbox = sandbox(host.clone());
        let new = DiscoveredTests::from_invocations(vec![gtest("new", "A.One"), gtest("new", "A.Two")]);
        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One"), gtest("old", "A.Two")]);

        let mut runner = PairedRunner::new(&sandbox, settings(1, 4), StdRng::seed_from_u64(7));
        let run = runner.run(&new, &old, "/t/new/build", "/t/old/build").unwrap();

        assert!(!run.generic_fallback);
        assert_eq!(run.measurements.len(), 2);
        for m in &run.measurements {
            assert_eq!(m.new.len(), 5);
            assert_eq!(m.old.len(), 5);
            assert!(m.new.parsed.iter().all(|&t| (t - 0.030).abs() < 1e-12));
            assert!(m.old.parsed.iter().all(|&t| (t - 0.040).abs() < 1e-12));
        }
        assert_eq!(run.new_first.len(), 10);

        // within each repeat both sides ran back to back
        let scripts: Vec<String> = host
            .execs()
            .into_iter()
            .map(|(s, _)| s)
            .filter(|s| s.contains("--gtest_filter"))
            .collect();
        assert_eq!(scripts.len(), 20);
        for pair in scripts.chunks(2) {
            let new_count = pair.iter().filter(|s| s.contains("/t/new/")).count();
            assert_eq!(new_count, 1);
        }

        let vectors = run.vectors(1);
        assert_eq!(vectors["unit::A.One"].0.len(), 4);
        let (agg_new, _) = run.aggregate();
        assert!((agg_new.effective()[0] - 0.060).abs() < 1e-12);
    }

    #[test]
    fn test_coin_flip_balanced() {
        let host = Arc::new(FakeHost::with_responder(|_| {
            out("[       OK ] A.One (5 ms)\n".into())
        }));
        let sandbox = sandbox(host);
        let new = DiscoveredTests::from_invocations(vec![gtest("new", "A.One")]);
        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One")]);
        let mut runner = PairedRunner::new(&sandbox, settings(0, 400), StdRng::seed_from_u64(42));
        let run = runner.run(&new, &old, "/n", "/o").unwrap();
        let firsts = run.new_first.iter().filter(|&&b| b).count();
        assert!((150..=250).contains(&firsts), "unbalanced: {}", firsts);
    }

    #[test]
    fn test_gtest_zero_ms_retries_with_repeat() {
        let host = Arc::new(FakeHost::with_responder(|script| {
            if script.contains("--gtest_repeat=100") {
                out("[       OK ] A.One (1 ms)\n".repeat(100) + "[       OK ] A.One (0 ms)\n")
            } else {
                out("[       OK ] A.One (0 ms)\n".into())
            }
        }));
        let sandbox = sandbox(host);
        let new = DiscoveredTests::from_invocations(vec![gtest("new", "A.One")]);
        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One")]);
        let mut runner = PairedRunner::new(&sandbox, settings(0, 1), StdRng::seed_from_u64(1));
        let run = runner.run(&new, &old, "/n", "/o").unwrap();
        assert!((run.measurements[0].new.parsed[0] - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_failure_falls_back_to_ctest() {
        let host = Arc::new(FakeHost::with_responder(|script| {
            if script.contains("ctest --output-on-failure") {
                out("Total Test time (real) =   2.50 sec\n".into())
            } else if script.contains("--gtest_filter") {
                ExecOutput {
                    exit_code: 1,
                    stdout: "Segmentation fault".into(),
                    stderr: String::new(),
                }
            } else {
                out(String::new())
            }
        }));
        let sandbox = sandbox(host);
        let new = DiscoveredTests::from_invocations(vec![gtest("new", "A.One")]);
        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One")]);
        let mut runner = PairedRunner::new(&sandbox, settings(0, 3), StdRng::seed_from_u64(3));
        let run = runner.run(&new, &old, "/n/build", "/o/build").unwrap();
        assert!(run.generic_fallback);
        assert_eq!(run.measurements.len(), 1);
        assert_eq!(run.measurements[0].key, "ctest::ctest");
        assert_eq!(run.measurements[0].old.parsed, vec![2.5, 2.5, 2.5]);
    }

    #[test]
    fn test_generic_failure_is_candidate_error() {
        let host = Arc::new(FakeHost::with_responder(|script| {
            if script.contains("ctest --output-on-failure") {
                ExecOutput {
                    exit_code: 8,
                    stdout: "The following tests FAILED".into(),
                    stderr: String::new(),
                }
            } else {
                out(String::new())
            }
        }));
        let sandbox = sandbox(host.clone());
        let new = DiscoveredTests::generic("/n");
        let old = DiscoveredTests::generic("/o");
        let mut runner = PairedRunner::new(&sandbox, settings(0, 1), StdRng::seed_from_u64(3));
        let err = runner.run(&new, &old, "/n", "/o").unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::Candidate(_))
        ));
        // no second fallback once already on the generic suite
        let ctest_runs = host
            .execs()
            .into_iter()
            .filter(|(s, _)| s.contains("ctest --output-on-failure"))
            .count();
        assert_eq!(ctest_runs, 1);
    }

    #[test]
    fn test_mismatched_lists_are_assertion_errors() {
        let new = DiscoveredTests::from_invocations(vec![gtest("new", "A.One"), gtest("new", "A.Two")]);
        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One")]);
        let err = pair_invocations(&new, &old).unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::Assertion(_))
        ));

        let old = DiscoveredTests::from_invocations(vec![gtest("old", "A.One"), gtest("old", "A.Three")]);
        assert!(pair_invocations(&new, &old).is_err());
    }
}
