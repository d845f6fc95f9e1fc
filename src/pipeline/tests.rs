// Pipeline scenario tests
//
// In-memory VCS, container host and hosting source. The fake host answers
// the manifest, listing and timing commands of a two-test gtest suite in
// which the new side runs about 25% faster.

use super::*;
use crate::classifier::FilterKind;
use crate::config::PipelineConfig;
use crate::model::{CommitInfo, CommitPair, FileChange, RepoId};
use crate::sandbox::fake::FakeHost;
use crate::sandbox::ExecOutput;
use crate::source::fake::FakeSource;
use crate::source::PullRequestInfo;
use crate::vcs::fake::FakeVcs;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BASE: &str = "b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0";
const PARENT: &str = "1111111111111111111111111111111111111111";
const FAST: &str = "2222222222222222222222222222222222222222";
const TYPO: &str = "3333333333333333333333333333333333333333";

const CMAKELISTS: &str = r#"cmake_minimum_required(VERSION 3.14)
project(demo CXX)
enable_testing()
add_executable(unit unit.cpp)
target_link_libraries(unit gtest_main)
add_test(NAME unit COMMAND unit)
"#;

fn repo() -> RepoId {
    RepoId::new("acme", "parser")
}

fn commit(sha: &str, parents: &[&str], message: &str) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        parents: parents.iter().map(|p| p.to_string()).collect(),
        timestamp: 1_700_000_000,
        message: message.to_string(),
        files: vec![FileChange {
            path: "src/parser.cpp".to_string(),
            status: "modified".to_string(),
            additions: 12,
            deletions: 30,
            patch: Some("@@ -1 +1 @@\n-slow()\n+fast()".to_string()),
        }],
    }
}

fn tree() -> Vec<(&'static str, &'static str)> {
    vec![
        ("CMakeLists.txt", CMAKELISTS),
        ("unit.cpp", "TEST(Foo, A) {}\nTEST(Foo, B) {}\n"),
        ("src/parser.cpp", "int parse() { return 0; }\n"),
    ]
}

fn vcs() -> FakeVcs {
    FakeVcs::default()
        .with_commit(commit(BASE, &[], "Initial import"), &tree())
        .with_commit(commit(PARENT, &[BASE], "Add parser"), &tree())
        .with_commit(
            commit(FAST, &[PARENT], "Optimize hot path in the parser"),
            &tree(),
        )
        .with_commit(commit(TYPO, &[FAST], "Fix typo in comment"), &tree())
}

fn ok(stdout: String) -> ExecOutput {
    ExecOutput {
        stdout,
        ..Default::default()
    }
}

fn manifest(side: &str) -> String {
    format!(
        "add_test(unit \"/test_workspace/workspace/{}/build/unit\")\n",
        side
    )
}

fn gtest_host() -> Arc<FakeHost> {
    let runs = Arc::new(AtomicUsize::new(0));
    Arc::new(FakeHost::with_responder(move |script| {
        if script.contains("cat ") && script.contains("CTestTestfile.cmake") {
            if script.contains("/new/build/CTestTestfile.cmake") {
                ok(manifest("new"))
            } else if script.contains("/old/build/CTestTestfile.cmake") {
                ok(manifest("old"))
            } else {
                ExecOutput {
                    exit_code: 1,
                    ..Default::default()
                }
            }
        } else if script.contains("--gtest_list_tests") {
            ok("Foo.\n  A\n  B\n".to_string())
        } else if script.contains("--gtest_filter=Foo.") {
            let n = runs.fetch_add(1, Ordering::SeqCst);
            let name = if script.contains("Foo.A") { "Foo.A" } else { "Foo.B" };
            let ms = if script.contains("/workspace/new/") {
                300 + (n % 4) * 5
            } else {
                400 + (n % 3) * 5
            };
            ok(format!("[       OK ] {} ({} ms)\n", name, ms))
        } else {
            ok(String::new())
        }
    }))
}

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        warmup: 1,
        commit_test_times: 6,
        filter_kind: FilterKind::Keyword,
        cpuset_cpus: Some("0".to_string()),
        cpus_per_job: 1,
        max_parallel_jobs: 1,
        test_timeout_secs: 30,
        work_dir: dir.join("work"),
        ..PipelineConfig::default()
    }
}

fn coordinator<'a>(
    dir: &Path,
    host: &Arc<FakeHost>,
    vcs: &'a FakeVcs,
    source: &'a FakeSource,
) -> Coordinator<'a> {
    let collab = Collaborators {
        host: host.clone(),
        vcs,
        source,
        chat: None,
    };
    let images = ImagePolicy::new(host.clone(), "perfminer", false);
    Coordinator::new(config(dir), &dir.join("out"), collab, images).unwrap()
}

fn fast_pair() -> CommitPair {
    CommitPair::new(repo(), FAST, PARENT)
}

#[test]
fn test_confirmed_improvement_writes_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let vcs = vcs();
    let source = FakeSource::default();
    let mut coord = coordinator(dir.path(), &host, &vcs, &source);

    let summary = coord.run_commits(vec![fast_pair()]).unwrap();
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.measured, 1, "{}", summary);
    assert_eq!(summary.confirmed, 1, "{}", summary);

    let image = "perfminer:acme-parser-222222222222";
    assert_eq!(host.commits(), vec![image.to_string()]);
    // the container is gone after the commit
    assert_eq!(host.removed().len(), 1);

    let records = coord.store().load(&repo()).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.significant);
    assert_eq!(record.image.as_deref(), Some(image));
    assert_eq!(record.tests.len(), 2);
    assert_eq!(record.repeats, 6);
    assert_eq!(record.aggregate_new.len(), 7);
    assert!(record.overall_change > 0.2);
    assert!(record.new_commands.build.iter().any(|c| c.contains("cmake --build")));
    assert!(record.new_commands.test[0].contains("--gtest_filter=Foo."));
    assert_eq!(record.filter_kind, "keyword");

    let staged: Vec<String> = host.copies().into_iter().map(|(_, to)| to).collect();
    for name in ["new_build.sh", "old_test.sh", "logs/full.log", "logs/results.json"] {
        assert!(
            staged.contains(&format!("/test_workspace/{}", name)),
            "{} not staged: {:?}",
            name,
            staged
        );
    }

    let ledger = fs::read_to_string(coord.ledger().path()).unwrap();
    assert_eq!(ledger, format!("acme/parser | {} | {} | []\n", FAST, PARENT));
}

#[test]
fn test_rerun_skips_evaluated_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let vcs = vcs();
    let source = FakeSource::default();

    coordinator(dir.path(), &host, &vcs, &source)
        .run_commits(vec![fast_pair()])
        .unwrap();
    let created = host.created().len();

    let summary = coordinator(dir.path(), &host, &vcs, &source)
        .run_commits(vec![fast_pair(), fast_pair()])
        .unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.already_done, 1);
    assert_eq!(summary.measured, 0);
    assert_eq!(host.created().len(), created);
}

#[test]
fn test_existing_image_skips_pair() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    host.add_image("perfminer:acme-parser-222222222222");
    let vcs = vcs();
    let source = FakeSource::default();

    let summary = coordinator(dir.path(), &host, &vcs, &source)
        .run_commits(vec![fast_pair()])
        .unwrap();
    assert_eq!(summary.image_exists, 1);
    assert!(host.created().is_empty());
    // still recorded as accepted
    assert_eq!(summary.accepted, 1);
}

#[test]
fn test_rejected_commit_never_reaches_a_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let vcs = vcs();
    let source = FakeSource::default();
    let mut coord = coordinator(dir.path(), &host, &vcs, &source);

    let summary = coord
        .run_commits(vec![CommitPair::new(repo(), TYPO, FAST)])
        .unwrap();
    assert_eq!(summary.rejected, 1);
    assert!(host.created().is_empty());
    assert!(!coord.ledger().path().exists());
}

#[test]
fn test_unknown_commit_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let vcs = vcs();
    let source = FakeSource::default();
    let missing = CommitPair::new(repo(), "abcdef0", PARENT);

    let summary = coordinator(dir.path(), &host, &vcs, &source)
        .run_commits(vec![missing])
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.accepted, 0);
}

#[test]
fn test_repository_mode_pairs_merged_pull_requests_with_merge_base() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let vcs = vcs();
    let mut source = FakeSource::default();
    source.pulls.insert(
        7,
        PullRequestInfo {
            number: 7,
            body: "Speeds up parsing".to_string(),
            merged: true,
            head_sha: "4444444444444444444444444444444444444444".to_string(),
            base_sha: BASE.to_string(),
            merge_commit_sha: Some(FAST.to_string()),
        },
    );
    source.commit_pulls.insert(FAST.to_string(), vec![7]);
    source
        .pull_commits
        .insert(7, vec!["5555555".to_string(), "6666666".to_string()]);

    let mut coord = coordinator(dir.path(), &host, &vcs, &source).with_dry_run(true);
    let summary = coord.run_repos(&[repo()]).unwrap();

    // the root commit has no parent to compare against
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.rejected, 2);
    assert!(host.created().is_empty());

    let pairs = coord.ledger().read().unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].new_sha, FAST);
    assert_eq!(pairs[0].old_sha, BASE);
    assert_eq!(pairs[0].pr_shas, vec!["5555555", "6666666"]);
}

#[test]
fn test_build_without_tests_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let host = gtest_host();
    let bare = [("CMakeLists.txt", "project(demo)\nadd_library(p src/parser.cpp)\n")];
    let vcs = FakeVcs::default()
        .with_commit(commit(PARENT, &[BASE], "Add parser"), &bare)
        .with_commit(commit(FAST, &[PARENT], "Optimize hot path"), &bare);
    let source = FakeSource::default();

    let summary = coordinator(dir.path(), &host, &vcs, &source)
        .run_commits(vec![fast_pair()])
        .unwrap();
    assert_eq!(summary.skipped, 1, "{}", summary);
    assert!(host.created().is_empty());
    assert!(host.commits().is_empty());
}

#[test]
fn test_summary_display() {
    let summary = RunSummary {
        candidates: 3,
        rejected: 1,
        accepted: 2,
        measured: 2,
        confirmed: 1,
        ..RunSummary::default()
    };
    let text = summary.to_string();
    assert!(text.starts_with("3 candidate(s): 1 rejected, 2 accepted"));
    assert!(text.contains("1 confirmed"));
}
