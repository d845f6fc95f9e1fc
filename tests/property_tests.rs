//! Property-based invariants
//!
//! 1. Package-name normalization
//! 2. Guard folding over if/elseif/else stacks
//! 3. Ledger dedup and PR-list union
//! 4. Statistics bounds

use perfminer::buildmeta::{normalize_package_name, ConditionStack};
use perfminer::model::{CommitPair, RepoId};
use perfminer::pipeline::merge_pairs;
use perfminer::significance::{compare_timings, SignificanceConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_normalization_is_idempotent(raw in "[A-Za-z][A-Za-z0-9+_.-]{0,20}( ?[<>=]{1,2} ?[0-9.]{1,6})?") {
        let once = normalize_package_name(&raw);
        prop_assert_eq!(normalize_package_name(&once), once.clone());
        prop_assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
        prop_assert!(!once.contains("++"));
    }

    #[test]
    fn prop_version_suffix_dropped(name in "[a-z][a-z]{1,12}", major in 0u32..20, minor in 0u32..20) {
        prop_assert_eq!(normalize_package_name(&format!("{}-{}.{}", name, major, minor)), name.clone());
        prop_assert_eq!(normalize_package_name(&format!("{} >= {}.{}", name, major, minor)), name);
    }
}

#[derive(Debug, Clone)]
enum Block {
    If,
    ElseIf,
    Else,
    EndIf,
}

fn block() -> impl Strategy<Value = Block> {
    prop_oneof![Just(Block::If), Just(Block::ElseIf), Just(Block::Else), Just(Block::EndIf)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_guard_folding(ops in prop::collection::vec(block(), 0..30)) {
        let mut stack = ConditionStack::new();
        let mut open = 0usize;
        for (i, op) in ops.iter().enumerate() {
            match op {
                Block::If => {
                    stack.push_if(&format!("C{}", i));
                    open += 1;
                }
                Block::ElseIf if open > 0 => stack.push_elseif(&format!("C{}", i)),
                Block::Else if open > 0 => stack.push_else(),
                Block::EndIf => {
                    stack.pop_endif();
                    open = open.saturating_sub(1);
                }
                _ => {}
            }
            prop_assert_eq!(stack.depth(), open);
            // at most one positive term per open group
            let positives = stack.guards().iter().filter(|t| t.holds).count();
            prop_assert!(positives <= open);
        }
        for _ in 0..open {
            stack.pop_endif();
        }
        prop_assert!(stack.guards().is_empty());
    }
}

fn sha() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["aaaaaaa", "bbbbbbb", "ccccccc", "ddddddd"]).prop_map(str::to_string)
}

fn pair() -> impl Strategy<Value = CommitPair> {
    (sha(), sha(), prop::collection::vec(sha(), 0..3)).prop_map(|(new, old, prs)| {
        let mut p = CommitPair::new(RepoId::new("a", "b"), new, old);
        p.pr_shas = prs;
        p
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_merge_is_sorted_unique_and_keeps_every_pr(
        existing in prop::collection::vec(pair(), 0..8),
        incoming in prop::collection::vec(pair(), 0..8),
    ) {
        let merged = merge_pairs(existing.clone(), &incoming);
        for w in merged.windows(2) {
            prop_assert!((&w[0].new_sha, &w[0].old_sha) < (&w[1].new_sha, &w[1].old_sha));
        }
        for p in existing.iter().chain(incoming.iter()) {
            let m = merged
                .iter()
                .find(|m| m.key() == p.key())
                .expect("every input triple survives");
            for pr in &p.pr_shas {
                prop_assert!(m.pr_shas.contains(pr));
            }
        }
        // merging again changes nothing
        prop_assert_eq!(merge_pairs(merged.clone(), &incoming), merged);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_statistics_bounds(
        samples in prop::collection::vec((0.01f64..2.0, 0.01f64..2.0), 2..20),
    ) {
        let (old, new): (Vec<f64>, Vec<f64>) = samples.into_iter().unzip();
        let stats = compare_timings(&old, &new, &SignificanceConfig::default()).unwrap();
        for p in [
            stats.welch_p,
            stats.paired_p,
            stats.sign_p,
            stats.wilcoxon_p,
            stats.mann_whitney_p,
            stats.regression_p,
        ] {
            prop_assert!((0.0..=1.0).contains(&p), "p-value {} out of range", p);
        }
        prop_assert!(stats.ci95_old_ms.0 <= stats.ci95_old_ms.1);
        prop_assert!(stats.ci99_new_ms.0 <= stats.ci99_new_ms.1);
        prop_assert!(stats.relative_improvement < 1.0);
    }
}
