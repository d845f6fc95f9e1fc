//! Acceptance decisions of the statistics engine through the public API

use perfminer::significance::{assess_improvement, ImprovementVerdict, SignificanceConfig};
use std::collections::BTreeMap;

const OLD: [f64; 6] = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
const NEW: [f64; 6] = [0.30, 0.30, 0.31, 0.30, 0.29, 0.31];

fn suite(tests: &[(&str, &[f64], &[f64])]) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
    tests
        .iter()
        .map(|(name, old, new)| (name.to_string(), (old.to_vec(), new.to_vec())))
        .collect()
}

#[test]
fn test_clear_speedup_is_accepted() {
    let tests = suite(&[("Foo.A", &OLD, &NEW), ("Foo.B", &OLD, &NEW)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();

    assert!(assessment.is_significant(), "{}", assessment.to_report_string());
    assert!(assessment.criteria.paired_significant);
    assert!(assessment.criteria.no_regressions);
    assert!(assessment.aggregate.paired_p < 1e-4);
    assert!(assessment.aggregate.cohens_d > 3.0);
    assert!((assessment.overall_change - 0.25).abs() < 0.02);
    assert_eq!(assessment.improved_tests, vec!["Foo.A", "Foo.B"]);
}

#[test]
fn test_noise_floor_test_is_excluded() {
    let fast = [0.003; 6];
    let tests = suite(&[("TFast", &fast, &fast), ("TSlow", &OLD, &NEW)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();

    assert_eq!(assessment.filtered_tests, vec!["TFast"]);
    assert!(!assessment.per_test.contains_key("TFast"));
    assert_eq!(assessment.improved_tests, vec!["TSlow"]);
    match &assessment.verdict {
        ImprovementVerdict::Improvement { filtered_count, .. } => assert_eq!(*filtered_count, 1),
        other => panic!("unexpected verdict {:?}", other),
    }
}

#[test]
fn test_identical_timings_are_rejected() {
    let tests = suite(&[("Foo.A", &OLD, &OLD)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
    assert!(!assessment.is_significant());
    assert!(!assessment.criteria.paired_significant);
}

#[test]
fn test_small_speedup_below_required_margin_is_rejected() {
    // 2% faster, 5% required
    let new: Vec<f64> = OLD.iter().map(|t| t * 0.98).collect();
    let tests = suite(&[("Foo.A", &OLD, &new)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
    assert!(!assessment.is_significant());
}

#[test]
fn test_unequal_sample_counts_fail() {
    let tests = suite(&[("Foo.A", &OLD, &NEW[..5])]);
    assert!(assess_improvement(&tests, &SignificanceConfig::default()).is_err());
}
