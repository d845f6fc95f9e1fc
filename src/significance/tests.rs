// Scenario tests for the improvement decision
//
// Realistic timing shapes: a clear speedup, a regression hidden behind a
// faster aggregate, noise-floor tests, and jittery no-change runs.

use super::*;
use std::collections::BTreeMap;

fn tests_from(entries: &[(&str, &[f64], &[f64])]) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
    entries
        .iter()
        .map(|(name, old, new)| (name.to_string(), (old.to_vec(), new.to_vec())))
        .collect()
}

/// Two tests, both ~25% faster: accepted with a large effect size.
#[test]
fn test_two_test_speedup_accepted() {
    let old = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
    let new = [0.30, 0.30, 0.31, 0.30, 0.29, 0.31];
    let tests = tests_from(&[("Foo.Alloc", &old, &new), ("Foo.Parse", &old, &new)]);

    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();

    assert!(assessment.is_significant());
    assert!(assessment.criteria.paired_significant);
    assert!(assessment.criteria.no_regressions);
    assert_eq!(assessment.improved_tests.len(), 2);
    assert!(assessment.aggregate.paired_p < 1e-4);
    assert!(assessment.aggregate.cohens_d > 3.0);
    assert!((assessment.overall_change - 0.25).abs() < 0.01);
    assert_eq!(assessment.aggregate.samples, 6);
}

/// A 3 ms test is excluded from per-test significance but still counts in
/// the aggregate.
#[test]
fn test_noise_floor_test_excluded() {
    let slow_old = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
    let slow_new = [0.30, 0.30, 0.31, 0.30, 0.29, 0.31];
    let fast = [0.003; 6];
    let tests = tests_from(&[("TSlow", &slow_old, &slow_new), ("TFast", &fast, &fast)]);

    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();

    assert_eq!(assessment.filtered_tests, vec!["TFast".to_string()]);
    assert!(!assessment.per_test.contains_key("TFast"));
    assert!(!assessment.improved_tests.contains(&"TFast".to_string()));
    assert!(assessment.is_significant());
}

/// Only noise-floor tests: nothing can be counted as improved per test, and
/// without a significant aggregate nothing is accepted.
#[test]
fn test_noise_floor_only() {
    let fast = [0.003; 6];
    let tests = tests_from(&[("TFast", &fast, &fast)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
    assert!(assessment.improved_tests.is_empty());
    assert!(!assessment.is_significant());
}

/// One test regresses while another improves a lot: accepted only because
/// the overall change stays above the decline limit.
#[test]
fn test_regression_offset_by_larger_improvement() {
    let big_old = [1.00, 1.01, 1.00, 0.99, 1.00, 1.01];
    let big_new = [0.60, 0.61, 0.60, 0.59, 0.60, 0.61];
    let small_old = [0.100, 0.101, 0.100, 0.099, 0.100, 0.101];
    let small_new = [0.120, 0.121, 0.120, 0.119, 0.120, 0.121];
    let tests = tests_from(&[("Big", &big_old, &big_new), ("Small", &small_old, &small_new)]);

    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();

    assert_eq!(assessment.regressed_tests, vec!["Small".to_string()]);
    assert_eq!(assessment.improved_tests, vec!["Big".to_string()]);
    assert!(!assessment.criteria.no_regressions);
    assert!(assessment.criteria.improved_with_bounded_decline);
    assert!(assessment.is_significant());
}

/// The same shape is rejected when the decline limit demands more overall
/// improvement than was measured.
#[test]
fn test_decline_limit_rejects() {
    let big_old = [1.00, 1.01, 1.00, 0.99, 1.00, 1.01];
    let big_new = [0.60, 0.61, 0.60, 0.59, 0.60, 0.61];
    let small_old = [0.100, 0.101, 0.100, 0.099, 0.100, 0.101];
    let small_new = [0.120, 0.121, 0.120, 0.119, 0.120, 0.121];
    let tests = tests_from(&[("Big", &big_old, &big_new), ("Small", &small_old, &small_new)]);

    let config = SignificanceConfig {
        overall_decline_limit: 0.5,
        ..SignificanceConfig::default()
    };
    let assessment = assess_improvement(&tests, &config).unwrap();
    assert!(!assessment.criteria.improved_with_bounded_decline);
    assert!(!assessment.is_significant());
}

/// Jitter without a shift must not be reported as an improvement.
#[test]
fn test_no_false_positive_on_jitter() {
    let old = [0.50, 0.52, 0.49, 0.51, 0.50, 0.53, 0.48, 0.51];
    let new = [0.51, 0.49, 0.50, 0.52, 0.50, 0.50, 0.51, 0.49];
    let tests = tests_from(&[("Jitter", &old, &new)]);
    let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
    assert!(!assessment.is_significant());
    assert!(assessment.improved_tests.is_empty());
}

/// A 3% speedup does not satisfy a 5% minimum improvement.
#[test]
fn test_min_improvement_threshold() {
    let old = [1.00, 1.00, 1.01, 0.99, 1.00, 1.00, 1.01, 0.99];
    let new = [0.97, 0.97, 0.98, 0.96, 0.97, 0.97, 0.98, 0.96];
    let tests = tests_from(&[("Small", &old, &new)]);

    let strict = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
    assert!(!strict.is_significant());

    let lenient = SignificanceConfig {
        min_improvement: 0.0,
        ..SignificanceConfig::default()
    };
    let assessment = assess_improvement(&tests, &lenient).unwrap();
    assert!(assessment.is_significant());
}
