// Improvement verdict for a commit pair
//
// Integrates:
// - noise-floor filtering of individual tests
// - per-test comparisons (improved / regressed)
// - the aggregate comparison over per-repeat sums across all tests
//
// Acceptance: the aggregate paired p-value beats alpha AND either no test
// regressed significantly, or at least one test improved significantly
// while the overall change stays above the decline limit. Both criteria
// are reported separately as well.

use crate::significance::config::SignificanceConfig;
use crate::significance::noise_filter::filter_noise_floor;
use crate::significance::statistics::{compare_timings, ComparisonStats};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final verdict for a commit pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImprovementVerdict {
    /// Statistically significant runtime improvement
    Improvement {
        improved_tests: Vec<String>,
        filtered_count: usize,
    },

    /// Measured, but the acceptance criteria were not met
    NoImprovement { reason: String },

    /// Nothing to compare
    InsufficientData { reason: String },
}

/// The individual acceptance criteria.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    /// Aggregate paired p-value below alpha
    pub paired_significant: bool,
    /// No test where old significantly outperforms new
    pub no_regressions: bool,
    /// Some test significantly improved and overall change above the decline limit
    pub improved_with_bounded_decline: bool,
}

impl AcceptanceCriteria {
    pub fn accepted(&self) -> bool {
        self.paired_significant && (self.no_regressions || self.improved_with_bounded_decline)
    }
}

/// Detailed assessment result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementAssessment {
    pub verdict: ImprovementVerdict,
    pub criteria: AcceptanceCriteria,
    /// Comparison of per-repeat sums across all tests
    pub aggregate: ComparisonStats,
    /// Per-test comparisons (noise-floor tests excluded)
    pub per_test: BTreeMap<String, ComparisonStats>,
    pub improved_tests: Vec<String>,
    pub regressed_tests: Vec<String>,
    pub filtered_tests: Vec<String>,
    /// Relative change over every measurement of every test
    pub overall_change: f64,
    pub config: SignificanceConfig,
}

impl ImprovementAssessment {
    pub fn is_significant(&self) -> bool {
        matches!(self.verdict, ImprovementVerdict::Improvement { .. })
    }

    /// Generate human-readable report
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();

        match &self.verdict {
            ImprovementVerdict::Improvement {
                improved_tests,
                filtered_count,
            } => {
                report.push_str(&format!(
                    "IMPROVEMENT CONFIRMED ({} tests improved)\n\n",
                    improved_tests.len()
                ));
                report.push_str(&format!("Improved tests: {}\n", improved_tests.join(", ")));
                report.push_str(&format!("Tests under noise floor: {}\n", filtered_count));
            }
            ImprovementVerdict::NoImprovement { reason } => {
                report.push_str("NO SIGNIFICANT IMPROVEMENT\n\n");
                report.push_str(&format!("Reason: {}\n", reason));
            }
            ImprovementVerdict::InsufficientData { reason } => {
                report.push_str("INSUFFICIENT DATA\n\n");
                report.push_str(&format!("Reason: {}\n", reason));
            }
        }

        report.push_str(&format!(
            "Significance level: {} ({}% confidence)\n",
            self.config.significance_level,
            (1.0 - self.config.significance_level) * 100.0
        ));
        report.push_str(&format!(
            "Overall change: {:+.2}%\n",
            self.overall_change * 100.0
        ));

        let agg = &self.aggregate;
        report.push_str(&format!(
            "\nAggregate (n={}): old={:.2}ms new={:.2}ms d={:.2}\n",
            agg.samples, agg.mean_old_ms, agg.mean_new_ms, agg.cohens_d
        ));
        report.push_str(&format!(
            "  p-values: welch={:.3e} paired={:.3e} sign={:.3e} wilcoxon={:.3e} mann-whitney={:.3e}\n",
            agg.welch_p, agg.paired_p, agg.sign_p, agg.wilcoxon_p, agg.mann_whitney_p
        ));

        if !self.filtered_tests.is_empty() {
            report.push_str(&format!(
                "\nTests under noise floor ({}):\n",
                self.filtered_tests.len()
            ));
            for name in &self.filtered_tests {
                report.push_str(&format!("  - {}\n", name));
            }
        }

        if !self.per_test.is_empty() {
            report.push_str("\nPer-test:\n");
            for (name, stats) in &self.per_test {
                let marker = if self.improved_tests.contains(name) {
                    "+"
                } else if self.regressed_tests.contains(name) {
                    "-"
                } else {
                    " "
                };
                report.push_str(&format!(
                    " {} {} (p={:.4}, old={:.2}ms, new={:.2}ms, rel={:+.1}%)\n",
                    marker,
                    name,
                    stats.paired_p,
                    stats.mean_old_ms,
                    stats.mean_new_ms,
                    stats.relative_improvement * 100.0
                ));
            }
        }

        report
    }
}

/// Assess a commit pair from per-test `(old, new)` samples (warmup removed)
///
/// # Example
/// ```
/// use perfminer::significance::{assess_improvement, SignificanceConfig};
/// use std::collections::BTreeMap;
///
/// let mut tests = BTreeMap::new();
/// tests.insert(
///     "Foo.Bar".to_string(),
///     (vec![0.40, 0.41, 0.40, 0.41, 0.39, 0.40], vec![0.30, 0.30, 0.31, 0.30, 0.29, 0.31]),
/// );
/// let assessment = assess_improvement(&tests, &SignificanceConfig::default()).unwrap();
/// assert!(assessment.is_significant());
/// ```
pub fn assess_improvement(
    tests: &BTreeMap<String, (Vec<f64>, Vec<f64>)>,
    config: &SignificanceConfig,
) -> Result<ImprovementAssessment> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let samples = tests.values().next().map(|(old, _)| old.len()).unwrap_or(0);
    for (name, (old, new)) in tests {
        if old.len() != samples || new.len() != samples {
            bail!(
                "Test {} has {}/{} samples, expected {}",
                name,
                old.len(),
                new.len(),
                samples
            );
        }
    }

    // Step 1: aggregate over per-repeat sums
    let mut agg_old = vec![0.0; samples];
    let mut agg_new = vec![0.0; samples];
    for (old, new) in tests.values() {
        for k in 0..samples {
            agg_old[k] += old[k];
            agg_new[k] += new[k];
        }
    }
    let aggregate = compare_timings(&agg_old, &agg_new, config)?;
    let overall_change = aggregate.relative_improvement;

    // Step 2: per-test comparisons above the noise floor
    let (eligible, filtered_tests) = filter_noise_floor(tests, config.noise_floor_secs);
    let mut per_test = BTreeMap::new();
    let mut improved_tests = Vec::new();
    let mut regressed_tests = Vec::new();
    for (name, (old, new)) in &eligible {
        let stats = compare_timings(old, new, config)?;
        if stats.improved(config.significance_level) {
            improved_tests.push(name.clone());
        } else if stats.regressed(config.significance_level) {
            regressed_tests.push(name.clone());
        }
        per_test.insert(name.clone(), stats);
    }

    // Step 3: verdict
    let criteria = AcceptanceCriteria {
        paired_significant: aggregate.paired_p < config.significance_level,
        no_regressions: regressed_tests.is_empty(),
        improved_with_bounded_decline: !improved_tests.is_empty()
            && overall_change > config.overall_decline_limit,
    };

    let verdict = if samples == 0 || tests.is_empty() {
        ImprovementVerdict::InsufficientData {
            reason: format!("{} tests with {} measurements each", tests.len(), samples),
        }
    } else if criteria.accepted() {
        ImprovementVerdict::Improvement {
            improved_tests: improved_tests.clone(),
            filtered_count: filtered_tests.len(),
        }
    } else if !criteria.paired_significant {
        ImprovementVerdict::NoImprovement {
            reason: format!(
                "aggregate paired p={:.4} >= {}",
                aggregate.paired_p, config.significance_level
            ),
        }
    } else {
        ImprovementVerdict::NoImprovement {
            reason: format!(
                "{} tests regressed and overall change {:+.2}% does not offset them",
                regressed_tests.len(),
                overall_change * 100.0
            ),
        }
    };

    Ok(ImprovementAssessment {
        verdict,
        criteria,
        aggregate,
        per_test,
        improved_tests,
        regressed_tests,
        filtered_tests,
        overall_change,
        config: config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(old: &[f64], new: &[f64]) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
        let mut tests = BTreeMap::new();
        tests.insert("T".to_string(), (old.to_vec(), new.to_vec()));
        tests
    }

    #[test]
    fn test_no_improvement_on_identical() {
        let old = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
        let assessment =
            assess_improvement(&single(&old, &old), &SignificanceConfig::default()).unwrap();
        assert!(!assessment.is_significant());
        assert!(!assessment.criteria.paired_significant);
    }

    #[test]
    fn test_insufficient_data() {
        let assessment =
            assess_improvement(&BTreeMap::new(), &SignificanceConfig::default()).unwrap();
        assert!(matches!(
            assessment.verdict,
            ImprovementVerdict::InsufficientData { .. }
        ));
        assert_eq!(assessment.overall_change, 0.0);
    }

    #[test]
    fn test_ragged_input_rejected() {
        let mut tests = single(&[0.4, 0.4], &[0.3, 0.3]);
        tests.insert("U".to_string(), (vec![0.4], vec![0.3]));
        assert!(assess_improvement(&tests, &SignificanceConfig::default()).is_err());
    }

    #[test]
    fn test_report_strings() {
        let old = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
        let new = [0.30, 0.30, 0.31, 0.30, 0.29, 0.31];
        let assessment =
            assess_improvement(&single(&old, &new), &SignificanceConfig::default()).unwrap();
        let report = assessment.to_report_string();
        assert!(report.contains("IMPROVEMENT CONFIRMED"));
        assert!(report.contains("+ T"));

        let flat = assess_improvement(&single(&old, &old), &SignificanceConfig::default())
            .unwrap()
            .to_report_string();
        assert!(flat.contains("NO SIGNIFICANT IMPROVEMENT"));
    }

    #[test]
    fn test_criteria_combination() {
        let criteria = AcceptanceCriteria {
            paired_significant: true,
            no_regressions: false,
            improved_with_bounded_decline: true,
        };
        assert!(criteria.accepted());
        let criteria = AcceptanceCriteria {
            paired_significant: false,
            no_regressions: true,
            improved_with_bounded_decline: true,
        };
        assert!(!criteria.accepted());
    }
}
