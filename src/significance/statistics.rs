// Battery of statistical comparisons between old and new timing vectors
//
// For one (old, new) pair of equal-length vectors (warmup removed):
// - Welch's one-sided t-test of new against c*old (aprender ttest_ind)
// - paired t-test on old - new - m*mean(old)
// - exact sign test on new < c*old
// - Wilcoxon signed-rank on the same adjusted differences
// - Mann-Whitney U of new against c*old
// - Cohen's d, 95%/99% confidence intervals, relative improvement
//
// Medians come from aprender's DescriptiveStats over a trueno Vector.

use super::config::SignificanceConfig;
use super::hypothesis::{
    cohens_d, confidence_interval_ms, mann_whitney_less, mean, paired_t_greater,
    relative_improvement, sign_test_greater, welch_less, wilcoxon_signed_rank_greater,
};
use super::noise_filter::coefficient_of_variation;
use anyhow::{bail, Result};
use aprender::stats::DescriptiveStats;
use serde::{Deserialize, Serialize};
use trueno::Vector;

/// Everything computed for one paired comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonStats {
    pub samples: usize,
    pub mean_old_ms: f64,
    pub mean_new_ms: f64,
    pub median_old_ms: f64,
    pub median_new_ms: f64,
    pub cv_old: f64,
    pub cv_new: f64,

    pub welch_p: f64,
    pub paired_p: f64,
    pub sign_p: f64,
    pub wilcoxon_p: f64,
    pub mann_whitney_p: f64,
    /// Paired t-test p-value for "new is slower than old"
    pub regression_p: f64,

    pub cohens_d: f64,
    pub ci95_old_ms: (f64, f64),
    pub ci95_new_ms: (f64, f64),
    pub ci99_old_ms: (f64, f64),
    pub ci99_new_ms: (f64, f64),
    pub relative_improvement: f64,
}

impl ComparisonStats {
    /// Neutral values for an empty comparison.
    pub fn empty() -> Self {
        Self {
            samples: 0,
            mean_old_ms: 0.0,
            mean_new_ms: 0.0,
            median_old_ms: 0.0,
            median_new_ms: 0.0,
            cv_old: 0.0,
            cv_new: 0.0,
            welch_p: 1.0,
            paired_p: 1.0,
            sign_p: 1.0,
            wilcoxon_p: 1.0,
            mann_whitney_p: 1.0,
            regression_p: 1.0,
            cohens_d: 0.0,
            ci95_old_ms: (0.0, 0.0),
            ci95_new_ms: (0.0, 0.0),
            ci99_old_ms: (0.0, 0.0),
            ci99_new_ms: (0.0, 0.0),
            relative_improvement: 0.0,
        }
    }

    /// New significantly faster than old (paired test against alpha).
    pub fn improved(&self, alpha: f64) -> bool {
        self.paired_p < alpha
    }

    /// Old significantly faster than new.
    pub fn regressed(&self, alpha: f64) -> bool {
        self.regression_p < alpha
    }
}

/// Compare one pair of timing vectors
///
/// # Example
/// ```
/// use perfminer::significance::{compare_timings, SignificanceConfig};
///
/// let old = [0.40, 0.41, 0.40, 0.41, 0.39, 0.40];
/// let new = [0.30, 0.30, 0.31, 0.30, 0.29, 0.31];
/// let stats = compare_timings(&old, &new, &SignificanceConfig::default()).unwrap();
/// assert!(stats.paired_p < 0.05);
/// assert!(stats.cohens_d > 3.0);
/// ```
pub fn compare_timings(
    old: &[f64],
    new: &[f64],
    config: &SignificanceConfig,
) -> Result<ComparisonStats> {
    if old.len() != new.len() {
        bail!(
            "Timing vectors differ in length: old={}, new={}",
            old.len(),
            new.len()
        );
    }
    if old.is_empty() {
        return Ok(ComparisonStats::empty());
    }

    let c = config.scale();
    let scaled_old: Vec<f64> = old.iter().map(|t| t * c).collect();
    let shift = config.min_improvement * mean(old);
    let adjusted: Vec<f64> = old
        .iter()
        .zip(new)
        .map(|(o, n)| o - n - shift)
        .collect();
    let slowdown: Vec<f64> = old.iter().zip(new).map(|(o, n)| n - o).collect();

    let (mut wins, mut losses) = (0, 0);
    for (n, so) in new.iter().zip(&scaled_old) {
        if n < so {
            wins += 1;
        } else if n > so {
            losses += 1;
        }
    }

    Ok(ComparisonStats {
        samples: old.len(),
        mean_old_ms: mean(old) * 1000.0,
        mean_new_ms: mean(new) * 1000.0,
        median_old_ms: median(old) * 1000.0,
        median_new_ms: median(new) * 1000.0,
        cv_old: coefficient_of_variation(old),
        cv_new: coefficient_of_variation(new),
        welch_p: welch_less(new, &scaled_old).pvalue,
        paired_p: paired_t_greater(&adjusted).pvalue,
        sign_p: sign_test_greater(wins, losses).pvalue,
        wilcoxon_p: wilcoxon_signed_rank_greater(&adjusted).pvalue,
        mann_whitney_p: mann_whitney_less(new, &scaled_old).pvalue,
        regression_p: paired_t_greater(&slowdown).pvalue,
        cohens_d: cohens_d(old, new),
        ci95_old_ms: confidence_interval_ms(old, 0.95),
        ci95_new_ms: confidence_interval_ms(new, 0.95),
        ci99_old_ms: confidence_interval_ms(old, 0.99),
        ci99_new_ms: confidence_interval_ms(new, 0.99),
        relative_improvement: relative_improvement(old, new),
    })
}

/// Median via aprender's DescriptiveStats; 0 for an empty sample.
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let as_f32: Vec<f32> = samples.iter().map(|&v| v as f32).collect();
    let vector = Vector::from_slice(&as_f32);
    let stats = DescriptiveStats::new(&vector);
    match stats.quantile(0.5) {
        Ok(m) => f64::from(m),
        Err(e) => {
            tracing::warn!("Failed to compute median: {}", e);
            0.0
        }
    }
}
