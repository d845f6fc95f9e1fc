// One-sided hypothesis tests over paired timing vectors
//
// Every test is oriented so that a small p-value means "the new side is
// faster". Degenerate inputs (too few samples, zero variance, all ties)
// yield the neutral p = 1 unless the data is unambiguous.

use super::distributions::{
    binomial_half_sf, normal_sf, student_t_quantile, student_t_sf,
};

/// Statistic and one-sided p-value of a test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub pvalue: f64,
}

impl TestOutcome {
    pub fn neutral() -> Self {
        Self {
            statistic: 0.0,
            pvalue: 1.0,
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator).
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Welch's t-test, H1: `mean(new) < mean(baseline)`.
///
/// Uses aprender's `ttest_ind` (unequal variances) and converts its
/// two-tailed p-value; falls back to the f64 computation when aprender
/// rejects the input (e.g. zero variance on both sides).
pub fn welch_less(new: &[f64], baseline: &[f64]) -> TestOutcome {
    if new.len() < 2 || baseline.len() < 2 {
        return TestOutcome::neutral();
    }
    let a: Vec<f32> = new.iter().map(|&v| v as f32).collect();
    let b: Vec<f32> = baseline.iter().map(|&v| v as f32).collect();

    match aprender::stats::hypothesis::ttest_ind(&a, &b, false) {
        Ok(result) if result.pvalue.is_finite() && result.statistic.is_finite() => {
            let two_tailed = f64::from(result.pvalue).clamp(0.0, 1.0);
            let statistic = f64::from(result.statistic);
            let pvalue = if statistic < 0.0 {
                two_tailed / 2.0
            } else {
                1.0 - two_tailed / 2.0
            };
            TestOutcome { statistic, pvalue }
        }
        _ => welch_less_f64(new, baseline),
    }
}

fn welch_less_f64(new: &[f64], baseline: &[f64]) -> TestOutcome {
    let (n1, n2) = (new.len() as f64, baseline.len() as f64);
    let (v1, v2) = (sample_variance(new) / n1, sample_variance(baseline) / n2);
    let diff = mean(new) - mean(baseline);
    let se = (v1 + v2).sqrt();
    if negligible_spread(se, mean(new).abs().max(mean(baseline).abs())) {
        return degenerate(-diff);
    }
    let statistic = diff / se;
    let df = (v1 + v2).powi(2) / (v1 * v1 / (n1 - 1.0) + v2 * v2 / (n2 - 1.0));
    TestOutcome {
        statistic,
        pvalue: student_t_sf(-statistic, df),
    }
}

/// One-sample t-test on differences, H1: `mean(diffs) > 0`.
pub fn paired_t_greater(diffs: &[f64]) -> TestOutcome {
    let n = diffs.len();
    if n < 2 {
        return TestOutcome::neutral();
    }
    let m = mean(diffs);
    let sd = sample_variance(diffs).sqrt();
    if negligible_spread(sd, m.abs()) {
        return degenerate(m);
    }
    let statistic = m / (sd / (n as f64).sqrt());
    TestOutcome {
        statistic,
        pvalue: student_t_sf(statistic, (n - 1) as f64),
    }
}

/// Spread that is rounding noise relative to `scale` (constant inputs
/// rarely give an exact 0.0 variance in floating point).
fn negligible_spread(spread: f64, scale: f64) -> bool {
    spread <= 1e-12 * scale.max(1e-300)
}

/// Zero-variance outcome: unambiguous if the shift is in the tested direction.
fn degenerate(shift: f64) -> TestOutcome {
    if shift > 0.0 {
        TestOutcome {
            statistic: f64::INFINITY,
            pvalue: 0.0,
        }
    } else {
        TestOutcome {
            statistic: if shift < 0.0 { f64::NEG_INFINITY } else { 0.0 },
            pvalue: 1.0,
        }
    }
}

/// Exact binomial sign test, H1: successes dominate.
///
/// `successes` and `failures` exclude ties; with no non-tied pairs the
/// test is undefined and the neutral outcome is returned.
pub fn sign_test_greater(successes: usize, failures: usize) -> TestOutcome {
    let trials = successes + failures;
    if trials == 0 {
        return TestOutcome::neutral();
    }
    TestOutcome {
        statistic: successes as f64,
        pvalue: binomial_half_sf(successes as u64, trials as u64),
    }
}

/// Average ranks (1-based) and the sizes of tie groups.
pub fn rank_with_ties(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        if j > i {
            ties.push(j - i + 1);
        }
        i = j + 1;
    }
    (ranks, ties)
}

/// Largest sample handled by the exact signed-rank distribution.
const WILCOXON_EXACT_MAX_N: usize = 25;

/// Wilcoxon signed-rank test, H1: differences are shifted above zero.
///
/// Zero differences are dropped. Exact null distribution for small tie-free
/// samples; normal approximation with tie and continuity correction otherwise.
pub fn wilcoxon_signed_rank_greater(diffs: &[f64]) -> TestOutcome {
    let nonzero: Vec<f64> = diffs.iter().copied().filter(|d| *d != 0.0).collect();
    let n = nonzero.len();
    if n == 0 {
        return TestOutcome::neutral();
    }
    let magnitudes: Vec<f64> = nonzero.iter().map(|d| d.abs()).collect();
    let (ranks, ties) = rank_with_ties(&magnitudes);
    let w_plus: f64 = nonzero
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| *r)
        .sum();

    if ties.is_empty() && n <= WILCOXON_EXACT_MAX_N {
        return TestOutcome {
            statistic: w_plus,
            pvalue: signed_rank_exact_sf(w_plus.round() as usize, n),
        };
    }

    let nf = n as f64;
    let expected = nf * (nf + 1.0) / 4.0;
    let tie_term: f64 = ties.iter().map(|&t| (t.pow(3) - t) as f64).sum::<f64>() / 48.0;
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term;
    if variance <= 0.0 {
        return TestOutcome::neutral();
    }
    let z = (w_plus - expected - 0.5) / variance.sqrt();
    TestOutcome {
        statistic: w_plus,
        pvalue: normal_sf(z),
    }
}

/// `P(W+ >= w)` under the null for `n` untied ranks.
fn signed_rank_exact_sf(w: usize, n: usize) -> f64 {
    let max_sum = n * (n + 1) / 2;
    // counts[s] = number of rank subsets summing to s
    let mut counts = vec![0f64; max_sum + 1];
    counts[0] = 1.0;
    for rank in 1..=n {
        for s in (rank..=max_sum).rev() {
            counts[s] += counts[s - rank];
        }
    }
    let total = 2f64.powi(n as i32);
    let tail: f64 = counts.iter().skip(w.min(max_sum + 1)).sum();
    (tail / total).min(1.0)
}

/// Mann-Whitney U test, H1: `x` tends to be smaller than `y`.
///
/// U counts pairs with `x_i < y_j` (ties count half). Normal approximation
/// with tie and continuity correction.
pub fn mann_whitney_less(x: &[f64], y: &[f64]) -> TestOutcome {
    let (n1, n2) = (x.len(), y.len());
    if n1 == 0 || n2 == 0 {
        return TestOutcome::neutral();
    }
    let mut u = 0.0;
    for xi in x {
        for yj in y {
            if xi < yj {
                u += 1.0;
            } else if xi == yj {
                u += 0.5;
            }
        }
    }

    let combined: Vec<f64> = x.iter().chain(y).copied().collect();
    let (_, ties) = rank_with_ties(&combined);
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let n = n1f + n2f;
    let expected = n1f * n2f / 2.0;
    let tie_term: f64 = ties.iter().map(|&t| (t.pow(3) - t) as f64).sum();
    let variance = n1f * n2f / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if variance <= 0.0 {
        return TestOutcome {
            statistic: u,
            pvalue: 1.0,
        };
    }
    let z = (u - expected - 0.5) / variance.sqrt();
    TestOutcome {
        statistic: u,
        pvalue: normal_sf(z),
    }
}

/// Cohen's d with pooled standard deviation; positive when `new` is faster.
pub fn cohens_d(old: &[f64], new: &[f64]) -> f64 {
    let (n1, n2) = (old.len(), new.len());
    if n1 < 2 || n2 < 2 {
        return 0.0;
    }
    let pooled = (((n1 - 1) as f64 * sample_variance(old) + (n2 - 1) as f64 * sample_variance(new))
        / (n1 + n2 - 2) as f64)
        .sqrt();
    if pooled == 0.0 {
        return 0.0;
    }
    (mean(old) - mean(new)) / pooled
}

/// Confidence interval of the mean, in milliseconds; `(0, 0)` for `n < 2`.
pub fn confidence_interval_ms(values: &[f64], level: f64) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let m = mean(values);
    let half = student_t_quantile((1.0 + level) / 2.0, (n - 1) as f64)
        * (sample_variance(values) / n as f64).sqrt();
    ((m - half) * 1000.0, (m + half) * 1000.0)
}

/// `(sum(old) - sum(new)) / sum(old)`; 0 when `sum(old) == 0`.
pub fn relative_improvement(old: &[f64], new: &[f64]) -> f64 {
    let old_sum: f64 = old.iter().sum();
    if old_sum == 0.0 {
        return 0.0;
    }
    (old_sum - new.iter().sum::<f64>()) / old_sum
}
