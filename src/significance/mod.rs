// Statistical confirmation of runtime improvements
//
// Paired old/new timing vectors (one per test, plus their per-repeat sums)
// are compared with five one-sided tests: Welch, paired t, exact sign,
// Wilcoxon signed-rank and Mann-Whitney U. Effect size (Cohen's d),
// confidence intervals and relative improvement complete the record.
//
// Implementation:
// - aprender (crates.io) for Welch's t-test and medians
// - trueno (crates.io) vectors for means/standard deviations
// - f64 Student-t / normal / binomial distributions in `distributions`
//   for the tests aprender does not provide

mod config;
pub mod distributions;
pub mod hypothesis;
mod noise_filter;
mod statistics;
mod verdict;

pub use config::SignificanceConfig;
pub use noise_filter::{coefficient_of_variation, filter_noise_floor, TimingDistribution};
pub use statistics::{compare_timings, median, ComparisonStats};
pub use verdict::{
    assess_improvement, AcceptanceCriteria, ImprovementAssessment, ImprovementVerdict,
};

#[cfg(test)]
mod tests;
