// Thresholds for the improvement decision

use serde::{Deserialize, Serialize};

/// Configuration for significance testing of paired timings
///
/// # Example
/// ```
/// use perfminer::significance::SignificanceConfig;
///
/// let config = SignificanceConfig::default();
/// assert_eq!(config.significance_level, 0.05);
/// assert_eq!(config.scale(), 0.95);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceConfig {
    /// Alpha for every one-sided test
    pub significance_level: f64,

    /// Required relative speedup `m`. Welch, sign and Mann-Whitney compare
    /// `new` against `(1 - m) * old`; the paired tests subtract `m * mean(old)`
    /// from each difference.
    pub min_improvement: f64,

    /// Lowest overall relative change that still allows acceptance when
    /// individual tests regress
    pub overall_decline_limit: f64,

    /// Tests with any measurement at or below this many seconds are excluded
    /// from per-test significance
    pub noise_floor_secs: f64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            min_improvement: 0.05,
            overall_decline_limit: 0.0,
            noise_floor_secs: 0.005,
        }
    }
}

impl SignificanceConfig {
    /// The scale `c = 1 - min_improvement` applied to the baseline.
    pub fn scale(&self) -> f64 {
        1.0 - self.min_improvement
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.significance_level > 0.0 && self.significance_level <= 1.0) {
            return Err(format!(
                "significance_level must be in (0, 1], got {}",
                self.significance_level
            ));
        }
        if !(0.0..1.0).contains(&self.min_improvement) {
            return Err(format!(
                "min_improvement must be in [0, 1), got {}",
                self.min_improvement
            ));
        }
        if self.noise_floor_secs < 0.0 {
            return Err(format!(
                "noise_floor_secs must be non-negative, got {}",
                self.noise_floor_secs
            ));
        }
        Ok(())
    }
}
