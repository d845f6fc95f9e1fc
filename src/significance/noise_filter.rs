// Noise handling for per-test timing vectors
//
// Two filters:
// - Noise floor: a test with any measurement at or below the floor (5 ms by
//   default) is dominated by process start-up and scheduler jitter; it is
//   kept in the aggregate but excluded from per-test significance.
// - Coefficient of variation, reported per test so unstable measurements
//   are visible in the record.

use std::collections::BTreeMap;
use trueno::Vector;

/// Paired timing samples for one test (seconds, warmup already removed).
#[derive(Debug, Clone)]
pub struct TimingDistribution {
    pub name: String,
    pub old: Vec<f64>,
    pub new: Vec<f64>,
}

impl TimingDistribution {
    /// True when any single measurement on either side is at or below `floor`.
    pub fn below_noise_floor(&self, floor: f64) -> bool {
        self.old.iter().chain(&self.new).any(|&t| t <= floor)
    }
}

/// Coefficient of variation (std_dev / mean) of a sample
///
/// - CV near 0: very stable
/// - CV near 1: std equals mean
pub fn coefficient_of_variation(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let as_f32: Vec<f32> = samples.iter().map(|&v| v as f32).collect();
    let vec = Vector::from_slice(&as_f32);

    let Ok(mean) = vec.mean() else {
        return 0.0;
    };
    let Ok(std) = vec.stddev() else {
        return 0.0;
    };
    if mean.abs() < 1e-9 {
        return 0.0;
    }
    f64::from(std / mean.abs())
}

/// Split tests into those eligible for per-test significance and those
/// under the noise floor.
///
/// # Example
/// ```
/// use perfminer::significance::filter_noise_floor;
/// use std::collections::BTreeMap;
///
/// let mut tests = BTreeMap::new();
/// tests.insert("TSlow".to_string(), (vec![0.40, 0.41], vec![0.30, 0.31]));
/// tests.insert("TFast".to_string(), (vec![0.003, 0.003], vec![0.003, 0.003]));
///
/// let (kept, filtered) = filter_noise_floor(&tests, 0.005);
/// assert!(kept.contains_key("TSlow"));
/// assert_eq!(filtered, vec!["TFast".to_string()]);
/// ```
pub fn filter_noise_floor(
    tests: &BTreeMap<String, (Vec<f64>, Vec<f64>)>,
    floor: f64,
) -> (BTreeMap<String, (Vec<f64>, Vec<f64>)>, Vec<String>) {
    let mut kept = BTreeMap::new();
    let mut filtered = Vec::new();

    for (name, (old, new)) in tests {
        let dist = TimingDistribution {
            name: name.clone(),
            old: old.clone(),
            new: new.clone(),
        };
        if dist.below_noise_floor(floor) {
            filtered.push(dist.name);
        } else {
            kept.insert(name.clone(), (dist.old, dist.new));
        }
    }

    (kept, filtered)
}
