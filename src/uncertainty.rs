//! Variance propagation helpers, threading measurement uncertainty
//! through every derived quantity.
use crate::flux::{FluxIntensity, UncertaintySource};

/// Inverse variance weighted accumulator. The combined variance is
/// clamped so that it never falls below the smallest contributing
/// variance: merging sources must not manufacture certainty.
#[derive(Debug, Clone, Default)]
pub struct WeightedMean {
    weight_sum: f64,
    weighted_value_sum: f64,
    min_variance: f64,
    count: usize,
    all_measured: bool,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self {
            weight_sum: 0.0,
            weighted_value_sum: 0.0,
            min_variance: f64::INFINITY,
            count: 0,
            all_measured: true,
        }
    }
    /// Accumulates one contributor. Zero variance contributors are
    /// given a small floor so the weighting stays finite.
    pub fn add(&mut self, intensity: &FluxIntensity) {
        let variance = intensity.variance().max(1e-12);
        let weight = 1.0 / variance;
        self.weight_sum += weight;
        self.weighted_value_sum += weight * intensity.value;
        self.min_variance = self.min_variance.min(intensity.variance());
        self.all_measured &= intensity.source == UncertaintySource::Measured;
        self.count += 1;
    }
    pub fn count(&self) -> usize {
        self.count
    }
    /// Combined intensity, or None when nothing was accumulated.
    pub fn resolve(&self) -> Option<FluxIntensity> {
        if self.count == 0 {
            return None;
        }
        let value = self.weighted_value_sum / self.weight_sum;
        // clamp: never below the best contributor
        let variance = (1.0 / self.weight_sum).max(self.min_variance);
        Some(FluxIntensity {
            value,
            uncertainty: variance.sqrt(),
            source: if self.all_measured {
                UncertaintySource::Measured
            } else {
                UncertaintySource::Estimated
            },
        })
    }
}

/// Clamps a derived variance so it never undercuts the smallest
/// variance among its contributors.
pub fn clamp_variance(derived: f64, min_contributing: f64) -> f64 {
    derived.max(min_contributing).max(0.0)
}

/// Sample variance of a residual set (biased estimator is fine for
/// the cross validation figure: n is the full residual count).
pub fn mean_square(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flux::FluxIntensity;

    #[test]
    fn weighted_mean_leans_on_precision() {
        let mut acc = WeightedMean::new();
        acc.add(&FluxIntensity::new(100.0, 1.0).unwrap());
        acc.add(&FluxIntensity::new(200.0, 10.0).unwrap());
        let merged = acc.resolve().unwrap();
        // precise contributor dominates
        assert!(merged.value < 110.0, "merged value {}", merged.value);
    }
    #[test]
    fn merged_variance_never_below_minimum() {
        let mut acc = WeightedMean::new();
        acc.add(&FluxIntensity::new(100.0, 5.0).unwrap());
        acc.add(&FluxIntensity::new(102.0, 5.0).unwrap());
        acc.add(&FluxIntensity::new(98.0, 5.0).unwrap());
        let merged = acc.resolve().unwrap();
        assert!(merged.variance() >= 25.0 - 1e-9);
    }
    #[test]
    fn empty_accumulator() {
        assert!(WeightedMean::new().resolve().is_none());
    }
    #[test]
    fn variance_clamp() {
        assert_eq!(clamp_variance(1.0, 4.0), 4.0);
        assert_eq!(clamp_variance(9.0, 4.0), 9.0);
        assert_eq!(clamp_variance(-1.0, 0.0), 0.0);
    }
}
