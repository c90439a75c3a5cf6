//! Physical bounds and consistency checks on raw measurements.
use log::{debug, warn};

use crate::{
    coords::GeographicRegion,
    flux::{DataQuality, FluxMeasurement},
    igrf::IgrfModel,
};

/// Outcome of validating one batch of raw measurements.
/// Warnings degrade the final quality score, they never abort:
/// only an invalid request does.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Measurements that passed every check
    pub accepted: Vec<FluxMeasurement>,
    /// Number of rejected measurements
    pub rejected: usize,
    /// Human readable warnings raised while validating
    pub warnings: Vec<String>,
    /// Aggregate data quality score, [0, 1]
    pub quality_score: f64,
}

/// Validates raw measurements against physical bounds and the
/// requested region, and scores the batch quality.
pub struct DataValidator<'a> {
    region: &'a GeographicRegion,
    model: &'a IgrfModel,
}

impl<'a> DataValidator<'a> {
    pub fn new(region: &'a GeographicRegion, model: &'a IgrfModel) -> Self {
        Self { region, model }
    }
    /// Runs all checks over a measurement batch.
    pub fn validate(&self, measurements: Vec<FluxMeasurement>) -> ValidationReport {
        let total = measurements.len();
        let mut accepted = Vec::with_capacity(total);
        let mut warnings = Vec::new();
        let mut low_quality = 0_usize;

        for m in measurements {
            if let Some(reason) = self.rejection_reason(&m) {
                debug!("rejecting measurement from \"{}\": {}", m.source, reason);
                warnings.push(reason);
                continue;
            }
            if m.quality > DataQuality::Medium {
                low_quality += 1;
            }
            accepted.push(m);
        }

        let rejected = total - accepted.len();
        if total > 0 && (accepted.len() as f64) < 0.8 * total as f64 {
            warn!(
                "low data quality: {}/{} measurements accepted",
                accepted.len(),
                total
            );
            warnings.push(format!(
                "low data quality: {} of {} measurements accepted",
                accepted.len(),
                total
            ));
        }

        let quality_score = if total == 0 {
            0.0
        } else {
            let acceptance = accepted.len() as f64 / total as f64;
            let cleanliness = if accepted.is_empty() {
                0.0
            } else {
                1.0 - low_quality as f64 / accepted.len() as f64
            };
            (0.7 * acceptance + 0.3 * cleanliness).clamp(0.0, 1.0)
        };

        ValidationReport {
            accepted,
            rejected,
            warnings,
            quality_score,
        }
    }
    fn rejection_reason(&self, m: &FluxMeasurement) -> Option<String> {
        if m.electron_flux.value < 0.0
            || m.proton_flux.value < 0.0
            || m.electron_flux.uncertainty < 0.0
            || m.proton_flux.uncertainty < 0.0
            || !m.electron_flux.value.is_finite()
            || !m.proton_flux.value.is_finite()
        {
            return Some(format!(
                "unphysical flux from \"{}\" at {}",
                m.source, m.coordinates
            ));
        }
        if !self.region.contains(&m.coordinates) {
            return Some(format!(
                "measurement at {} outside requested region {}",
                m.coordinates, self.region
            ));
        }
        if !self.model.covers(m.epoch) {
            return Some(format!(
                "measurement epoch {} outside {} coverage",
                m.epoch, self.model.name
            ));
        }
        None
    }
}
