//! Charged particle flux measurement types.
use hifitime::Epoch;
use serde::{Deserialize, Serialize};

use crate::{coords::GeographicCoordinates, errors::AnalysisError};

/// Quality flag attached to each raw measurement.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Provenance of an uncertainty figure: whether it was measured
/// by the instrument, or estimated by this engine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintySource {
    /// Reported by the instrument or upstream model
    #[default]
    Measured,
    /// Derived by interpolation or cross validation
    Estimated,
}

/// Differential flux value with explicit 1-sigma uncertainty,
/// in particles/cm²/s.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxIntensity {
    /// Flux value (non negative)
    pub value: f64,
    /// 1-sigma uncertainty (non negative)
    pub uncertainty: f64,
    /// Where the uncertainty figure comes from
    pub source: UncertaintySource,
}

impl FluxIntensity {
    /// Builds a new measured [FluxIntensity], validating physical bounds.
    pub fn new(value: f64, uncertainty: f64) -> Result<Self, AnalysisError> {
        if !(value >= 0.0) {
            return Err(AnalysisError::validation(format!(
                "flux intensity cannot be negative: {}",
                value
            )));
        }
        if !(uncertainty >= 0.0) {
            return Err(AnalysisError::validation(format!(
                "flux uncertainty cannot be negative: {}",
                uncertainty
            )));
        }
        Ok(Self {
            value,
            uncertainty,
            source: UncertaintySource::Measured,
        })
    }
    /// Tags this intensity as engine estimated.
    pub fn estimated(&self) -> Self {
        Self {
            source: UncertaintySource::Estimated,
            ..*self
        }
    }
    /// Sums two intensities, uncertainties added in quadrature.
    /// Result is Measured only when both contributors are.
    pub fn combine(&self, rhs: &Self) -> Self {
        Self {
            value: self.value + rhs.value,
            uncertainty: (self.uncertainty.powi(2) + rhs.uncertainty.powi(2)).sqrt(),
            source: if self.source == UncertaintySource::Measured
                && rhs.source == UncertaintySource::Measured
            {
                UncertaintySource::Measured
            } else {
                UncertaintySource::Estimated
            },
        }
    }
    /// Scales value and uncertainty by a non negative scalar.
    pub fn scale(&self, k: f64) -> Self {
        Self {
            value: self.value * k,
            uncertainty: self.uncertainty * k,
            source: self.source,
        }
    }
    /// Returns the variance (sigma squared).
    pub fn variance(&self) -> f64 {
        self.uncertainty.powi(2)
    }
    /// Returns true if this flux lies more than `sigma` deviations above zero.
    pub fn is_significant(&self, sigma: f64) -> bool {
        if self.uncertainty == 0.0 {
            self.value > 0.0
        } else {
            self.value > sigma * self.uncertainty
        }
    }
}

impl std::fmt::Display for FluxIntensity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:.3e} ± {:.3e} /cm²/s", self.value, self.uncertainty)
    }
}

/// One ingested flux measurement. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxMeasurement {
    /// Sampling position
    pub coordinates: GeographicCoordinates,
    /// Electron differential flux
    pub electron_flux: FluxIntensity,
    /// Proton differential flux
    pub proton_flux: FluxIntensity,
    /// Sampling instant
    pub epoch: Epoch,
    /// Producing source identifier, e.g. "ae9_ap9"
    pub source: String,
    /// Quality flag as reported by the source
    pub quality: DataQuality,
}

impl FluxMeasurement {
    /// Total particle flux (electrons + protons),
    /// uncertainties combined in quadrature.
    pub fn total_flux(&self) -> FluxIntensity {
        self.electron_flux.combine(&self.proton_flux)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coords::GeographicCoordinates;
    use hifitime::Epoch;

    #[test]
    fn intensity_validation() {
        assert!(FluxIntensity::new(1250.0, 50.0).is_ok());
        assert!(FluxIntensity::new(-1.0, 0.0).is_err());
        assert!(FluxIntensity::new(1.0, -1.0).is_err());
    }
    #[test]
    fn quadrature_combination() {
        let a = FluxIntensity::new(100.0, 3.0).unwrap();
        let b = FluxIntensity::new(200.0, 4.0).unwrap();
        let sum = a.combine(&b);
        assert_eq!(sum.value, 300.0);
        assert!((sum.uncertainty - 5.0).abs() < 1e-12);
        assert_eq!(sum.source, UncertaintySource::Measured);
        // estimated contamination propagates
        let sum = a.combine(&b.estimated());
        assert_eq!(sum.source, UncertaintySource::Estimated);
    }
    #[test]
    fn significance() {
        let strong = FluxIntensity::new(1250.0, 50.0).unwrap();
        let weak = FluxIntensity::new(10.0, 50.0).unwrap();
        assert!(strong.is_significant(2.0));
        assert!(!weak.is_significant(2.0));
    }
    #[test]
    fn total_flux() {
        let m = FluxMeasurement {
            coordinates: GeographicCoordinates::new(-45.0, -20.0, 500.0).unwrap(),
            electron_flux: FluxIntensity::new(1000.0, 30.0).unwrap(),
            proton_flux: FluxIntensity::new(250.0, 40.0).unwrap(),
            epoch: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
            source: "ae9_ap9".to_string(),
            quality: DataQuality::High,
        };
        let total = m.total_flux();
        assert_eq!(total.value, 1250.0);
        assert!((total.uncertainty - 50.0).abs() < 1e-12);
    }
}
