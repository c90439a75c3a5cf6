//! Converts topology features into bounded, confidence scored
//! anomaly regions.
use std::collections::VecDeque;

use hifitime::Epoch;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    coords::{GeographicCoordinates, SpatialBounds, KM_PER_DEGREE},
    flux::{FluxIntensity, FluxMeasurement, UncertaintySource},
    grid::FluxField,
    topology::TopologyReport,
};

/// Detector parametrization.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum persistence a feature must reach, in flux units
    pub persistence_threshold: f64,
    /// Absolute intensity floor for a peak, in flux units
    pub intensity_threshold: f64,
    /// Fraction of the peak value the flood filled extent must stay
    /// above, (0, 1)
    pub extent_fraction: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            persistence_threshold: 100.0,
            intensity_threshold: 500.0,
            extent_fraction: 0.5,
        }
    }
}

impl DetectionConfig {
    pub fn with_persistence_threshold(&self, threshold: f64) -> Self {
        let mut s = *self;
        s.persistence_threshold = threshold;
        s
    }
    pub fn with_intensity_threshold(&self, threshold: f64) -> Self {
        let mut s = *self;
        s.intensity_threshold = threshold;
        s
    }
}

/// A detected South Atlantic Anomaly region. Read-only once created.
/// Serialized field names are a compatibility contract with the
/// downstream report layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaaAnomaly {
    /// Deterministic id derived from run context and peak position
    pub id: String,
    pub center_coordinates: GeographicCoordinates,
    /// Peak flux value, in particles/cm²/s
    pub intensity_peak: f64,
    /// 1-sigma uncertainty on the peak (field variance at the node)
    pub intensity_uncertainty: f64,
    /// Provenance of the peak uncertainty
    pub intensity_source: UncertaintySource,
    pub spatial_extent: SpatialBounds,
    /// Detection confidence, [0, 1]
    pub confidence_level: f64,
    pub detection_epoch: Epoch,
    /// Westward drift, in degrees/year. Only populated once temporal
    /// analysis has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_rate: Option<f64>,
    /// Stability score, [0, 1]. Only populated once temporal
    /// analysis has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_stability: Option<f64>,
}

impl SaaAnomaly {
    /// Peak intensity with its provenance tag.
    pub fn peak_intensity(&self) -> FluxIntensity {
        FluxIntensity {
            value: self.intensity_peak,
            uncertainty: self.intensity_uncertainty,
            source: self.intensity_source,
        }
    }
}

/// Filters topology maxima into bounded anomalies.
///
/// Confidence is the one canonical definition of this engine,
/// a deterministic blend of three ingredients:
/// local data density (0.3), relative peak uncertainty (0.4) and
/// relative persistence (0.3), scaled down when the field came from
/// a degraded interpolation.
pub fn detect(
    field: &FluxField,
    topology: &TopologyReport,
    measurements: &[FluxMeasurement],
    config: &DetectionConfig,
    run_id: &str,
    epoch: Epoch,
) -> Vec<SaaAnomaly> {
    let mut anomalies = Vec::new();
    for feature in topology.features_above(config.persistence_threshold) {
        let (i, j, k) = feature.peak;
        let peak_node = field.node(i, j, k);
        if peak_node.value < config.intensity_threshold {
            debug!(
                "dropping feature at {:?}: peak {:.1} below intensity floor {:.1}",
                feature.peak, peak_node.value, config.intensity_threshold
            );
            continue;
        }

        let filled = flood_fill(field, feature.peak, config.extent_fraction * peak_node.value);
        let (center, spatial_extent) = region_geometry(field, &filled);

        let density_score = local_density_score(&center, &spatial_extent, measurements);
        let variance_score = {
            let relative = peak_node.variance.sqrt() / peak_node.value.max(1e-9);
            1.0 / (1.0 + relative)
        };
        let persistence_score = (feature.persistence() / peak_node.value.max(1e-9)).min(1.0);
        let mut confidence_level =
            0.3 * density_score + 0.4 * variance_score + 0.3 * persistence_score;
        if field.degraded {
            confidence_level *= 0.75;
        }
        let confidence_level = confidence_level.clamp(0.0, 1.0);

        anomalies.push(SaaAnomaly {
            id: format!(
                "saa-{}-{:.1}_{:.1}_{:.0}",
                run_id, center.longitude, center.latitude, center.altitude
            ),
            center_coordinates: center,
            intensity_peak: peak_node.value,
            intensity_uncertainty: peak_node.variance.sqrt(),
            intensity_source: field.variance_source,
            spatial_extent,
            confidence_level,
            detection_epoch: epoch,
            drift_rate: None,
            temporal_stability: None,
        });
    }

    // strongest first, stable order
    anomalies
        .into_iter()
        .sorted_by(|a, b| {
            (b.intensity_peak, &a.id)
                .partial_cmp(&(a.intensity_peak, &b.id))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .collect()
}

/// Grows the anomaly extent from the peak over face-adjacent nodes
/// staying above `floor`, clipped to the grid (the requested region).
fn flood_fill(
    field: &FluxField,
    seed: (usize, usize, usize),
    floor: f64,
) -> Vec<(usize, usize, usize)> {
    let spec = field.spec;
    let mut visited = vec![false; spec.len()];
    let mut filled = Vec::new();
    let mut queue = VecDeque::new();
    visited[spec.flat(seed.0, seed.1, seed.2)] = true;
    queue.push_back(seed);
    while let Some((i, j, k)) = queue.pop_front() {
        filled.push((i, j, k));
        for (a, b, c) in spec.face_neighbors(i, j, k) {
            let flat = spec.flat(a, b, c);
            if !visited[flat] && field.nodes[flat].value >= floor {
                visited[flat] = true;
                queue.push_back((a, b, c));
            }
        }
    }
    filled
}

/// Value weighted centroid and bounding extent of a filled region.
fn region_geometry(
    field: &FluxField,
    filled: &[(usize, usize, usize)],
) -> (GeographicCoordinates, SpatialBounds) {
    let spec = field.spec;
    let mut weight_sum = 0.0;
    let (mut lon_sum, mut lat_sum, mut alt_sum) = (0.0, 0.0, 0.0);
    let (mut lon_min, mut lon_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut lat_min, mut lat_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut alt_min, mut alt_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(i, j, k) in filled {
        let p = spec.position(i, j, k);
        let w = field.nodes[spec.flat(i, j, k)].value.max(1e-12);
        weight_sum += w;
        lon_sum += w * p.longitude;
        lat_sum += w * p.latitude;
        alt_sum += w * p.altitude;
        lon_min = lon_min.min(p.longitude);
        lon_max = lon_max.max(p.longitude);
        lat_min = lat_min.min(p.latitude);
        lat_max = lat_max.max(p.latitude);
        alt_min = alt_min.min(p.altitude);
        alt_max = alt_max.max(p.altitude);
    }
    let center = GeographicCoordinates {
        longitude: lon_sum / weight_sum,
        latitude: lat_sum / weight_sum,
        altitude: alt_sum / weight_sum,
    };
    // single cell regions still span one grid step
    let extent = SpatialBounds::from_spans(
        (lon_max - lon_min).max(field.resolution.longitude_deg),
        (lat_max - lat_min).max(field.resolution.latitude_deg),
        (alt_max - alt_min).max(field.resolution.altitude_km),
    );
    (center, extent)
}

/// Saturating score of the measurement count supporting the region.
fn local_density_score(
    center: &GeographicCoordinates,
    extent: &SpatialBounds,
    measurements: &[FluxMeasurement],
) -> f64 {
    let radius_deg = (extent.characteristic_length / KM_PER_DEGREE).max(1.0);
    let nearby = measurements
        .iter()
        .filter(|m| {
            let dlon = m.coordinates.longitude - center.longitude;
            let dlat = m.coordinates.latitude - center.latitude;
            (dlon * dlon + dlat * dlat).sqrt() <= radius_deg
        })
        .count();
    1.0 - (-(nearby as f64) / 5.0).exp()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coords::GeographicRegion;
    use crate::grid::{FluxField, GridSpec, Resolution};
    use crate::topology;

    fn field_with<F: Fn(f64, f64) -> f64>(f: F) -> FluxField {
        let region = GeographicRegion::new(-60.0, -20.0, -40.0, -10.0, 400.0, 450.0).unwrap();
        let resolution = Resolution {
            longitude_deg: 1.0,
            latitude_deg: 1.0,
            altitude_km: 100.0,
        };
        let spec = GridSpec::from_region(&region, &resolution).unwrap();
        let mut field = FluxField::zeroed(spec, resolution);
        let (ni, nj, nk) = spec.dimensions();
        for i in 0..ni {
            for j in 0..nj {
                for k in 0..nk {
                    let p = spec.position(i, j, k);
                    let node = &mut field.nodes[spec.flat(i, j, k)];
                    node.value = f(p.longitude, p.latitude);
                    node.variance = (0.04 * node.value).powi(2).max(1.0);
                }
            }
        }
        field
    }

    fn bump(lon: f64, lat: f64, c: (f64, f64), amplitude: f64) -> f64 {
        let r2 = (lon - c.0).powi(2) + (lat - c.1).powi(2);
        amplitude * (-r2 / 50.0).exp()
    }

    fn sampling(center: (f64, f64), count: usize) -> Vec<FluxMeasurement> {
        crate::interp::test::gaussian_cluster((center.0, center.1, 425.0), 1250.0, 5.0, count)
    }

    fn epoch() -> Epoch {
        Epoch::from_gregorian_utc_at_midnight(2024, 6, 1)
    }

    #[test]
    fn single_bump_single_anomaly() {
        let field = field_with(|lon, lat| bump(lon, lat, (-45.0, -20.0), 1250.0));
        let report = topology::analyze(&field);
        let data = sampling((-45.0, -20.0), 50);
        let anomalies = detect(
            &field,
            &report,
            &data,
            &DetectionConfig::default(),
            "run0",
            epoch(),
        );
        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert!((anomaly.center_coordinates.longitude + 45.0).abs() <= 2.0);
        assert!((anomaly.center_coordinates.latitude + 20.0).abs() <= 2.0);
        assert!(anomaly.confidence_level > 0.8, "confidence {}", anomaly.confidence_level);
        assert!(anomaly.intensity_peak > 1000.0);
        assert!(anomaly.intensity_uncertainty > 0.0);
    }
    #[test]
    fn two_separated_bumps_two_anomalies() {
        let field = field_with(|lon, lat| {
            bump(lon, lat, (-50.0, -30.0), 1250.0) + bump(lon, lat, (-28.0, -15.0), 1150.0)
        });
        let report = topology::analyze(&field);
        let data = sampling((-50.0, -30.0), 25);
        let anomalies = detect(
            &field,
            &report,
            &data,
            &DetectionConfig::default(),
            "run0",
            epoch(),
        );
        assert_eq!(anomalies.len(), 2, "separated lobes must never merge");
        // strongest first
        assert!(anomalies[0].intensity_peak >= anomalies[1].intensity_peak);
    }
    #[test]
    fn intensity_floor_filters_weak_maxima() {
        let field = field_with(|lon, lat| bump(lon, lat, (-45.0, -20.0), 300.0));
        let report = topology::analyze(&field);
        let anomalies = detect(
            &field,
            &report,
            &[],
            &DetectionConfig::default(),
            "run0",
            epoch(),
        );
        assert!(anomalies.is_empty());
    }
    #[test]
    fn persistence_pruning_monotonicity() {
        let field = field_with(|lon, lat| {
            bump(lon, lat, (-50.0, -30.0), 1250.0)
                + bump(lon, lat, (-28.0, -15.0), 900.0)
                + bump(lon, lat, (-40.0, -35.0), 700.0)
        });
        let report = topology::analyze(&field);
        let data = sampling((-50.0, -30.0), 25);
        let mut previous = usize::MAX;
        for threshold in [50.0, 200.0, 600.0, 1000.0, 2000.0] {
            let config = DetectionConfig::default().with_persistence_threshold(threshold);
            let count = detect(&field, &report, &data, &config, "run0", epoch()).len();
            assert!(count <= previous);
            previous = count;
        }
    }
    #[test]
    fn deterministic_ids() {
        let field = field_with(|lon, lat| bump(lon, lat, (-45.0, -20.0), 1250.0));
        let report = topology::analyze(&field);
        let data = sampling((-45.0, -20.0), 50);
        let a = detect(&field, &report, &data, &DetectionConfig::default(), "r", epoch());
        let b = detect(&field, &report, &data, &DetectionConfig::default(), "r", epoch());
        assert_eq!(a, b);
        assert!(a[0].id.starts_with("saa-r-"));
    }
    #[test]
    fn degraded_field_reduces_confidence() {
        let mut field = field_with(|lon, lat| bump(lon, lat, (-45.0, -20.0), 1250.0));
        let report = topology::analyze(&field);
        let data = sampling((-45.0, -20.0), 50);
        let clean = detect(&field, &report, &data, &DetectionConfig::default(), "r", epoch());
        field.degraded = true;
        let degraded = detect(&field, &report, &data, &DetectionConfig::default(), "r", epoch());
        assert!(degraded[0].confidence_level < clean[0].confidence_level);
    }
}
