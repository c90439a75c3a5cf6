//! Scattered measurement to regular grid interpolation,
//! with per-node variance.
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    coords::{GeographicCoordinates, KM_PER_DEGREE},
    errors::AnalysisError,
    flux::{FluxIntensity, FluxMeasurement},
    grid::{FluxField, GridSpec, Resolution},
    uncertainty::{clamp_variance, WeightedMean},
};

mod cache;
mod kriging;
mod rbf;

pub use cache::{fingerprint, FactorizationCache};

/// Interpolation backend.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Global Gaussian radial basis functions: exact interpolation,
    /// kernel matrix factored once and reused across flux channels.
    Rbf,
    /// Ordinary kriging over local neighborhoods: value and variance
    /// in one pass. Preferred when both are required together.
    #[default]
    Kriging,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Rbf => write!(f, "rbf"),
            Self::Kriging => write!(f, "kriging"),
        }
    }
}

/// Interpolator parametrization.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatorConfig {
    /// Backend selection
    pub method: Method,
    /// Minimum supporting points inside the grid bounds
    pub min_points: usize,
    /// Hard cap on the point set size: larger sets are thinned by a
    /// deterministic stride, bounding the cubic factorization cost.
    pub max_points: usize,
    /// Radius under which two samples count as duplicates, in degrees
    pub merge_radius_deg: f64,
    /// Local neighborhood size for kriging
    pub kriging_neighbors: usize,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            min_points: 4,
            max_points: 2000,
            merge_radius_deg: 0.25,
            kriging_neighbors: 16,
        }
    }
}

impl InterpolatorConfig {
    pub fn with_method(&self, method: Method) -> Self {
        let mut s = *self;
        s.method = method;
        s
    }
    pub fn with_min_points(&self, min_points: usize) -> Self {
        let mut s = *self;
        s.min_points = min_points;
        s
    }
}

/// One interpolation support point: merged measurement channels
/// at a position.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub coordinates: GeographicCoordinates,
    pub electron: FluxIntensity,
    pub proton: FluxIntensity,
}

impl SamplePoint {
    pub fn from_measurement(m: &FluxMeasurement) -> Self {
        Self {
            coordinates: m.coordinates,
            electron: m.electron_flux,
            proton: m.proton_flux,
        }
    }
    /// Total particle flux at this point.
    pub fn total(&self) -> FluxIntensity {
        self.electron.combine(&self.proton)
    }
}

/// Isotropic distance in degree-equivalent units: horizontal axes in
/// degrees, altitude scaled by the surface km-per-degree factor.
pub(crate) fn metric_distance(a: &GeographicCoordinates, b: &GeographicCoordinates) -> f64 {
    let dlon = a.longitude - b.longitude;
    let dlat = a.latitude - b.latitude;
    let dalt = (a.altitude - b.altitude) / KM_PER_DEGREE;
    (dlon * dlon + dlat * dlat + dalt * dalt).sqrt()
}

/// Scattered point to regular grid interpolator.
pub struct FluxInterpolator {
    config: InterpolatorConfig,
    cache: Arc<FactorizationCache>,
}

impl FluxInterpolator {
    pub fn new(config: InterpolatorConfig, cache: Arc<FactorizationCache>) -> Self {
        Self { config, cache }
    }
    /// Interpolates measured points onto the grid. Every node of the
    /// returned field carries both a value and a variance.
    ///
    /// An ill-conditioned kernel matrix does not abort: the engine
    /// logs, falls back to inverse distance weighting, and flags the
    /// field as degraded.
    pub fn interpolate(
        &self,
        measurements: &[FluxMeasurement],
        spec: GridSpec,
        resolution: Resolution,
    ) -> Result<FluxField, AnalysisError> {
        let in_bounds: Vec<SamplePoint> = measurements
            .iter()
            .filter(|m| {
                self.in_grid_bounds(&m.coordinates, &spec)
            })
            .map(SamplePoint::from_measurement)
            .collect();

        // an empty region is fatal even under a zero min_points config
        let required = self.config.min_points.max(1);
        if in_bounds.len() < required {
            return Err(AnalysisError::InsufficientData {
                available: in_bounds.len(),
                required,
            });
        }

        let merged = merge_duplicates(in_bounds, self.config.merge_radius_deg);
        let points = self.thin(merged);
        debug!(
            "interpolating {} support point(s) over {} node(s), method: {}",
            points.len(),
            spec.len(),
            self.config.method
        );

        let field = match self.config.method {
            Method::Rbf => rbf::interpolate(&points, spec, resolution, &self.cache),
            Method::Kriging => kriging::interpolate(
                &points,
                spec,
                resolution,
                self.config.kriging_neighbors,
            ),
        };

        match field {
            Some(field) => Ok(field),
            None => {
                // kernel breakdown: degrade to IDW, do not abort
                warn!(
                    "{} kernel ill-conditioned: falling back to inverse distance weighting",
                    self.config.method
                );
                let mut field = idw(&points, spec, resolution);
                field.degraded = true;
                Ok(field)
            },
        }
    }
    fn in_grid_bounds(&self, c: &GeographicCoordinates, spec: &GridSpec) -> bool {
        spec.longitude.start <= c.longitude
            && c.longitude <= spec.longitude.end
            && spec.latitude.start <= c.latitude
            && c.latitude <= spec.latitude.end
            && spec.altitude.start <= c.altitude
            && c.altitude <= spec.altitude.end
    }
    /// Deterministic stride thinning, bounding the worst case
    /// factorization cost.
    fn thin(&self, points: Vec<SamplePoint>) -> Vec<SamplePoint> {
        if points.len() <= self.config.max_points {
            return points;
        }
        info!(
            "thinning {} support points down to {}",
            points.len(),
            self.config.max_points
        );
        let stride = (points.len() + self.config.max_points - 1) / self.config.max_points;
        points.into_iter().step_by(stride).collect()
    }
}

/// Merges near-duplicate positions by inverse variance weighted
/// averaging, channel by channel. Output order is deterministic
/// (sorted by position).
pub fn merge_duplicates(points: Vec<SamplePoint>, radius_deg: f64) -> Vec<SamplePoint> {
    let sorted: Vec<SamplePoint> = points
        .into_iter()
        .sorted_by(|a, b| {
            (
                a.coordinates.longitude,
                a.coordinates.latitude,
                a.coordinates.altitude,
            )
                .partial_cmp(&(
                    b.coordinates.longitude,
                    b.coordinates.latitude,
                    b.coordinates.altitude,
                ))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .collect();

    let mut merged: Vec<SamplePoint> = Vec::with_capacity(sorted.len());
    let mut consumed = vec![false; sorted.len()];
    for i in 0..sorted.len() {
        if consumed[i] {
            continue;
        }
        let mut electron = WeightedMean::new();
        let mut proton = WeightedMean::new();
        electron.add(&sorted[i].electron);
        proton.add(&sorted[i].proton);
        for j in (i + 1)..sorted.len() {
            if consumed[j] {
                continue;
            }
            // sorted by longitude: early exit once out of radius
            if sorted[j].coordinates.longitude - sorted[i].coordinates.longitude > radius_deg {
                break;
            }
            if metric_distance(&sorted[i].coordinates, &sorted[j].coordinates) <= radius_deg {
                electron.add(&sorted[j].electron);
                proton.add(&sorted[j].proton);
                consumed[j] = true;
            }
        }
        merged.push(SamplePoint {
            coordinates: sorted[i].coordinates,
            electron: electron.resolve().unwrap_or(sorted[i].electron),
            proton: proton.resolve().unwrap_or(sorted[i].proton),
        });
    }
    merged
}

/// Inverse distance weighting: the documented lower fidelity
/// fallback when a kernel method breaks down numerically.
fn idw(points: &[SamplePoint], spec: GridSpec, resolution: Resolution) -> FluxField {
    let mut field = FluxField::zeroed(spec, resolution);
    let (ni, nj, nk) = spec.dimensions();
    for i in 0..ni {
        for j in 0..nj {
            for k in 0..nk {
                let node_position = spec.position(i, j, k);
                let mut weight_sum = 0.0;
                let mut value_sum = 0.0;
                let mut variance_sum = 0.0;
                let mut min_variance = f64::INFINITY;
                let mut nearest = f64::INFINITY;
                for p in points {
                    let total = p.total();
                    let d = metric_distance(&node_position, &p.coordinates);
                    let w = 1.0 / (d * d + 1e-6);
                    weight_sum += w;
                    value_sum += w * total.value;
                    variance_sum += w * total.variance();
                    min_variance = min_variance.min(total.variance());
                    nearest = nearest.min(d);
                }
                let node = &mut field.nodes[spec.flat(i, j, k)];
                node.value = value_sum / weight_sum;
                // variance inflates with distance to the nearest support
                let local = variance_sum / weight_sum * (1.0 + nearest);
                node.variance = clamp_variance(local, min_variance);
            }
        }
    }
    field
}
