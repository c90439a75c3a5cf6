//! Regular analysis grid and the interpolated flux field.
use serde::{Deserialize, Serialize};

use crate::{
    coords::{GeographicCoordinates, GeographicRegion},
    errors::AnalysisError,
    flux::UncertaintySource,
};

/// Linear space starting from `start` ranging to `end` (included)
/// with given spacing, in degrees or km depending on the axis.
#[derive(Debug, Copy, Clone, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Linspace {
    /// start coordinates or value
    pub start: f64,
    /// end coordinates or value
    pub end: f64,
    /// spacing (increment value)
    pub spacing: f64,
}

impl Linspace {
    /// Builds a new linear space. `end` must lie beyond `start`
    /// and the spacing must be strictly positive.
    pub fn new(start: f64, end: f64, spacing: f64) -> Result<Self, AnalysisError> {
        if !(spacing > 0.0) {
            return Err(AnalysisError::validation(format!(
                "invalid grid spacing: {}",
                spacing
            )));
        }
        if end <= start {
            return Err(AnalysisError::validation(format!(
                "faulty grid definition: end {} must exceed start {}",
                end, start
            )));
        }
        Ok(Self {
            start,
            end,
            spacing,
        })
    }
    /// Number of grid nodes: `ceil((end - start) / spacing) + 1`.
    pub fn node_count(&self) -> usize {
        (((self.end - self.start) / self.spacing) - 1e-9).ceil() as usize + 1
    }
    /// Coordinate of the i-th node.
    pub fn node(&self, i: usize) -> f64 {
        self.start + i as f64 * self.spacing
    }
    /// Index of the node nearest to given coordinate.
    pub fn nearest(&self, value: f64) -> usize {
        let i = ((value - self.start) / self.spacing).round();
        (i.max(0.0) as usize).min(self.node_count() - 1)
    }
}

impl From<(f64, f64, f64)> for Linspace {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Self {
            start: tuple.0,
            end: tuple.1,
            spacing: tuple.2,
        }
    }
}

/// Per-axis spacing of the analysis grid.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Longitude step, in decimal degrees
    pub longitude_deg: f64,
    /// Latitude step, in decimal degrees
    pub latitude_deg: f64,
    /// Altitude step, in km
    pub altitude_km: f64,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            longitude_deg: 1.0,
            latitude_deg: 1.0,
            altitude_km: 50.0,
        }
    }
}

/// Regular 3D grid definition, in terms of longitude, latitude
/// and altitude.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Longitude axis, in decimal degrees
    pub longitude: Linspace,
    /// Latitude axis, in decimal degrees
    pub latitude: Linspace,
    /// Altitude axis, in km
    pub altitude: Linspace,
}

impl GridSpec {
    /// Builds the grid covering given region at given resolution.
    pub fn from_region(
        region: &GeographicRegion,
        resolution: &Resolution,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            longitude: Linspace::new(
                region.longitude_min,
                region.longitude_max,
                resolution.longitude_deg,
            )?,
            latitude: Linspace::new(
                region.latitude_min,
                region.latitude_max,
                resolution.latitude_deg,
            )?,
            altitude: Linspace::new(
                region.altitude_min,
                region.altitude_max,
                resolution.altitude_km,
            )?,
        })
    }
    /// Grid dimensions (longitude, latitude, altitude node counts).
    pub fn dimensions(&self) -> (usize, usize, usize) {
        (
            self.longitude.node_count(),
            self.latitude.node_count(),
            self.altitude.node_count(),
        )
    }
    /// Total number of grid nodes.
    pub fn len(&self) -> usize {
        let (ni, nj, nk) = self.dimensions();
        ni * nj * nk
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Position of node (i, j, k).
    pub fn position(&self, i: usize, j: usize, k: usize) -> GeographicCoordinates {
        GeographicCoordinates {
            longitude: self.longitude.node(i),
            latitude: self.latitude.node(j),
            altitude: self.altitude.node(k),
        }
    }
    /// Flat storage index of node (i, j, k).
    pub fn flat(&self, i: usize, j: usize, k: usize) -> usize {
        let (_, nj, nk) = self.dimensions();
        (i * nj + j) * nk + k
    }
    /// Inverse of [Self::flat].
    pub fn unflat(&self, index: usize) -> (usize, usize, usize) {
        let (_, nj, nk) = self.dimensions();
        let k = index % nk;
        let j = (index / nk) % nj;
        let i = index / (nj * nk);
        (i, j, k)
    }
    /// Face (6-connectivity) neighbors of node (i, j, k).
    pub fn face_neighbors(&self, i: usize, j: usize, k: usize) -> Vec<(usize, usize, usize)> {
        let (ni, nj, nk) = self.dimensions();
        let mut neighbors = Vec::with_capacity(6);
        if i > 0 {
            neighbors.push((i - 1, j, k));
        }
        if i + 1 < ni {
            neighbors.push((i + 1, j, k));
        }
        if j > 0 {
            neighbors.push((i, j - 1, k));
        }
        if j + 1 < nj {
            neighbors.push((i, j + 1, k));
        }
        if k > 0 {
            neighbors.push((i, j, k - 1));
        }
        if k + 1 < nk {
            neighbors.push((i, j, k + 1));
        }
        neighbors
    }
}

/// One grid node sample: interpolated value with its variance.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridNode {
    /// Interpolated total flux, in particles/cm²/s
    pub value: f64,
    /// Interpolation variance ((particles/cm²/s)²)
    pub variance: f64,
}

/// Continuous flux field over a regular grid: one (value, variance)
/// pair per node. Owned by the analysis run that created it and
/// never mutated once interpolation completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxField {
    /// Grid this field is sampled on
    pub spec: GridSpec,
    /// Resolution the field was produced at
    pub resolution: Resolution,
    /// Dense node storage, indexed by [GridSpec::flat]
    pub nodes: Vec<GridNode>,
    /// Provenance of the node variances: kriging and cross validated
    /// RBF variances are engine estimates, never raw measurements.
    pub variance_source: UncertaintySource,
    /// True when a lower fidelity fallback method produced this
    /// field: downstream confidence is reduced accordingly.
    pub degraded: bool,
}

impl FluxField {
    /// Allocates a zeroed field over given grid.
    pub(crate) fn zeroed(spec: GridSpec, resolution: Resolution) -> Self {
        Self {
            spec,
            resolution,
            nodes: vec![GridNode::default(); spec.len()],
            variance_source: UncertaintySource::Estimated,
            degraded: false,
        }
    }
    /// Node sample at (i, j, k).
    pub fn node(&self, i: usize, j: usize, k: usize) -> GridNode {
        self.nodes[self.spec.flat(i, j, k)]
    }
    /// Interpolated value at (i, j, k).
    pub fn value(&self, i: usize, j: usize, k: usize) -> f64 {
        self.node(i, j, k).value
    }
    /// Interpolation variance at (i, j, k).
    pub fn variance(&self, i: usize, j: usize, k: usize) -> f64 {
        self.node(i, j, k).variance
    }
    /// Smallest node value of the field.
    pub fn min_value(&self) -> f64 {
        self.nodes
            .iter()
            .map(|n| n.value)
            .fold(f64::INFINITY, f64::min)
    }
    /// Largest node value of the field.
    pub fn max_value(&self) -> f64 {
        self.nodes
            .iter()
            .map(|n| n.value)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}
