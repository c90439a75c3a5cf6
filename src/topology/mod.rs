//! Topology of the flux manifold: critical points and a simplified
//! superlevel-set persistence sweep.
//!
//! Persistence replaces a fixed intensity cutoff with a scale
//! invariant significance criterion: a feature's weight is the
//! threshold span it survives before merging into a more prominent
//! one.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{coords::GeographicCoordinates, grid::FluxField};

/// Critical point classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticalPointKind {
    /// Local maximum: anomaly candidate
    Maximum,
    /// Local minimum
    Minimum,
    /// Saddle: boundary or bifurcation between lobes
    Saddle,
}

/// A critical point of the interpolated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPoint {
    /// Grid index (longitude, latitude, altitude)
    pub index: (usize, usize, usize),
    /// Geographic position of the node
    pub position: GeographicCoordinates,
    pub kind: CriticalPointKind,
    /// Field value at the node
    pub value: f64,
}

/// One persistence pair from the merge sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceFeature {
    /// Threshold at which the feature appears (its peak value)
    pub birth: f64,
    /// Threshold at which it merges into a more prominent feature
    pub death: f64,
    /// Grid index of the peak this feature was born at
    pub peak: (usize, usize, usize),
}

impl PersistenceFeature {
    /// |birth - death|
    pub fn persistence(&self) -> f64 {
        (self.birth - self.death).abs()
    }
}

/// Output of [analyze]: critical points and persistence pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub critical_points: Vec<CriticalPoint>,
    /// Sorted by decreasing persistence
    pub features: Vec<PersistenceFeature>,
}

impl TopologyReport {
    /// Features whose persistence reaches `threshold`. Raising the
    /// threshold can only ever shrink this set.
    pub fn features_above(&self, threshold: f64) -> Vec<&PersistenceFeature> {
        self.features
            .iter()
            .filter(|f| f.persistence() >= threshold)
            .collect()
    }
}

/* plateau safe total order on nodes */
fn node_exceeds(value: f64, flat: usize, other_value: f64, other_flat: usize) -> bool {
    (value, flat) > (other_value, other_flat)
}

/// Extracts critical points and persistence features from a field.
pub fn analyze(field: &FluxField) -> TopologyReport {
    let critical_points = critical_points(field);
    let features = persistence_sweep(field);
    debug!(
        "topology: {} critical point(s), {} persistence feature(s)",
        critical_points.len(),
        features.len()
    );
    TopologyReport {
        critical_points,
        features,
    }
}

/// Discrete classification from neighbor window sign analysis.
/// Ties are broken by storage index so a flat plateau yields exactly
/// one representative extremum.
fn critical_points(field: &FluxField) -> Vec<CriticalPoint> {
    let spec = field.spec;
    let (ni, nj, nk) = spec.dimensions();
    let mut out = Vec::new();
    for i in 0..ni {
        for j in 0..nj {
            for k in 0..nk {
                let flat = spec.flat(i, j, k);
                let value = field.nodes[flat].value;
                let neighbors = spec.face_neighbors(i, j, k);

                let is_max = neighbors.iter().all(|&(a, b, c)| {
                    let nf = spec.flat(a, b, c);
                    node_exceeds(value, flat, field.nodes[nf].value, nf)
                });
                let is_min = neighbors.iter().all(|&(a, b, c)| {
                    let nf = spec.flat(a, b, c);
                    !node_exceeds(value, flat, field.nodes[nf].value, nf)
                });

                let kind = if is_max {
                    Some(CriticalPointKind::Maximum)
                } else if is_min {
                    Some(CriticalPointKind::Minimum)
                } else if is_saddle(field, i, j, k) {
                    Some(CriticalPointKind::Saddle)
                } else {
                    None
                };
                if let Some(kind) = kind {
                    out.push(CriticalPoint {
                        index: (i, j, k),
                        position: spec.position(i, j, k),
                        kind,
                        value,
                    });
                }
            }
        }
    }
    out
}

/// Interior node that is an extremum along some axis in each
/// direction sense: maximal along at least one axis and minimal
/// along another.
fn is_saddle(field: &FluxField, i: usize, j: usize, k: usize) -> bool {
    let spec = field.spec;
    let (ni, nj, nk) = spec.dimensions();
    let flat = spec.flat(i, j, k);
    let value = field.nodes[flat].value;
    let mut axis_max = false;
    let mut axis_min = false;
    let axes: [[Option<(usize, usize, usize)>; 2]; 3] = [
        [
            (i > 0).then(|| (i - 1, j, k)),
            (i + 1 < ni).then(|| (i + 1, j, k)),
        ],
        [
            (j > 0).then(|| (i, j - 1, k)),
            (j + 1 < nj).then(|| (i, j + 1, k)),
        ],
        [
            (k > 0).then(|| (i, j, k - 1)),
            (k + 1 < nk).then(|| (i, j, k + 1)),
        ],
    ];
    for pair in axes {
        let sides: Vec<usize> = pair
            .iter()
            .flatten()
            .map(|&(a, b, c)| spec.flat(a, b, c))
            .collect();
        if sides.len() < 2 {
            // boundary axis: no full second difference
            continue;
        }
        let above = sides
            .iter()
            .all(|&nf| node_exceeds(value, flat, field.nodes[nf].value, nf));
        let below = sides
            .iter()
            .all(|&nf| !node_exceeds(value, flat, field.nodes[nf].value, nf));
        axis_max |= above;
        axis_min |= below;
    }
    axis_max && axis_min
}

struct UnionFind {
    parent: Vec<usize>,
    /// peak (flat index) of each component, tracked at the root
    peak: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            peak: (0..n).collect(),
        }
    }
    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }
}

/// Threshold sweep from the field maximum downward. When two
/// components meet, the one with the lower peak dies and its
/// (birth, death) pair is recorded.
fn persistence_sweep(field: &FluxField) -> Vec<PersistenceFeature> {
    let spec = field.spec;
    let n = field.nodes.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        // descending by (value, index)
        (field.nodes[b].value, b)
            .partial_cmp(&(field.nodes[a].value, a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut uf = UnionFind::new(n);
    let mut active = vec![false; n];
    let mut features = Vec::new();

    for &flat in &order {
        let threshold = field.nodes[flat].value;
        active[flat] = true;
        let (i, j, k) = spec.unflat(flat);
        for (a, b, c) in spec.face_neighbors(i, j, k) {
            let neighbor = spec.flat(a, b, c);
            if !active[neighbor] {
                continue;
            }
            let root_self = uf.find(flat);
            let root_other = uf.find(neighbor);
            if root_self == root_other {
                continue;
            }
            let peak_self = uf.peak[root_self];
            let peak_other = uf.peak[root_other];
            // higher peak survives the merge
            let self_wins = node_exceeds(
                field.nodes[peak_self].value,
                peak_self,
                field.nodes[peak_other].value,
                peak_other,
            );
            let (winner, loser) = if self_wins {
                (root_self, root_other)
            } else {
                (root_other, root_self)
            };
            let dying_peak = uf.peak[loser];
            features.push(PersistenceFeature {
                birth: field.nodes[dying_peak].value,
                death: threshold,
                peak: spec.unflat(dying_peak),
            });
            uf.parent[loser] = winner;
        }
    }

    // the global maximum never merges: it dies at the field minimum
    let global_peak = order[0];
    features.push(PersistenceFeature {
        birth: field.nodes[global_peak].value,
        death: field.min_value(),
        peak: spec.unflat(global_peak),
    });

    features.sort_by(|a, b| {
        b.persistence()
            .partial_cmp(&a.persistence())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    features
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coords::GeographicRegion;
    use crate::grid::{FluxField, GridSpec, Resolution};

    /// Builds a single altitude layer field from a closure of (lon, lat).
    fn synthetic_field<F: Fn(f64, f64) -> f64>(f: F) -> FluxField {
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
                    node.variance = 1.0;
                }
            }
        }
        field
    }

    fn bump(lon: f64, lat: f64, c: (f64, f64), amplitude: f64) -> f64 {
        let r2 = (lon - c.0).powi(2) + (lat - c.1).powi(2);
        amplitude * (-r2 / 50.0).exp()
    }

    #[test]
    fn single_bump_single_dominant_feature() {
        let field = synthetic_field(|lon, lat| bump(lon, lat, (-45.0, -20.0), 1000.0));
        let report = analyze(&field);
        let maxima: Vec<_> = report
            .critical_points
            .iter()
            .filter(|c| c.kind == CriticalPointKind::Maximum)
            .collect();
        assert!(!maxima.is_empty());
        let survivors = report.features_above(500.0);
        assert_eq!(survivors.len(), 1);
        let (i, j, _) = survivors[0].peak;
        let peak = field.spec.position(i, j, 0);
        assert!((peak.longitude + 45.0).abs() <= 1.0);
        assert!((peak.latitude + 20.0).abs() <= 1.0);
    }
    #[test]
    fn two_bumps_two_features() {
        let field = synthetic_field(|lon, lat| {
            bump(lon, lat, (-50.0, -30.0), 1000.0) + bump(lon, lat, (-30.0, -15.0), 900.0)
        });
        let report = analyze(&field);
        let survivors = report.features_above(400.0);
        assert_eq!(survivors.len(), 2, "well separated bumps must not merge");
    }
    #[test]
    fn pruning_monotonicity() {
        let field = synthetic_field(|lon, lat| {
            bump(lon, lat, (-50.0, -30.0), 1000.0)
                + bump(lon, lat, (-30.0, -15.0), 700.0)
                + bump(lon, lat, (-40.0, -35.0), 300.0)
        });
        let report = analyze(&field);
        let mut previous = usize::MAX;
        for threshold in [0.0, 100.0, 250.0, 500.0, 800.0, 1200.0] {
            let count = report.features_above(threshold).len();
            assert!(
                count <= previous,
                "raising the threshold grew the feature set"
            );
            previous = count;
        }
    }
    #[test]
    fn saddle_between_two_lobes() {
        let field = synthetic_field(|lon, lat| {
            bump(lon, lat, (-50.0, -25.0), 1000.0) + bump(lon, lat, (-30.0, -25.0), 1000.0)
        });
        let report = analyze(&field);
        assert!(report
            .critical_points
            .iter()
            .any(|c| c.kind == CriticalPointKind::Saddle));
    }
    #[test]
    fn deterministic_on_plateau() {
        let field = synthetic_field(|_, _| 42.0);
        let a = analyze(&field);
        let b = analyze(&field);
        assert_eq!(a, b);
        // constant field: exactly one representative maximum survives
        assert_eq!(a.features_above(0.0).len(), a.features.len());
        let maxima = a
            .critical_points
            .iter()
            .filter(|c| c.kind == CriticalPointKind::Maximum)
            .count();
        assert_eq!(maxima, 1);
    }
}
