//! Ordinary kriging over local neighborhoods.
//!
//! Produces the interpolated value and the kriging variance in the
//! same pass, which makes it the preferred backend whenever both
//! are required together.
use log::trace;
use nalgebra::{DMatrix, DVector};

use super::{metric_distance, SamplePoint};
use crate::{
    grid::{FluxField, GridSpec, Resolution},
    uncertainty::clamp_variance,
};

/// Exponential variogram fitted from the data.
#[derive(Debug, Copy, Clone)]
struct Variogram {
    nugget: f64,
    sill: f64,
    range: f64,
}

impl Variogram {
    /// Moment based fit: nugget from the measurement noise, sill from
    /// the sample variance, range from the sampling density.
    fn fit(points: &[SamplePoint]) -> Self {
        let n = points.len() as f64;
        let nugget = points.iter().map(|p| p.total().variance()).sum::<f64>() / n;
        let mean = points.iter().map(|p| p.total().value).sum::<f64>() / n;
        let sample_variance = points
            .iter()
            .map(|p| (p.total().value - mean).powi(2))
            .sum::<f64>()
            / n;
        let sill = sample_variance.max(nugget * 1.5).max(1e-9);
        let mut spacing_sum = 0.0;
        for (i, p) in points.iter().enumerate() {
            let nearest = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, q)| metric_distance(&p.coordinates, &q.coordinates))
                .fold(f64::INFINITY, f64::min);
            spacing_sum += nearest;
        }
        let range = (3.0 * spacing_sum / n).max(1e-3);
        Self {
            nugget,
            sill,
            range,
        }
    }
    /// Semivariance at lag `h`.
    fn gamma(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return 0.0;
        }
        self.nugget + (self.sill - self.nugget) * (1.0 - (-3.0 * h / self.range).exp())
    }
}

/// Returns None when any local kriging system cannot be solved,
/// handing control to the caller's degraded fallback.
pub(crate) fn interpolate(
    points: &[SamplePoint],
    spec: GridSpec,
    resolution: Resolution,
    neighborhood: usize,
) -> Option<FluxField> {
    let variogram = Variogram::fit(points);
    trace!(
        "variogram fit: nugget={:.3e}, sill={:.3e}, range={:.2}",
        variogram.nugget,
        variogram.sill,
        variogram.range
    );

    let k = neighborhood.min(points.len());
    let mut field = FluxField::zeroed(spec, resolution);
    let (ni, nj, nk) = spec.dimensions();
    // node evaluations are independent: each one only reads its
    // local neighborhood
    for i in 0..ni {
        for j in 0..nj {
            for kk in 0..nk {
                let node_position = spec.position(i, j, kk);
                let mut indexed: Vec<(f64, usize)> = points
                    .iter()
                    .enumerate()
                    .map(|(index, p)| (metric_distance(&node_position, &p.coordinates), index))
                    .collect();
                indexed.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let local = &indexed[..k];

                // ordinary kriging system with Lagrange multiplier
                let mut a = DMatrix::zeros(k + 1, k + 1);
                let mut b = DVector::zeros(k + 1);
                for (row, (_, pi)) in local.iter().enumerate() {
                    for (col, (_, pj)) in local.iter().enumerate() {
                        a[(row, col)] = variogram.gamma(metric_distance(
                            &points[*pi].coordinates,
                            &points[*pj].coordinates,
                        ));
                    }
                    a[(row, k)] = 1.0;
                    a[(k, row)] = 1.0;
                    b[row] = variogram.gamma(local[row].0);
                }
                b[k] = 1.0;

                let lambda = a.lu().solve(&b)?;

                let mut value = 0.0;
                let mut variance = 0.0;
                let mut min_contributing = f64::INFINITY;
                for (row, (distance, index)) in local.iter().enumerate() {
                    let total = points[*index].total();
                    value += lambda[row] * total.value;
                    variance += lambda[row] * variogram.gamma(*distance);
                    min_contributing = min_contributing.min(total.variance());
                }
                variance += lambda[k];

                let node = &mut field.nodes[spec.flat(i, j, kk)];
                node.value = value.max(0.0);
                node.variance = clamp_variance(variance, min_contributing);
            }
        }
    }
    Some(field)
}
