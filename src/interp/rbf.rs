//! Gaussian radial basis function interpolation.
//!
//! The Gram matrix is factored (inverted) once per point set and the
//! factorization is reused for every flux channel sharing that set,
//! through the shared [FactorizationCache]. Node variance is
//! estimated from leave-one-out cross validation residuals.
use log::debug;
use nalgebra::{DMatrix, DVector};

use super::{metric_distance, FactorizationCache, SamplePoint};
use crate::{
    grid::{FluxField, GridSpec, Resolution},
    uncertainty::{clamp_variance, mean_square},
};

/// Gaussian kernel.
fn kernel(distance: f64, shape: f64) -> f64 {
    (-(distance / shape).powi(2)).exp()
}

/// Kernel shape factor: tied to the mean nearest neighbor spacing
/// so the basis width follows the sampling density.
fn shape_factor(points: &[SamplePoint]) -> f64 {
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        let nearest = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, q)| metric_distance(&p.coordinates, &q.coordinates))
            .fold(f64::INFINITY, f64::min);
        total += nearest;
    }
    (1.5 * total / points.len() as f64).max(1e-3)
}

/// Leave-one-out residuals from the interpolation weights and the
/// inverse Gram diagonal: e_i = alpha_i / (K^-1)_ii.
fn loo_residuals(weights: &DVector<f64>, inverse: &DMatrix<f64>) -> Vec<f64> {
    weights
        .iter()
        .enumerate()
        .map(|(i, alpha)| {
            let diag = inverse[(i, i)];
            if diag.abs() > 1e-14 {
                alpha / diag
            } else {
                0.0
            }
        })
        .collect()
}

/// Returns None when the Gram matrix cannot be inverted even with
/// LU, which triggers the caller's documented degraded fallback.
pub(crate) fn interpolate(
    points: &[SamplePoint],
    spec: GridSpec,
    resolution: Resolution,
    cache: &FactorizationCache,
) -> Option<FluxField> {
    let n = points.len();
    let shape = shape_factor(points);
    let key = super::fingerprint(points);

    let inverse = cache.get_or_factorize(key, || {
        let mut gram = DMatrix::from_fn(n, n, |i, j| {
            kernel(
                metric_distance(&points[i].coordinates, &points[j].coordinates),
                shape,
            )
        });
        // tiny ridge keeps the Gaussian kernel invertible without
        // noticeably breaking exactness at the support points
        for i in 0..n {
            gram[(i, i)] += 1e-8;
        }
        match gram.clone().cholesky() {
            Some(cholesky) => Some(cholesky.inverse()),
            None => {
                debug!("gram matrix not positive definite, trying LU");
                gram.try_inverse()
            },
        }
    })?;

    // one factorization, one solve per flux channel
    let y_electron = DVector::from_iterator(n, points.iter().map(|p| p.electron.value));
    let y_proton = DVector::from_iterator(n, points.iter().map(|p| p.proton.value));
    let alpha_electron = &*inverse * y_electron;
    let alpha_proton = &*inverse * y_proton;
    let alpha_total = &alpha_electron + &alpha_proton;

    let residuals = loo_residuals(&alpha_total, &inverse);
    let global_mse = mean_square(&residuals);
    let min_measured_variance = points
        .iter()
        .map(|p| p.total().variance())
        .fold(f64::INFINITY, f64::min);

    let mut field = FluxField::zeroed(spec, resolution);
    let (ni, nj, nk) = spec.dimensions();
    for i in 0..ni {
        for j in 0..nj {
            for k in 0..nk {
                let node_position = spec.position(i, j, k);
                let mut value = 0.0;
                let mut weight_sum = 0.0;
                let mut weighted_mse = 0.0;
                for (index, p) in points.iter().enumerate() {
                    let phi = kernel(metric_distance(&node_position, &p.coordinates), shape);
                    value += (alpha_electron[index] + alpha_proton[index]) * phi;
                    weight_sum += phi;
                    weighted_mse += phi * residuals[index] * residuals[index];
                }
                let node = &mut field.nodes[spec.flat(i, j, k)];
                node.value = value.max(0.0);
                let local_mse = if weight_sum > 1e-12 {
                    weighted_mse / weight_sum
                } else {
                    global_mse
                };
                node.variance = clamp_variance(local_mse, min_measured_variance);
            }
        }
    }
    Some(field)
}
