//! Long term behavior of flux series: secular trend, dominant
//! periodicity (solar cycle scale) and stability scoring.
use hifitime::Epoch;
use log::debug;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::{
    coords::GeographicCoordinates,
    epoch::decimal_year,
    errors::AnalysisError,
    uncertainty::mean_square,
};

/// Shortest candidate period retained by the scan, in years.
const MIN_PERIOD_YEARS: f64 = 2.0;
/// Longest candidate period, beyond the 11 year solar cycle.
const MAX_PERIOD_YEARS: f64 = 15.0;
const PERIOD_STEP_YEARS: f64 = 0.5;

/// Outcome of a secular variation fit over one scalar series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecularVariationResult {
    /// Linear trend, in series units per year
    pub trend_per_year: f64,
    /// Whether the trend passes a |t| > 2 significance test
    pub trend_significant: bool,
    /// Dominant period of the detrended residuals, in years,
    /// when the scan found one above the noise floor
    pub dominant_period_years: Option<f64>,
    /// Amplitude of the dominant periodic component
    pub periodic_amplitude: f64,
    /// RMS of the residuals after trend and periodic removal
    pub residual_rms: f64,
    /// Stability score, [0, 1], 1 being a perfectly steady series
    pub stability: f64,
    pub samples: usize,
    pub span_years: f64,
}

/// Ordinary least squares fit of `value = intercept + slope * t`.
/// Returns (slope, intercept, slope standard error).
fn linear_fit(times: &[f64], values: &[f64]) -> Option<(f64, f64, f64)> {
    let n = times.len() as f64;
    let t_mean = times.iter().sum::<f64>() / n;
    let v_mean = values.iter().sum::<f64>() / n;
    let sxx: f64 = times.iter().map(|t| (t - t_mean).powi(2)).sum();
    if sxx < 1e-12 {
        return None;
    }
    let sxy: f64 = times
        .iter()
        .zip(values)
        .map(|(t, v)| (t - t_mean) * (v - v_mean))
        .sum();
    let slope = sxy / sxx;
    let intercept = v_mean - slope * t_mean;
    let dof = (times.len() as f64 - 2.0).max(1.0);
    let sse: f64 = times
        .iter()
        .zip(values)
        .map(|(t, v)| (v - intercept - slope * t).powi(2))
        .sum();
    let stderr = (sse / dof / sxx).sqrt();
    Some((slope, intercept, stderr))
}

/// Least squares sinusoid of known period on a detrended series.
/// Returns (amplitude, residual mean square).
fn sinusoid_fit(times: &[f64], residuals: &[f64], period: f64) -> Option<(f64, f64)> {
    let omega = 2.0 * std::f64::consts::PI / period;
    let (mut cc, mut cs, mut ss) = (0.0, 0.0, 0.0);
    let (mut cy, mut sy) = (0.0, 0.0);
    for (t, r) in times.iter().zip(residuals) {
        let (sin, cos) = (omega * t).sin_cos();
        cc += cos * cos;
        cs += cos * sin;
        ss += sin * sin;
        cy += cos * r;
        sy += sin * r;
    }
    let normal = Matrix2::new(cc, cs, cs, ss);
    let coeffs = normal.lu().solve(&Vector2::new(cy, sy))?;
    let amplitude = (coeffs[0].powi(2) + coeffs[1].powi(2)).sqrt();
    let remaining: Vec<f64> = times
        .iter()
        .zip(residuals)
        .map(|(t, r)| {
            let (sin, cos) = (omega * t).sin_cos();
            r - coeffs[0] * cos - coeffs[1] * sin
        })
        .collect();
    Some((amplitude, mean_square(&remaining)))
}

/// Fits trend + periodicity to a time series of flux scalars.
///
/// Requires at least 3 distinct epochs. The period scan only claims a
/// dominant period when the candidate explains a meaningful share of
/// the detrended variance and the series spans at least one full cycle.
pub fn analyze_secular_variation(
    series: &[(Epoch, f64)],
) -> Result<SecularVariationResult, AnalysisError> {
    let mut sorted: Vec<(Epoch, f64)> = series.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.dedup_by(|a, b| a.0 == b.0);
    if sorted.len() < 3 {
        return Err(AnalysisError::InsufficientData {
            available: sorted.len(),
            required: 3,
        });
    }

    let times: Vec<f64> = sorted.iter().map(|(e, _)| decimal_year(*e)).collect();
    let values: Vec<f64> = sorted.iter().map(|(_, v)| *v).collect();
    let span_years = times[times.len() - 1] - times[0];

    let (slope, intercept, stderr) =
        linear_fit(&times, &values).ok_or(AnalysisError::NumericalInstability {
            stage: "temporal".to_string(),
            detail: "degenerate time axis".to_string(),
        })?;
    // stderr of 0 means a noiseless fit: any nonzero slope is exact
    let trend_significant = if stderr > 0.0 {
        (slope / stderr).abs() > 2.0
    } else {
        slope != 0.0
    };

    let residuals: Vec<f64> = times
        .iter()
        .zip(&values)
        .map(|(t, v)| v - intercept - slope * t)
        .collect();
    let detrended_ms = mean_square(&residuals);

    let mut best: Option<(f64, f64, f64)> = None; // (period, amplitude, remaining ms)
    let mut period = MIN_PERIOD_YEARS;
    while period <= MAX_PERIOD_YEARS + 1e-9 {
        if period <= span_years {
            if let Some((amplitude, remaining)) = sinusoid_fit(&times, &residuals, period) {
                if best.map_or(true, |(_, _, ms)| remaining < ms) {
                    best = Some((period, amplitude, remaining));
                }
            }
        }
        period += PERIOD_STEP_YEARS;
    }

    // only claim a period when it actually explains the residual
    let (dominant_period_years, periodic_amplitude, residual_ms) = match best {
        Some((period, amplitude, remaining))
            if detrended_ms > 0.0 && remaining < 0.5 * detrended_ms =>
        {
            debug!(
                "dominant period {:.1} y, amplitude {:.3e}",
                period, amplitude
            );
            (Some(period), amplitude, remaining)
        },
        _ => (None, 0.0, detrended_ms),
    };

    let residual_rms = residual_ms.sqrt();
    let mean_level = values.iter().sum::<f64>() / values.len() as f64;
    let stability = 1.0 / (1.0 + residual_rms / mean_level.abs().max(1e-9));

    Ok(SecularVariationResult {
        trend_per_year: slope,
        trend_significant,
        dominant_period_years,
        periodic_amplitude,
        residual_rms,
        stability,
        samples: sorted.len(),
        span_years,
    })
}

/// Westward drift rate of an anomaly center, in degrees of longitude
/// per year (negative is westward).
pub fn drift_rate(track: &[(Epoch, GeographicCoordinates)]) -> Result<f64, AnalysisError> {
    if track.len() < 3 {
        return Err(AnalysisError::InsufficientData {
            available: track.len(),
            required: 3,
        });
    }
    let times: Vec<f64> = track.iter().map(|(e, _)| decimal_year(*e)).collect();
    let lons: Vec<f64> = track.iter().map(|(_, c)| c.longitude).collect();
    let (slope, _, _) = linear_fit(&times, &lons).ok_or(AnalysisError::NumericalInstability {
        stage: "temporal".to_string(),
        detail: "degenerate time axis".to_string(),
    })?;
    Ok(slope)
}
