//! Statistical functions for stacking and resampling
//!
//! Every estimator here filters NaN input instead of propagating it, because
//! per-pixel sample sets routinely contain sentinel values for objects that
//! did not cover a pixel.

use scilib::math::basic::erf;
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;
use thiserror::Error;

/// Errors produced by the statistics helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("insufficient data: {total} values, {valid} valid")]
    InsufficientData { total: usize, valid: usize },

    #[error("values and weights must have the same length ({values} vs {weights})")]
    LengthMismatch { values: usize, weights: usize },

    #[error("total weight must be positive, got {0}")]
    NonPositiveWeight(f64),

    #[error("percentile {0} is outside [0, 1]")]
    InvalidPercentile(f64),
}

/// Cumulative distribution function for standard normal distribution
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    valid.sort_by(|a, b| a.total_cmp(b));
    valid
}

/// Calculate median of a slice of f64 values
///
/// NaN values are ignored, infinite values are kept. For even-length data the
/// two middle values are averaged.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError::InsufficientData)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let valid = finite_sorted(values);
    if valid.is_empty() {
        return Err(StatsError::InsufficientData {
            total: values.len(),
            valid: 0,
        });
    }

    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        Ok((valid[mid - 1] + valid[mid]) / 2.0)
    } else {
        Ok(valid[mid])
    }
}

/// Median absolute deviation from the median.
///
/// Returned as-is, without the 1.4826 factor that would turn it into a
/// Gaussian-equivalent sigma.
pub fn median_abs_deviation(values: &[f64]) -> Result<f64, StatsError> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Mean and sample standard deviation (n - 1 denominator) of the non-NaN values.
///
/// A single valid value has zero spread.
pub fn mean_and_std(values: &[f64]) -> Result<(f64, f64), StatsError> {
    let valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(StatsError::InsufficientData {
            total: values.len(),
            valid: 0,
        });
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    if valid.len() < 2 {
        return Ok((mean, 0.0));
    }
    let var = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Ok((mean, var.sqrt()))
}

/// Quantile of pre-sorted data using the R-7 definition (linear interpolation
/// between order statistics at position `(n - 1) * p`).
///
/// # Panics
///
/// Panics if `sorted` is empty or `p` is outside [0, 1].
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    assert!(!sorted.is_empty(), "Cannot compute quantile of empty slice");
    assert!(
        (0.0..=1.0).contains(&p),
        "Quantile probability must be in [0, 1]"
    );

    let n = sorted.len();
    let h = (n - 1) as f64 * p;
    let h_floor = h.floor() as usize;
    let h_frac = h - h.floor();

    if h_floor >= n - 1 {
        sorted[n - 1]
    } else if h_frac == 0.0 {
        sorted[h_floor]
    } else {
        sorted[h_floor] + h_frac * (sorted[h_floor + 1] - sorted[h_floor])
    }
}

/// Weighted percentile of `values`.
///
/// Samples are sorted and each one is placed at the midpoint of its cumulative
/// weight interval, `(S_k - w_k / 2) / W`. The percentile is interpolated
/// linearly between those midpoints and clamped to the extreme values outside
/// them. With equal weights an odd-sized set returns its middle value exactly
/// and an even-sized set returns the mean of the two middle values.
///
/// Pairs with a NaN value or a non-positive/non-finite weight are ignored.
pub fn weighted_percentile(values: &[f64], weights: &[f64], p: f64) -> Result<f64, StatsError> {
    if values.len() != weights.len() {
        return Err(StatsError::LengthMismatch {
            values: values.len(),
            weights: weights.len(),
        });
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(StatsError::InvalidPercentile(p));
    }

    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter(|(v, w)| !v.is_nan() && w.is_finite() && **w > 0.0)
        .map(|(&v, &w)| (v, w))
        .collect();
    if pairs.is_empty() {
        return Err(StatsError::InsufficientData {
            total: values.len(),
            valid: 0,
        });
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(StatsError::NonPositiveWeight(total));
    }

    let mut cumulative = 0.0;
    let mut midpoints = Vec::with_capacity(pairs.len());
    for (_, w) in &pairs {
        cumulative += w;
        midpoints.push((cumulative - 0.5 * w) / total);
    }

    let last = pairs.len() - 1;
    if p <= midpoints[0] {
        return Ok(pairs[0].0);
    }
    if p >= midpoints[last] {
        return Ok(pairs[last].0);
    }

    // partition_point gives the first midpoint strictly above p
    let upper = midpoints.partition_point(|&c| c <= p);
    let lower = upper - 1;
    if midpoints[lower] == p {
        return Ok(pairs[lower].0);
    }

    let t = (p - midpoints[lower]) / (midpoints[upper] - midpoints[lower]);
    Ok(pairs[lower].0 + t * (pairs[upper].0 - pairs[lower].0))
}

/// Weighted median, the 50th weighted percentile.
pub fn weighted_median(values: &[f64], weights: &[f64]) -> Result<f64, StatsError> {
    weighted_percentile(values, weights, 0.5)
}

/// Minimum, maximum, mean and median of a scalar sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl SummaryStats {
    /// Summarise the non-NaN values; all fields are NaN for an empty sample.
    pub fn from_values(values: &[f64]) -> Self {
        let valid = finite_sorted(values);
        if valid.is_empty() {
            return Self {
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                median: f64::NAN,
            };
        }

        let mean = valid.iter().sum::<f64>() / valid.len() as f64;
        Self {
            min: valid[0],
            max: valid[valid.len() - 1],
            mean,
            median: median(&valid).unwrap_or(f64::NAN),
        }
    }
}
