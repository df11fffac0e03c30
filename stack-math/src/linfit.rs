//! Weighted straight-line fits.
//!
//! The abscissa is centred on its weighted mean before solving so that the
//! intercept and slope are uncorrelated and the fit stays well conditioned at
//! large x (wavelengths of a few thousand Ångström).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinearFitError {
    #[error("x, y and sigma must have the same length")]
    MismatchedLengths,

    #[error("need at least 2 points with finite positive sigma, got {0}")]
    InsufficientData(usize),

    #[error("all x values are identical")]
    DegenerateAbscissa,
}

/// Result of a weighted least-squares fit y = a + b (x - x0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub x0: f64,
    pub intercept: f64,
    pub slope: f64,
    pub var_intercept: f64,
    pub var_slope: f64,
    /// Number of points that entered the fit
    pub n_points: usize,
}

impl LinearFit {
    /// Fit with weights 1/σ². Points with non-finite values or a non-positive
    /// sigma are skipped.
    pub fn fit(x: &[f64], y: &[f64], sigma: &[f64]) -> Result<Self, LinearFitError> {
        if x.len() != y.len() || x.len() != sigma.len() {
            return Err(LinearFitError::MismatchedLengths);
        }

        let points: Vec<(f64, f64, f64)> = x
            .iter()
            .zip(y)
            .zip(sigma)
            .filter(|((xi, yi), si)| {
                xi.is_finite() && yi.is_finite() && si.is_finite() && **si > 0.0
            })
            .map(|((&xi, &yi), &si)| (xi, yi, 1.0 / (si * si)))
            .collect();

        if points.len() < 2 {
            return Err(LinearFitError::InsufficientData(points.len()));
        }

        let sum_w: f64 = points.iter().map(|p| p.2).sum();
        let x0 = points.iter().map(|p| p.2 * p.0).sum::<f64>() / sum_w;

        let mut s_y = 0.0;
        let mut s_xx = 0.0;
        let mut s_xy = 0.0;
        for &(xi, yi, wi) in &points {
            let dx = xi - x0;
            s_y += wi * yi;
            s_xx += wi * dx * dx;
            s_xy += wi * dx * yi;
        }

        if s_xx <= 0.0 {
            return Err(LinearFitError::DegenerateAbscissa);
        }

        Ok(Self {
            x0,
            intercept: s_y / sum_w,
            slope: s_xy / s_xx,
            var_intercept: 1.0 / sum_w,
            var_slope: 1.0 / s_xx,
            n_points: points.len(),
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.intercept + self.slope * (x - self.x0)
    }

    /// Propagated one-sigma uncertainty of the line at `x`.
    pub fn sigma(&self, x: f64) -> f64 {
        let dx = x - self.x0;
        (self.var_intercept + dx * dx * self.var_slope).sqrt()
    }
}
