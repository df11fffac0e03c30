//! Cubic B-spline least-squares fitting
//!
//! Fits a smooth curve through noisy samples by weighted least squares on a
//! clamped cubic B-spline basis with user-chosen breakpoints. Unlike an
//! interpolating spline the curve does not pass through every point, which is
//! what a continuum fit under absorption lines needs.
//!
//! # Mathematical Background
//!
//! With breakpoints b₀ < b₁ < … < bₘ the clamped knot vector repeats the end
//! breakpoints four times and the curve is
//!
//! S(x) = Σⱼ cⱼ Nⱼ,₃(x)
//!
//! where Nⱼ,₃ are the Cox–de Boor cubic basis functions. The coefficients solve
//! the normal equations (AᵀWA) c = AᵀWy and their covariance is (AᵀWA)⁻¹.
//!
//! # Examples
//!
//! ```rust
//! use stack_math::bspline::{uniform_breakpoints, BSplineFit};
//!
//! let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.2).collect();
//! let y: Vec<f64> = x.iter().map(|v| 2.0 + 0.5 * v).collect();
//! let w = vec![1.0; x.len()];
//!
//! let breaks = uniform_breakpoints(0.0, 9.8, 2.5).unwrap();
//! let fit = BSplineFit::fit(&x, &y, &w, &breaks).unwrap();
//! assert!((fit.evaluate(4.1) - 4.05).abs() < 1e-8);
//! ```

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

const DEGREE: usize = 3;

/// Errors that can occur while fitting a B-spline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplineError {
    #[error("x, y and weights must have the same length")]
    MismatchedLengths,

    #[error("need at least {needed} weighted points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("breakpoints must be finite, strictly ascending and at least 2")]
    InvalidBreakpoints,

    #[error("normal equations are singular")]
    Singular,
}

/// A fitted cubic B-spline with coefficient covariance.
#[derive(Debug, Clone)]
pub struct BSplineFit {
    knots: Vec<f64>,
    coeffs: DVector<f64>,
    covariance: DMatrix<f64>,
}

/// Breakpoints from `x_min` to `x_max` every `spacing`, always ending exactly
/// at `x_max`. A trailing sliver shorter than half a spacing is merged into the
/// previous interval.
///
/// Fails with [`SplineError::InvalidBreakpoints`] unless `spacing` is
/// positive and `x_min < x_max`, all finite.
pub fn uniform_breakpoints(x_min: f64, x_max: f64, spacing: f64) -> Result<Vec<f64>, SplineError> {
    let finite = x_min.is_finite() && x_max.is_finite() && spacing.is_finite();
    if !(finite && spacing > 0.0 && x_max > x_min) {
        return Err(SplineError::InvalidBreakpoints);
    }

    let n_intervals = ((x_max - x_min) / spacing).round().max(1.0) as usize;
    let step = (x_max - x_min) / n_intervals as f64;
    let mut breaks: Vec<f64> = (0..n_intervals).map(|i| x_min + i as f64 * step).collect();
    breaks.push(x_max);
    Ok(breaks)
}

/// Remove interior breakpoints so that every interval holds at least one
/// sample. Empty intervals leave basis functions without support and make the
/// normal equations singular.
fn merge_empty_intervals(breaks: &[f64], sorted_x: &[f64]) -> Vec<f64> {
    let mut kept = vec![breaks[0]];
    for &b in &breaks[1..] {
        let lo = *kept.last().unwrap_or(&breaks[0]);
        let start = sorted_x.partition_point(|&v| v < lo);
        let has_data = start < sorted_x.len() && sorted_x[start] < b;
        if has_data {
            kept.push(b);
        }
    }

    let end = breaks[breaks.len() - 1];
    if *kept.last().unwrap_or(&end) < end {
        // the last surviving interval absorbs the empty tail
        if kept.len() > 1 {
            kept.pop();
        }
        kept.push(end);
    }
    kept
}

impl BSplineFit {
    /// Fit a cubic B-spline to weighted samples.
    ///
    /// # Arguments
    /// * `x` - Sample abscissae (any order)
    /// * `y` - Sample values
    /// * `weights` - Per-sample weights, usually 1/σ². Points with a zero or
    ///   non-finite weight are ignored.
    /// * `breakpoints` - Strictly ascending breakpoints spanning the data
    ///
    /// # Returns
    /// The fitted spline or a [`SplineError`].
    pub fn fit(
        x: &[f64],
        y: &[f64],
        weights: &[f64],
        breakpoints: &[f64],
    ) -> Result<Self, SplineError> {
        if x.len() != y.len() || x.len() != weights.len() {
            return Err(SplineError::MismatchedLengths);
        }
        if breakpoints.len() < 2 || breakpoints.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SplineError::InvalidBreakpoints);
        }

        let mut points: Vec<(f64, f64, f64)> = x
            .iter()
            .zip(y)
            .zip(weights)
            .filter(|((xi, yi), wi)| {
                xi.is_finite() && yi.is_finite() && wi.is_finite() && **wi > 0.0
            })
            .map(|((&xi, &yi), &wi)| (xi, yi, wi))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        if points.len() < DEGREE + 1 {
            return Err(SplineError::InsufficientData {
                needed: DEGREE + 1,
                got: points.len(),
            });
        }

        let sorted_x: Vec<f64> = points.iter().map(|p| p.0).collect();
        let breaks = merge_empty_intervals(breakpoints, &sorted_x);

        let mut knots = Vec::with_capacity(breaks.len() + 2 * DEGREE);
        knots.extend(std::iter::repeat(breaks[0]).take(DEGREE));
        knots.extend_from_slice(&breaks);
        knots.extend(std::iter::repeat(breaks[breaks.len() - 1]).take(DEGREE));

        let n_basis = knots.len() - DEGREE - 1;
        if points.len() < n_basis {
            return Err(SplineError::InsufficientData {
                needed: n_basis,
                got: points.len(),
            });
        }

        let mut normal = DMatrix::<f64>::zeros(n_basis, n_basis);
        let mut rhs = DVector::<f64>::zeros(n_basis);

        for &(xi, yi, wi) in &points {
            let span = find_span(&knots, n_basis, xi);
            let basis = basis_functions(&knots, span, xi);
            let first = span - DEGREE;
            for a in 0..=DEGREE {
                rhs[first + a] += wi * basis[a] * yi;
                for b in 0..=DEGREE {
                    normal[(first + a, first + b)] += wi * basis[a] * basis[b];
                }
            }
        }

        let cholesky = match normal.clone().cholesky() {
            Some(c) => c,
            None => {
                // tiny ridge for nearly rank-deficient bases at the data edges
                let ridge = 1e-12 * normal.trace().abs().max(f64::MIN_POSITIVE);
                let mut damped = normal;
                for i in 0..n_basis {
                    damped[(i, i)] += ridge;
                }
                damped.cholesky().ok_or(SplineError::Singular)?
            }
        };

        let coeffs = cholesky.solve(&rhs);
        let covariance = cholesky.inverse();

        Ok(Self {
            knots,
            coeffs,
            covariance,
        })
    }

    fn n_basis(&self) -> usize {
        self.coeffs.len()
    }

    /// Domain covered by the fit; evaluation clamps to it.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }

    /// Evaluate the spline at `x`. Values outside the breakpoint range are
    /// clamped to the nearest end.
    pub fn evaluate(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        let x = x.clamp(lo, hi);
        let span = find_span(&self.knots, self.n_basis(), x);
        let basis = basis_functions(&self.knots, span, x);
        let first = span - DEGREE;
        (0..=DEGREE).map(|a| basis[a] * self.coeffs[first + a]).sum()
    }

    /// One-sigma uncertainty of the fitted curve at `x`, from the coefficient
    /// covariance: sqrt(Nᵀ C N).
    pub fn sigma(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        let x = x.clamp(lo, hi);
        let span = find_span(&self.knots, self.n_basis(), x);
        let basis = basis_functions(&self.knots, span, x);
        let first = span - DEGREE;

        let mut var = 0.0;
        for a in 0..=DEGREE {
            for b in 0..=DEGREE {
                var += basis[a] * basis[b] * self.covariance[(first + a, first + b)];
            }
        }
        var.max(0.0).sqrt()
    }

    /// Number of breakpoints that survived merging of empty intervals.
    pub fn breakpoint_count(&self) -> usize {
        self.knots.len() - 2 * DEGREE
    }
}

/// Knot span index containing `x` (The NURBS Book, A2.1).
fn find_span(knots: &[f64], n_basis: usize, x: f64) -> usize {
    if x >= knots[n_basis] {
        return n_basis - 1;
    }
    if x <= knots[DEGREE] {
        return DEGREE;
    }

    // Binary search over [DEGREE, n_basis)
    let mut low = DEGREE;
    let mut high = n_basis;
    let mut mid = (low + high) / 2;
    while x < knots[mid] || x >= knots[mid + 1] {
        if x < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    mid
}

/// Non-zero cubic basis functions at `x` in `span` (The NURBS Book, A2.2).
fn basis_functions(knots: &[f64], span: usize, x: f64) -> [f64; DEGREE + 1] {
    let mut n = [0.0; DEGREE + 1];
    let mut left = [0.0; DEGREE + 1];
    let mut right = [0.0; DEGREE + 1];
    n[0] = 1.0;

    for j in 1..=DEGREE {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom != 0.0 { n[r] / denom } else { 0.0 };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}
