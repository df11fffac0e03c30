//! stack-math - Numerical kernels for rest-frame spectral stacking
//!
//! This crate provides the numerical building blocks used by the stacking
//! engine, kept free of any spectral bookkeeping:
//!
//! - **Statistics** - Median, MAD, R-7 quantiles, weighted percentiles and
//!   summary statistics that tolerate NaN input
//! - **B-spline** - Cubic B-spline least-squares fits with breakpoint spacing
//!   and coefficient covariance
//! - **Linear fit** - Weighted straight-line least squares with parameter
//!   covariance
//! - **Bilinear** - Clamped bilinear lookup on rectangular grids
//!
//! # Example
//!
//! ```
//! use stack_math::stats::{weighted_median, median_abs_deviation};
//!
//! let values = [1.0, 3.0];
//! let weights = [1.0, 1.0];
//! assert_eq!(weighted_median(&values, &weights).unwrap(), 2.0);
//! assert_eq!(median_abs_deviation(&values).unwrap(), 1.0);
//! ```

pub mod bilinear;
pub mod bspline;
pub mod linfit;
pub mod stats;

// Re-export commonly used types
pub use bilinear::{BilinearGrid, GridError};
pub use bspline::{uniform_breakpoints, BSplineFit, SplineError};
pub use linfit::{LinearFit, LinearFitError};
pub use stats::{
    mean_and_std, median, median_abs_deviation, normal_cdf, quantile_sorted,
    weighted_median, weighted_percentile, StatsError, SummaryStats,
};
