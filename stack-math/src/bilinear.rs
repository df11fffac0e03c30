//! Bilinear lookup on rectilinear 2D grids.
//!
//! Grids are irregular in both axes. Queries outside the grid clamp to the
//! nearest edge rather than extrapolating, and non-finite corner values are
//! dropped with the remaining corner weights renormalised.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("data shape {data_shape:?} does not match axis lengths (x: {x_len}, y: {y_len})")]
    DimensionMismatch {
        x_len: usize,
        y_len: usize,
        data_shape: (usize, usize),
    },

    #[error("{axis} axis must be non-empty and strictly ascending")]
    UnsortedAxis { axis: &'static str },

    #[error("all corner values are invalid at ({x}, {y})")]
    NoValidData { x: f64, y: f64 },
}

/// Values sampled on an `x` × `y` grid, stored as `data[[y_index, x_index]]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BilinearGrid {
    x_coords: Vec<f64>,
    y_coords: Vec<f64>,
    data: Array2<f64>,
}

impl BilinearGrid {
    pub fn new(
        x_coords: Vec<f64>,
        y_coords: Vec<f64>,
        data: Array2<f64>,
    ) -> Result<Self, GridError> {
        let (ny, nx) = data.dim();
        if nx != x_coords.len() || ny != y_coords.len() {
            return Err(GridError::DimensionMismatch {
                x_len: x_coords.len(),
                y_len: y_coords.len(),
                data_shape: (ny, nx),
            });
        }
        if !is_ascending(&x_coords) {
            return Err(GridError::UnsortedAxis { axis: "x" });
        }
        if !is_ascending(&y_coords) {
            return Err(GridError::UnsortedAxis { axis: "y" });
        }

        Ok(Self {
            x_coords,
            y_coords,
            data,
        })
    }

    /// Check invariants after deserialisation.
    pub fn validate(&self) -> Result<(), GridError> {
        Self::new(self.x_coords.clone(), self.y_coords.clone(), self.data.clone()).map(|_| ())
    }

    pub fn x_coords(&self) -> &[f64] {
        &self.x_coords
    }

    pub fn y_coords(&self) -> &[f64] {
        &self.y_coords
    }

    /// Interpolated value at (x, y), clamped to the grid.
    pub fn lookup(&self, x: f64, y: f64) -> Result<f64, GridError> {
        let (x_low, x_high, x_weight) = clamped_indices(&self.x_coords, x);
        let (y_low, y_high, y_weight) = clamped_indices(&self.y_coords, y);

        let corners = [
            (self.data[[y_low, x_low]], (1.0 - x_weight) * (1.0 - y_weight)),
            (self.data[[y_low, x_high]], x_weight * (1.0 - y_weight)),
            (self.data[[y_high, x_low]], (1.0 - x_weight) * y_weight),
            (self.data[[y_high, x_high]], x_weight * y_weight),
        ];

        let mut valid_sum = 0.0;
        let mut weight_sum = 0.0;
        for (value, weight) in corners {
            if value.is_finite() && weight > 0.0 {
                valid_sum += value * weight;
                weight_sum += weight;
            }
        }

        if weight_sum > 0.0 {
            Ok(valid_sum / weight_sum)
        } else {
            Err(GridError::NoValidData { x, y })
        }
    }
}

fn is_ascending(coords: &[f64]) -> bool {
    !coords.is_empty()
        && coords.iter().all(|c| c.is_finite())
        && coords.windows(2).all(|w| w[1] > w[0])
}

/// (lower, upper, fraction) with the query clamped into the axis range.
fn clamped_indices(coords: &[f64], value: f64) -> (usize, usize, f64) {
    let n = coords.len();
    if n == 1 || value <= coords[0] || value.is_nan() {
        return (0, 0, 0.0);
    }
    if value >= coords[n - 1] {
        return (n - 1, n - 1, 0.0);
    }

    let right = coords.partition_point(|&c| c <= value);
    let left = right - 1;
    let weight = (value - coords[left]) / (coords[right] - coords[left]);
    (left, right, weight)
}
