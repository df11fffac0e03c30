//! Per-pixel object weights and survey completeness corrections.

use serde::{Deserialize, Serialize};
use stack_math::{median, BilinearGrid, GridError};

use crate::config::{WeightMode, WeightingConfig};
use crate::error::{length_mismatch, QualityWarning, Result, StackError};

/// Completeness as a function of (redshift, covariate), e.g. the detection
/// efficiency of a survey for a given line strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessSurface {
    pub name: String,
    grid: BilinearGrid,
}

impl CompletenessSurface {
    pub fn new(name: impl Into<String>, grid: BilinearGrid) -> Self {
        Self {
            name: name.into(),
            grid,
        }
    }

    /// Completeness at `(redshift, covariate)`, clamped to the sampled grid.
    /// NaN when every neighbouring grid value is invalid.
    pub fn factor(&self, redshift: f64, covariate: f64) -> f64 {
        match self.grid.lookup(redshift, covariate) {
            Ok(value) => value,
            Err(GridError::NoValidData { .. }) => f64::NAN,
            Err(e) => {
                log::warn!("completeness surface {}: {e}", self.name);
                f64::NAN
            }
        }
    }
}

/// Weight assignment rule for every row of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightPolicy {
    mode: WeightMode,
    completeness: bool,
    n_completeness: usize,
}

/// Product of the finite completeness factors, or the reason there is none.
fn completeness_product(factors: &[f64]) -> std::result::Result<f64, QualityWarning> {
    let finite: Vec<f64> = factors.iter().copied().filter(|f| f.is_finite()).collect();
    if finite.is_empty() {
        return Err(QualityWarning::NonFiniteCompleteness);
    }
    let product: f64 = finite.iter().product();
    if product > 0.0 {
        Ok(product)
    } else {
        Err(QualityWarning::NonPositiveCompleteness)
    }
}

impl WeightPolicy {
    /// Completeness correction only combines with uniform weighting.
    pub fn new(config: &WeightingConfig) -> Result<Self> {
        if config.completeness && config.mode != WeightMode::Uniform {
            return Err(StackError::Configuration(format!(
                "completeness weighting cannot be combined with {:?} weighting",
                config.mode
            )));
        }
        Ok(Self {
            mode: config.mode,
            completeness: config.completeness,
            n_completeness: config.n_completeness,
        })
    }

    pub fn uniform() -> Self {
        Self {
            mode: WeightMode::Uniform,
            completeness: false,
            n_completeness: 0,
        }
    }

    pub fn mode(&self) -> WeightMode {
        self.mode
    }

    pub fn uses_completeness(&self) -> bool {
        self.completeness
    }

    /// Weights for one rebinned object.
    ///
    /// Pixels with `count == 0` always get weight 0. A returned warning means
    /// the object keeps its pixels but contributes no weight.
    pub fn object_weights(
        &self,
        variance: &[f64],
        count: &[u32],
        completeness: &[f64],
    ) -> Result<(Vec<f64>, Option<QualityWarning>)> {
        if count.len() != variance.len() {
            return Err(length_mismatch("weight count plane", variance.len(), count.len()));
        }

        let mut weights: Vec<f64> = match self.mode {
            WeightMode::Uniform => count.iter().map(|&c| if c > 0 { 1.0 } else { 0.0 }).collect(),
            WeightMode::InverseVariance | WeightMode::LightWeighted => variance
                .iter()
                .zip(count)
                .map(|(&v, &c)| if c > 0 && v > 0.0 && v.is_finite() { 1.0 / v } else { 0.0 })
                .collect(),
        };

        if self.mode == WeightMode::LightWeighted {
            let ivar: Vec<f64> = weights.iter().copied().filter(|&w| w > 0.0).collect();
            match median(&ivar) {
                Ok(norm) if norm > 0.0 => weights.iter_mut().for_each(|w| *w /= norm),
                _ => {
                    if count.iter().any(|&c| c > 0) {
                        weights.iter_mut().for_each(|w| *w = 0.0);
                        return Ok((weights, Some(QualityWarning::NoInverseVariance)));
                    }
                }
            }
        }

        if self.completeness {
            if completeness.len() != self.n_completeness {
                return Err(StackError::Configuration(format!(
                    "object carries {} completeness factors, {} configured",
                    completeness.len(),
                    self.n_completeness
                )));
            }
            match completeness_product(completeness) {
                Ok(product) => weights.iter_mut().for_each(|w| *w /= product),
                Err(warning) => {
                    weights.iter_mut().for_each(|w| *w = 0.0);
                    return Ok((weights, Some(warning)));
                }
            }
        }

        Ok((weights, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn policy(mode: WeightMode, completeness: bool, n: usize) -> WeightPolicy {
        WeightPolicy::new(&WeightingConfig {
            mode,
            completeness,
            n_completeness: n,
        })
        .unwrap()
    }

    #[test]
    fn test_uniform_respects_count() {
        let (w, warn) = policy(WeightMode::Uniform, false, 0)
            .object_weights(&[1.0, 0.0, 4.0], &[1, 0, 1], &[])
            .unwrap();
        assert_eq!(w, vec![1.0, 0.0, 1.0]);
        assert!(warn.is_none());
    }

    #[test]
    fn test_inverse_variance() {
        let (w, _) = policy(WeightMode::InverseVariance, false, 0)
            .object_weights(&[0.5, 4.0, 0.0], &[1, 1, 1], &[])
            .unwrap();
        assert_eq!(w, vec![2.0, 0.25, 0.0]);
    }

    #[test]
    fn test_light_weighted_median_is_one() {
        let (w, _) = policy(WeightMode::LightWeighted, false, 0)
            .object_weights(&[1.0, 0.5, 0.25], &[1, 1, 1], &[])
            .unwrap();
        // ivar 1, 2, 4 with median 2
        assert_eq!(w, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_completeness_divides_by_product() {
        let (w, warn) = policy(WeightMode::Uniform, true, 2)
            .object_weights(&[1.0, 1.0], &[1, 1], &[0.5, f64::NAN])
            .unwrap();
        assert_eq!(w, vec![2.0, 2.0]);
        assert!(warn.is_none());

        let (w, _) = policy(WeightMode::Uniform, true, 2)
            .object_weights(&[1.0], &[1], &[0.5, 0.8])
            .unwrap();
        assert_relative_eq!(w[0], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_completeness_zeroes_weight() {
        let (w, warn) = policy(WeightMode::Uniform, true, 2)
            .object_weights(&[1.0, 1.0], &[1, 1], &[f64::NAN, f64::INFINITY])
            .unwrap();
        assert_eq!(w, vec![0.0, 0.0]);
        assert_eq!(warn, Some(QualityWarning::NonFiniteCompleteness));
    }

    #[test]
    fn test_completeness_count_mismatch() {
        let err = policy(WeightMode::Uniform, true, 2)
            .object_weights(&[1.0], &[1], &[0.5])
            .unwrap_err();
        assert!(matches!(err, StackError::Configuration(_)));
    }

    #[test]
    fn test_exclusive_modes_rejected() {
        let err = WeightPolicy::new(&WeightingConfig {
            mode: WeightMode::InverseVariance,
            completeness: true,
            n_completeness: 1,
        });
        assert!(matches!(err, Err(StackError::Configuration(_))));
    }

    #[test]
    fn test_surface_lookup() {
        let grid = BilinearGrid::new(
            vec![0.0, 1.0],
            vec![0.0, 2.0],
            array![[0.2, 0.4], [0.6, 0.8]],
        )
        .unwrap();
        let surface = CompletenessSurface::new("civ", grid);
        assert_relative_eq!(surface.factor(0.5, 1.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(surface.factor(9.0, 9.0), 0.8, epsilon = 1e-12);
    }
}
