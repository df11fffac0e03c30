use stack_math::{uniform_breakpoints, BSplineFit, SplineError};

use crate::config::ContinuumConfig;
use crate::error::Result;

pub(super) struct ClippedFit {
    pub spline: BSplineFit,
    pub rejected: Vec<bool>,
    pub iterations: usize,
}

/// Spline fit with sticky asymmetric sigma clipping: a pixel that is rejected
/// once stays rejected in every later iteration.
pub(super) fn fit_clipped(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    masked: &[bool],
    config: &ContinuumConfig,
) -> Result<ClippedFit> {
    let mut rejected = vec![false; wave.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;
        let weights: Vec<f64> = error
            .iter()
            .enumerate()
            .map(|(i, &e)| if masked[i] || rejected[i] { 0.0 } else { 1.0 / (e * e) })
            .collect();

        let used: Vec<f64> = wave
            .iter()
            .zip(&weights)
            .filter(|&(_, &w)| w > 0.0)
            .map(|(&x, _)| x)
            .collect();
        let (lo, hi) = match (used.first(), used.last()) {
            (Some(&lo), Some(&hi)) if hi > lo => (lo, hi),
            _ => {
                return Err(SplineError::InsufficientData {
                    needed: 4,
                    got: used.len(),
                }
                .into())
            }
        };

        let breaks = uniform_breakpoints(lo, hi, config.breakpoint_spacing)?;
        let spline = BSplineFit::fit(wave, flux, &weights, &breaks)?;

        let mut newly_rejected = 0;
        for i in 0..wave.len() {
            if weights[i] == 0.0 {
                continue;
            }
            let residual = (flux[i] - spline.evaluate(wave[i])) / error[i];
            if residual < -config.clip_lower || residual > config.clip_upper {
                rejected[i] = true;
                newly_rejected += 1;
            }
        }

        if newly_rejected == 0 || iterations >= config.max_iterations.max(1) {
            return Ok(ClippedFit {
                spline,
                rejected,
                iterations,
            });
        }
    }
}
