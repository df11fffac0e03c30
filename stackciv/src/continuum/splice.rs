use stack_math::LinearFit;

use crate::config::SpliceWindow;
use crate::error::{Result, StackError};

use super::{ContinuumFlavor, ContinuumPlane, ContinuumRecord, SpliceOutcome, SpliceStatus};

fn usable(flux: f64, error: f64) -> bool {
    flux.is_finite() && error > 0.0 && error.is_finite()
}

fn inside(w: f64, range: (f64, f64)) -> bool {
    w >= range.0 && w <= range.1
}

/// Pixel in `pixels` where the line comes closest to the continuum.
fn seam(pixels: &[usize], wave: &[f64], continuum: &[f64], fit: &LinearFit) -> (usize, f64) {
    pixels
        .iter()
        .map(|&i| (i, (fit.evaluate(wave[i]) - continuum[i]).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((pixels[0], f64::INFINITY))
}

fn skipped(window: SpliceWindow, reason: String) -> SpliceOutcome {
    log::warn!("splice {window:?} skipped: {reason}");
    SpliceOutcome {
        window,
        status: SpliceStatus::Skipped { reason },
    }
}

/// Apply every window pair in order to a copy of the active continuum.
pub(super) fn splice_windows(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    record: &ContinuumRecord,
    windows: &[SpliceWindow],
    tolerance: f64,
) -> Result<(ContinuumPlane, Vec<SpliceOutcome>)> {
    if let Some(window) = windows.iter().find(|w| !w.is_ascending()) {
        return Err(StackError::Configuration(format!(
            "splice windows not in ascending wavelength order: {window:?}"
        )));
    }

    let mut values = record.continuum().to_vec();
    let mut sigma = record.sigma().to_vec();
    let mut outcomes = Vec::with_capacity(windows.len());
    let (lo, hi) = match (wave.first(), wave.last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => return Err(StackError::Coverage("cannot splice an empty spectrum".into())),
    };

    for &window in windows {
        if window.blue.0 < lo || window.red.1 > hi {
            let err = StackError::Coverage(format!(
                "windows [{}, {}] outside spectrum coverage [{lo}, {hi}]",
                window.blue.0, window.red.1
            ));
            outcomes.push(skipped(window, err.to_string()));
            continue;
        }

        let fit_pixels: Vec<usize> = (0..wave.len())
            .filter(|&i| inside(wave[i], window.blue) || inside(wave[i], window.red))
            .filter(|&i| usable(flux[i], error[i]))
            .collect();
        let (blue, red): (Vec<usize>, Vec<usize>) = (
            fit_pixels.iter().copied().filter(|&i| wave[i] <= window.blue.1).collect(),
            fit_pixels.iter().copied().filter(|&i| wave[i] >= window.red.0).collect(),
        );
        if blue.is_empty() || red.is_empty() {
            outcomes.push(skipped(window, "window contains no usable pixels".into()));
            continue;
        }
        if blue.len() + red.len() != fit_pixels.len() {
            return Err(StackError::NumericalInconsistency(format!(
                "splice window {window:?} holds {} pixels, split into {} blue + {} red",
                fit_pixels.len(),
                blue.len(),
                red.len()
            )));
        }

        let x: Vec<f64> = fit_pixels.iter().map(|&i| wave[i]).collect();
        let y: Vec<f64> = fit_pixels.iter().map(|&i| flux[i]).collect();
        let s: Vec<f64> = fit_pixels.iter().map(|&i| error[i]).collect();
        let fit = LinearFit::fit(&x, &y, &s)?;

        let (blue_seam, blue_residual) = seam(&blue, wave, &values, &fit);
        let (red_seam, red_residual) = seam(&red, wave, &values, &fit);
        if blue_residual > tolerance || red_residual > tolerance {
            return Err(StackError::NumericalInconsistency(format!(
                "splice seam residuals {blue_residual:.4} / {red_residual:.4} \
                 exceed tolerance {tolerance}"
            )));
        }

        for i in blue_seam..=red_seam {
            values[i] = fit.evaluate(wave[i]);
            sigma[i] = fit.sigma(wave[i]);
        }

        outcomes.push(SpliceOutcome {
            window,
            status: SpliceStatus::Applied {
                blue_seam,
                red_seam,
                blue_residual,
                red_residual,
                slope: fit.slope,
                intercept: fit.evaluate(0.0),
            },
        });
    }

    Ok((
        ContinuumPlane {
            flavor: ContinuumFlavor::Spliced,
            values,
            sigma,
        },
        outcomes,
    ))
}
