//! Line search on the continuum-normalised spectrum and equivalent widths.

use crate::config::ContinuumConfig;
use crate::grid::pixel_edges;
use crate::lines::{LineCatalog, SpectralLine, SPEED_OF_LIGHT_KMS};

use super::LineMeasurement;

/// A contiguous run of significant absorption.
struct Detection<'a> {
    start: usize,
    end: usize,
    centroid: f64,
    significance: f64,
    line: Option<&'a SpectralLine>,
    forced_split: bool,
}

/// Absorption significance (c − f)/σ, NaN where it is undefined.
fn significance(flux: f64, error: f64, continuum: f64) -> f64 {
    if continuum > 0.0 && flux.is_finite() && error > 0.0 && error.is_finite() {
        (continuum - flux) / error
    } else {
        f64::NAN
    }
}

fn detect<'a>(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    continuum: &[f64],
    catalog: &'a LineCatalog,
    config: &ContinuumConfig,
) -> Vec<Detection<'a>> {
    let sig: Vec<f64> = (0..wave.len())
        .map(|i| significance(flux[i], error[i], continuum[i]))
        .collect();

    let mut detections = Vec::new();
    let mut i = 0;
    while i < wave.len() {
        if !(sig[i] >= config.search_snr) {
            i += 1;
            continue;
        }
        let start = i;
        while i < wave.len() && sig[i] >= config.search_snr {
            i += 1;
        }
        let end = i - 1;
        if end + 1 - start < config.min_line_pixels {
            continue;
        }

        let mut sum_d = 0.0;
        let mut sum_wd = 0.0;
        for p in start..=end {
            let d = (1.0 - flux[p] / continuum[p]).max(0.0);
            sum_d += d;
            sum_wd += d * wave[p];
        }
        let centroid = if sum_d > 0.0 {
            sum_wd / sum_d
        } else {
            0.5 * (wave[start] + wave[end])
        };
        let significance = sig[start..=end].iter().copied().fold(f64::MIN, f64::max);

        detections.push(Detection {
            start,
            end,
            centroid,
            significance,
            line: catalog.identify(centroid, config.match_velocity),
            forced_split: false,
        });
    }
    detections
}

/// Split detections that swallowed both members of a close catalog pair.
fn resplit_pairs<'a>(
    detections: Vec<Detection<'a>>,
    wave: &[f64],
    catalog: &'a LineCatalog,
    config: &ContinuumConfig,
) -> Vec<Detection<'a>> {
    let slack = config.match_velocity / SPEED_OF_LIGHT_KMS;
    let covers = |d: &Detection, rest: f64| {
        wave[d.start] * (1.0 - slack) <= rest && rest <= wave[d.end] * (1.0 + slack)
    };
    let names = |d: &Detection| d.line.map(|l| l.name.clone());

    let mut out = detections;
    for (blue, red) in catalog.close_pairs(config.pair_velocity) {
        let Some(idx) = out
            .iter()
            .position(|d| covers(d, blue.rest_wave) && covers(d, red.rest_wave))
        else {
            continue;
        };

        // the other member already has its own detection: nothing collapsed
        let separately_found = out.iter().enumerate().any(|(j, d)| {
            j != idx && matches!(names(d).as_deref(), Some(n) if n == blue.name || n == red.name)
        });
        if separately_found {
            continue;
        }

        let blended = out.remove(idx);
        log::debug!(
            "re-splitting {} / {} detected as one feature at {:.2}",
            blue.name,
            red.name,
            blended.centroid
        );
        for line in [blue, red] {
            out.push(Detection {
                start: blended.start,
                end: blended.end,
                centroid: line.rest_wave,
                significance: blended.significance,
                line: Some(line),
                forced_split: true,
            });
        }
    }
    out
}

/// Equivalent width of (1 − f/c) over `centroid ± half_velocity`, with its
/// 1σ error from flux and continuum uncertainties.
pub fn measure_equivalent_width(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    continuum: &[f64],
    continuum_sigma: &[f64],
    centroid: f64,
    half_velocity: f64,
) -> (f64, f64) {
    let half_width = centroid * half_velocity / SPEED_OF_LIGHT_KMS;
    let widths: Vec<f64> = pixel_edges(wave).windows(2).map(|e| e[1] - e[0]).collect();

    let mut ew = 0.0;
    let mut var = 0.0;
    for i in 0..wave.len() {
        if (wave[i] - centroid).abs() > half_width {
            continue;
        }
        let (f, s, c, sc) = (flux[i], error[i], continuum[i], continuum_sigma[i]);
        if !(c > 0.0 && f.is_finite() && s.is_finite() && sc.is_finite()) {
            continue;
        }
        let dl = widths[i];
        ew += (1.0 - f / c) * dl;
        var += ((s / c).powi(2) + (f * sc / (c * c)).powi(2)) * dl * dl;
    }
    (ew, var.sqrt())
}

pub(super) fn find_lines(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    continuum: &[f64],
    continuum_sigma: &[f64],
    catalog: &LineCatalog,
    config: &ContinuumConfig,
) -> Vec<LineMeasurement> {
    let detections = detect(wave, flux, error, continuum, catalog, config);
    let detections = resplit_pairs(detections, wave, catalog, config);

    let mut lines: Vec<LineMeasurement> = detections
        .iter()
        .map(|d| {
            let half_velocity = d.line.map_or(config.ew_velocity, |l| l.ew_velocity);
            let (ew, ew_sigma) = measure_equivalent_width(
                wave,
                flux,
                error,
                continuum,
                continuum_sigma,
                d.centroid,
                half_velocity,
            );
            LineMeasurement {
                name: d.line.map(|l| l.name.clone()),
                rest_wave: d.line.map(|l| l.rest_wave),
                centroid: d.centroid,
                ew,
                ew_sigma,
                significance: d.significance,
                pixel_range: (d.start, d.end),
                forced_split: d.forced_split,
            }
        })
        .collect();

    lines.sort_by(|a, b| a.centroid.total_cmp(&b.centroid));
    lines
}
