//! Collapse a [`StackTable`] into one stacked spectrum.
//!
//! Per pixel, the contributing set is every object with `count > 0`,
//! positive weight and finite flux and variance. Mean mode returns the
//! weighted mean with propagated variance. Median mode returns the weighted
//! median with the weighted median absolute deviation as the error proxy.
//! That MAD is deliberately left unscaled and is not a Gaussian σ.

use serde::{Deserialize, Serialize};
use stack_math::{median, quantile_sorted, weighted_median, weighted_percentile, SummaryStats};

use crate::config::{AggregateMode, WeightMode};
use crate::error::{length_mismatch, Result, StackError};
use crate::table::StackTable;

/// How a pixel's value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelQuality {
    /// No object contributed; flux, error and weight are zero
    Empty,
    /// Exactly one contributor, copied through
    Single,
    /// At least two contributors, all with the same flux; value copied.
    /// Median mode also reports zero error, mean mode keeps the propagated one.
    Degenerate,
    Normal,
}

/// Scalar provenance of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub n_objects: usize,
    pub covariate: SummaryStats,
    pub redshift: SummaryStats,
    pub weighting: WeightMode,
    pub completeness: bool,
    pub mode: AggregateMode,
    pub log_wave0: f64,
    pub log_pixscale: Option<f64>,
    pub percentile: (f64, f64),
}

/// The stacked spectrum, one entry per grid pixel in every plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackResult {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub ncontrib: Vec<u32>,
    /// 1σ propagated error (mean) or weighted MAD (median)
    pub error: Vec<f64>,
    /// Σw (mean) or median w (median)
    pub weight: Vec<f64>,
    pub continuum: Vec<f64>,
    pub percentile_low: Vec<f64>,
    pub percentile_high: Vec<f64>,
    pub quality: Vec<PixelQuality>,
    /// Grid index of the first pixel kept after trimming
    pub pixel_offset: usize,
    pub metadata: StackMetadata,
}

struct PixelValue {
    flux: f64,
    error: f64,
    weight: f64,
    low: f64,
    high: f64,
    ncontrib: u32,
    quality: PixelQuality,
}

impl PixelValue {
    fn empty() -> Self {
        Self {
            flux: 0.0,
            error: 0.0,
            weight: 0.0,
            low: 0.0,
            high: 0.0,
            ncontrib: 0,
            quality: PixelQuality::Empty,
        }
    }
}

fn collapse_pixel(
    flux: &[f64],
    variance: &[f64],
    weight: &[f64],
    mode: AggregateMode,
    percentile: (f64, f64),
) -> Result<PixelValue> {
    let n = flux.len();
    match n {
        0 => return Ok(PixelValue::empty()),
        1 => {
            return Ok(PixelValue {
                flux: flux[0],
                error: variance[0].sqrt(),
                weight: weight[0],
                low: flux[0],
                high: flux[0],
                ncontrib: 1,
                quality: PixelQuality::Single,
            })
        }
        _ => {}
    }

    let sum_w: f64 = weight.iter().sum();
    let identical = flux.iter().all(|&f| f == flux[0]);

    // fewer than two distinct samples: the weighted median has nothing to
    // interpolate, copy the value instead
    if identical && mode == AggregateMode::Median {
        return Ok(PixelValue {
            flux: flux[0],
            error: 0.0,
            weight: median(weight)?,
            low: flux[0],
            high: flux[0],
            ncontrib: n as u32,
            quality: PixelQuality::Degenerate,
        });
    }

    let value = match mode {
        AggregateMode::Mean => {
            let mean = flux.iter().zip(weight).map(|(f, w)| f * w).sum::<f64>() / sum_w;
            let var =
                variance.iter().zip(weight).map(|(v, w)| w * w * v).sum::<f64>() / (sum_w * sum_w);

            let mut sorted = flux.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            PixelValue {
                flux: if identical { flux[0] } else { mean },
                error: var.sqrt(),
                weight: sum_w,
                low: quantile_sorted(&sorted, percentile.0),
                high: quantile_sorted(&sorted, percentile.1),
                ncontrib: n as u32,
                quality: if identical {
                    PixelQuality::Degenerate
                } else {
                    PixelQuality::Normal
                },
            }
        }
        AggregateMode::Median => {
            let centre = weighted_median(flux, weight)?;
            let deviations: Vec<f64> = flux.iter().map(|f| (f - centre).abs()).collect();
            PixelValue {
                flux: centre,
                error: weighted_median(&deviations, weight)?,
                weight: median(weight)?,
                low: weighted_percentile(flux, weight, percentile.0)?,
                high: weighted_percentile(flux, weight, percentile.1)?,
                ncontrib: n as u32,
                quality: PixelQuality::Normal,
            }
        }
    };
    Ok(value)
}

/// Collapse `table` without touching it.
pub fn collapse(
    table: &StackTable,
    mode: AggregateMode,
    percentile: (f64, f64),
) -> Result<StackResult> {
    if !(0.0..=1.0).contains(&percentile.0) || !(0.0..=1.0).contains(&percentile.1) {
        return Err(StackError::Configuration(format!(
            "percentile pair ({}, {}) outside [0, 1]",
            percentile.0, percentile.1
        )));
    }

    let n_pix = table.n_pixels();
    let mut result = StackResult {
        wave: table.grid().wave().to_vec(),
        flux: Vec::with_capacity(n_pix),
        ncontrib: Vec::with_capacity(n_pix),
        error: Vec::with_capacity(n_pix),
        weight: Vec::with_capacity(n_pix),
        continuum: vec![0.0; n_pix],
        percentile_low: Vec::with_capacity(n_pix),
        percentile_high: Vec::with_capacity(n_pix),
        quality: Vec::with_capacity(n_pix),
        pixel_offset: 0,
        metadata: StackMetadata {
            n_objects: table.n_objects(),
            covariate: SummaryStats::from_values(&table.covariates()),
            redshift: SummaryStats::from_values(&table.redshifts()),
            weighting: table.weighting(),
            completeness: table.uses_completeness(),
            mode,
            log_wave0: table.grid().log_wave0(),
            log_pixscale: table.grid().log_pixscale(),
            percentile,
        },
    };

    let (flux, variance, weight, count) =
        (table.flux(), table.variance(), table.weight(), table.count());
    let mut f = Vec::with_capacity(table.n_objects());
    let mut v = Vec::with_capacity(table.n_objects());
    let mut w = Vec::with_capacity(table.n_objects());

    for p in 0..n_pix {
        f.clear();
        v.clear();
        w.clear();
        for i in 0..table.n_objects() {
            let (fi, vi, wi) = (flux[[i, p]], variance[[i, p]], weight[[i, p]]);
            let usable =
                wi > 0.0 && wi.is_finite() && fi.is_finite() && vi.is_finite() && vi >= 0.0;
            if count[[i, p]] > 0 && usable {
                f.push(fi);
                v.push(vi);
                w.push(wi);
            }
        }

        let pixel = collapse_pixel(&f, &v, &w, mode, percentile)?;
        result.flux.push(pixel.flux);
        result.error.push(pixel.error);
        result.weight.push(pixel.weight);
        result.percentile_low.push(pixel.low);
        result.percentile_high.push(pixel.high);
        result.ncontrib.push(pixel.ncontrib);
        result.quality.push(pixel.quality);
    }

    let degenerate = result.quality.iter().filter(|q| **q == PixelQuality::Degenerate).count();
    if degenerate > 0 {
        log::debug!("{degenerate} pixels had identical contributing fluxes");
    }

    Ok(result)
}

/// Collapse `table` and record the mode and percentile pair used on it.
///
/// `percentile = None` keeps the pair already stored on the table.
pub fn stack(
    table: &mut StackTable,
    mode: AggregateMode,
    percentile: Option<(f64, f64)>,
) -> Result<StackResult> {
    let percentile = percentile.unwrap_or_else(|| table.percentile());
    let result = collapse(table, mode, percentile)?;
    table.set_provenance(mode, percentile);
    Ok(result)
}

impl StackResult {
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    /// Drop leading and trailing pixels without contributors.
    pub fn trim_empty(&mut self) {
        let first = self.ncontrib.iter().position(|&n| n > 0);
        let last = self.ncontrib.iter().rposition(|&n| n > 0);
        let (start, end) = match (first, last) {
            (Some(s), Some(e)) => (s, e + 1),
            _ => (0, 0),
        };

        fn keep<T: Clone>(v: &mut Vec<T>, start: usize, end: usize) {
            *v = v[start..end].to_vec();
        }
        keep(&mut self.wave, start, end);
        keep(&mut self.flux, start, end);
        keep(&mut self.ncontrib, start, end);
        keep(&mut self.error, start, end);
        keep(&mut self.weight, start, end);
        keep(&mut self.continuum, start, end);
        keep(&mut self.percentile_low, start, end);
        keep(&mut self.percentile_high, start, end);
        keep(&mut self.quality, start, end);
        self.pixel_offset += start;
    }

    /// Copy a full-grid continuum into the (possibly trimmed) stack.
    pub fn set_continuum(&mut self, continuum: &[f64]) -> Result<()> {
        let end = self.pixel_offset + self.len();
        if continuum.len() < end {
            return Err(length_mismatch("continuum", end, continuum.len()));
        }
        self.continuum = continuum[self.pixel_offset..end].to_vec();
        Ok(())
    }
}
