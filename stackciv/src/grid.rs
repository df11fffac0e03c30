//! Global rest-frame wavelength grid and flux-conserving rebinning.
//!
//! Every object is resampled onto the same strictly increasing grid so that
//! pixel `i` means the same wavelength in every row of the
//! [`StackTable`](crate::table::StackTable). Output pixels receive the
//! overlap-weighted mean of the input pixels they cover:
//!
//! flux_o = Σ fⱼ ovⱼ / Σ ovⱼ,  var_o = Σ varⱼ ovⱼ² / (Σ ovⱼ)²
//!
//! where ovⱼ is the wavelength overlap between input pixel j and output pixel o.

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::error::{length_mismatch, Result, StackError};

/// Ordered destination wavelengths plus their wavelength solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthGrid {
    wave: Vec<f64>,
    log_wave0: f64,
    /// `None` when built from an explicit, not log-linear, array
    log_pixscale: Option<f64>,
}

/// One object's flux and variance on the destination grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RebinnedSpectrum {
    pub flux: Vec<f64>,
    pub variance: Vec<f64>,
    /// 1 where at least one valid input pixel overlapped, else 0
    pub count: Vec<u32>,
}

impl RebinnedSpectrum {
    pub fn covered_pixels(&self) -> usize {
        self.count.iter().filter(|&&c| c > 0).count()
    }
}

/// Pixel boundaries: midpoints between centres, mirrored at both ends.
pub fn pixel_edges(centres: &[f64]) -> Vec<f64> {
    let n = centres.len();
    let mut edges = Vec::with_capacity(n + 1);
    if n == 0 {
        return edges;
    }
    if n == 1 {
        // no neighbour to mirror against; zero-width pixel
        edges.push(centres[0]);
        edges.push(centres[0]);
        return edges;
    }

    edges.push(centres[0] - 0.5 * (centres[1] - centres[0]));
    for w in centres.windows(2) {
        edges.push(0.5 * (w[0] + w[1]));
    }
    edges.push(centres[n - 1] + 0.5 * (centres[n - 1] - centres[n - 2]));
    edges
}

impl WavelengthGrid {
    /// Log-linear grid from a configuration block.
    pub fn from_config(config: &GridConfig) -> Result<Self> {
        Self::log_linear(config.wave_min, config.wave_max, config.log_pixscale)
    }

    /// `10^(log10(wave_min) + i * log_pixscale)` for every i that stays at or
    /// below `wave_max`.
    pub fn log_linear(wave_min: f64, wave_max: f64, log_pixscale: f64) -> Result<Self> {
        if !(wave_min > 0.0 && wave_max >= wave_min && wave_max.is_finite()) {
            return Err(StackError::Configuration(format!(
                "invalid grid bounds [{wave_min}, {wave_max}]"
            )));
        }
        if !(log_pixscale > 0.0 && log_pixscale.is_finite()) {
            return Err(StackError::Configuration(format!(
                "log pixel scale must be positive, got {log_pixscale}"
            )));
        }

        let log_wave0 = wave_min.log10();
        // small slack so wave_max itself survives rounding
        let n_pix = ((wave_max.log10() - log_wave0) / log_pixscale + 1e-9).floor() as usize + 1;
        let wave = (0..n_pix)
            .map(|i| 10f64.powf(log_wave0 + i as f64 * log_pixscale))
            .collect();

        Ok(Self {
            wave,
            log_wave0,
            log_pixscale: Some(log_pixscale),
        })
    }

    /// Grid from an explicit wavelength array, which must be strictly increasing.
    pub fn from_wavelengths(wave: Vec<f64>) -> Result<Self> {
        if wave.is_empty() {
            return Err(StackError::Configuration("wavelength grid is empty".into()));
        }
        let positive = wave.iter().all(|w| w.is_finite() && *w > 0.0);
        if !positive || wave.windows(2).any(|w| w[1] <= w[0]) {
            return Err(StackError::Configuration(
                "wavelength grid must be positive and strictly increasing".into(),
            ));
        }

        let log_wave0 = wave[0].log10();
        Ok(Self {
            wave,
            log_wave0,
            log_pixscale: None,
        })
    }

    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    pub fn log_wave0(&self) -> f64 {
        self.log_wave0
    }

    pub fn log_pixscale(&self) -> Option<f64> {
        self.log_pixscale
    }

    /// Width of each pixel in Ångström.
    pub fn pixel_widths(&self) -> Vec<f64> {
        pixel_edges(&self.wave).windows(2).map(|e| e[1] - e[0]).collect()
    }

    /// Index of the pixel whose centre is closest to `wave`.
    pub fn nearest_pixel(&self, wave: f64) -> usize {
        let right = self.wave.partition_point(|&w| w < wave);
        if right == 0 {
            0
        } else if right >= self.wave.len() {
            self.wave.len() - 1
        } else if wave - self.wave[right - 1] <= self.wave[right] - wave {
            right - 1
        } else {
            right
        }
    }

    /// Flux-conserving rebin of one rest-frame spectrum onto this grid.
    ///
    /// Input pixels with non-finite flux or negative/non-finite variance are
    /// ignored. No overlap at all is not an error: every output pixel comes
    /// back empty (NaN flux, zero variance, zero count).
    pub fn rebin(&self, wave: &[f64], flux: &[f64], variance: &[f64]) -> Result<RebinnedSpectrum> {
        if flux.len() != wave.len() {
            return Err(length_mismatch("rebin flux", wave.len(), flux.len()));
        }
        if variance.len() != wave.len() {
            return Err(length_mismatch("rebin variance", wave.len(), variance.len()));
        }
        if wave.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(StackError::NumericalInconsistency(
                "input wavelengths must be strictly increasing".into(),
            ));
        }

        let n_out = self.wave.len();
        let mut out = RebinnedSpectrum {
            flux: vec![f64::NAN; n_out],
            variance: vec![0.0; n_out],
            count: vec![0; n_out],
        };
        if wave.len() < 2 {
            return Ok(out);
        }

        let in_edges = pixel_edges(wave);
        let out_edges = pixel_edges(&self.wave);

        let mut j_start = 0;
        for o in 0..n_out {
            let (lo, hi) = (out_edges[o], out_edges[o + 1]);

            // input pixels entirely blue of this output pixel never matter again
            while j_start < wave.len() && in_edges[j_start + 1] <= lo {
                j_start += 1;
            }

            let mut sum_ov = 0.0;
            let mut sum_f = 0.0;
            let mut sum_var = 0.0;
            let mut j = j_start;
            while j < wave.len() && in_edges[j] < hi {
                let ov = in_edges[j + 1].min(hi) - in_edges[j].max(lo);
                let valid = flux[j].is_finite() && variance[j].is_finite() && variance[j] >= 0.0;
                if ov > 0.0 && valid {
                    sum_ov += ov;
                    sum_f += flux[j] * ov;
                    sum_var += variance[j] * ov * ov;
                }
                j += 1;
            }

            if sum_ov > 0.0 {
                out.flux[o] = sum_f / sum_ov;
                out.variance[o] = sum_var / (sum_ov * sum_ov);
                out.count[o] = 1;
            }
        }

        Ok(out)
    }
}
