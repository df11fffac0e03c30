//! Continuum fitting, linear splicing and line measurement on a stacked
//! spectrum.
//!
//! [`ContinuumFitter::fit_continuum`] builds a fresh [`ContinuumRecord`]
//! every time it is called. [`ContinuumFitter::splice_linear`] never edits a
//! record in place: it returns a copy holding an additional
//! [`ContinuumFlavor::Spliced`] plane and re-measured lines.

mod fit;
mod search;
mod splice;

use serde::{Deserialize, Serialize};

use crate::config::{ContinuumConfig, SpliceWindow};
use crate::error::{length_mismatch, Result};
use crate::lines::LineCatalog;

pub use search::measure_equivalent_width;

/// Which variant of the continuum a plane holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuumFlavor {
    /// Masked, sigma-clipped cubic B-spline
    Spline,
    /// Spline with linear segments spliced across configured windows
    Spliced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuumPlane {
    pub flavor: ContinuumFlavor,
    pub values: Vec<f64>,
    pub sigma: Vec<f64>,
}

/// A detected absorption feature and its equivalent width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMeasurement {
    /// Catalog name when the centroid matched a known line
    pub name: Option<String>,
    pub rest_wave: Option<f64>,
    /// Decrement-weighted centroid, or the catalog wavelength for split pairs
    pub centroid: f64,
    /// Rest equivalent width in Ångström
    pub ew: f64,
    pub ew_sigma: f64,
    /// Peak absorption significance inside the detection
    pub significance: f64,
    /// First and last pixel of the detection (inclusive)
    pub pixel_range: (usize, usize),
    /// Entry created by re-splitting a blended catalog pair
    pub forced_split: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpliceStatus {
    Applied {
        blue_seam: usize,
        red_seam: usize,
        blue_residual: f64,
        red_residual: f64,
        slope: f64,
        intercept: f64,
    },
    /// Window pair left alone; the continuum there is unmodified
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceOutcome {
    pub window: SpliceWindow,
    pub status: SpliceStatus,
}

/// Continuum variants, fit mask and detected lines for one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuumRecord {
    pub wave: Vec<f64>,
    planes: Vec<ContinuumPlane>,
    active: ContinuumFlavor,
    /// Excluded before fitting: line windows and unusable pixels
    pub masked: Vec<bool>,
    /// Sigma-clipped during the fit
    pub rejected: Vec<bool>,
    pub clip_iterations: usize,
    pub lines: Vec<LineMeasurement>,
    pub splices: Vec<SpliceOutcome>,
}

impl ContinuumRecord {
    /// Record around an externally supplied spline continuum, with no mask
    /// and no lines, e.g. as input to [`ContinuumFitter::splice_linear`].
    pub fn from_continuum(wave: Vec<f64>, values: Vec<f64>, sigma: Vec<f64>) -> Result<Self> {
        if values.len() != wave.len() {
            return Err(length_mismatch("continuum values", wave.len(), values.len()));
        }
        if sigma.len() != wave.len() {
            return Err(length_mismatch("continuum sigma", wave.len(), sigma.len()));
        }
        let n = wave.len();
        Ok(Self {
            wave,
            planes: vec![ContinuumPlane {
                flavor: ContinuumFlavor::Spline,
                values,
                sigma,
            }],
            active: ContinuumFlavor::Spline,
            masked: vec![false; n],
            rejected: vec![false; n],
            clip_iterations: 0,
            lines: Vec::new(),
            splices: Vec::new(),
        })
    }

    pub fn active_flavor(&self) -> ContinuumFlavor {
        self.active
    }

    pub fn plane(&self, flavor: ContinuumFlavor) -> Option<&ContinuumPlane> {
        self.planes.iter().find(|p| p.flavor == flavor)
    }

    pub fn planes(&self) -> &[ContinuumPlane] {
        &self.planes
    }

    fn active_plane(&self) -> &ContinuumPlane {
        // a record is never built without its active plane
        self.plane(self.active).unwrap_or(&self.planes[0])
    }

    /// Active continuum values
    pub fn continuum(&self) -> &[f64] {
        &self.active_plane().values
    }

    /// Active continuum uncertainty
    pub fn sigma(&self) -> &[f64] {
        &self.active_plane().sigma
    }

    /// Insert or replace a plane and make it active.
    fn set_active_plane(&mut self, plane: ContinuumPlane) {
        self.active = plane.flavor;
        match self.planes.iter_mut().find(|p| p.flavor == plane.flavor) {
            Some(existing) => *existing = plane,
            None => self.planes.push(plane),
        }
    }

    /// Measured line matching a catalog name
    pub fn line(&self, name: &str) -> Option<&LineMeasurement> {
        self.lines.iter().find(|l| l.name.as_deref() == Some(name))
    }
}

/// Fits continua and measures lines with one configuration and catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumFitter {
    config: ContinuumConfig,
    catalog: LineCatalog,
}

fn check_lengths(wave: &[f64], flux: &[f64], error: &[f64]) -> Result<()> {
    if flux.len() != wave.len() {
        return Err(length_mismatch("continuum flux", wave.len(), flux.len()));
    }
    if error.len() != wave.len() {
        return Err(length_mismatch("continuum error", wave.len(), error.len()));
    }
    Ok(())
}

impl ContinuumFitter {
    /// Fails with a configuration error on settings the fit cannot use.
    pub fn new(config: ContinuumConfig, catalog: LineCatalog) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, catalog })
    }

    pub fn config(&self) -> &ContinuumConfig {
        &self.config
    }

    pub fn catalog(&self) -> &LineCatalog {
        &self.catalog
    }

    /// Fit a line-masked, sigma-clipped spline continuum and measure lines.
    pub fn fit_continuum(
        &self,
        wave: &[f64],
        flux: &[f64],
        error: &[f64],
    ) -> Result<ContinuumRecord> {
        check_lengths(wave, flux, error)?;

        let masked: Vec<bool> = wave
            .iter()
            .zip(flux)
            .zip(error)
            .map(|((&w, &f), &e)| {
                !f.is_finite() || !(e > 0.0 && e.is_finite()) || self.catalog.masks(w)
            })
            .collect();

        let clipped = fit::fit_clipped(wave, flux, error, &masked, &self.config)?;
        let values: Vec<f64> = wave.iter().map(|&w| clipped.spline.evaluate(w)).collect();
        let sigma: Vec<f64> = wave.iter().map(|&w| clipped.spline.sigma(w)).collect();

        let lines =
            search::find_lines(wave, flux, error, &values, &sigma, &self.catalog, &self.config);
        log::debug!(
            "continuum fit: {} rejected after {} iterations, {} lines",
            clipped.rejected.iter().filter(|&&r| r).count(),
            clipped.iterations,
            lines.len()
        );

        Ok(ContinuumRecord {
            wave: wave.to_vec(),
            planes: vec![ContinuumPlane {
                flavor: ContinuumFlavor::Spline,
                values,
                sigma,
            }],
            active: ContinuumFlavor::Spline,
            masked,
            rejected: clipped.rejected,
            clip_iterations: clipped.iterations,
            lines,
            splices: Vec::new(),
        })
    }

    /// Replace the continuum between seams in each window pair with a
    /// weighted straight-line fit, then re-measure lines.
    pub fn splice_linear(
        &self,
        wave: &[f64],
        flux: &[f64],
        error: &[f64],
        record: &ContinuumRecord,
        windows: &[SpliceWindow],
        tolerance: f64,
    ) -> Result<ContinuumRecord> {
        check_lengths(wave, flux, error)?;
        if record.continuum().len() != wave.len() {
            return Err(length_mismatch(
                "spliced continuum",
                wave.len(),
                record.continuum().len(),
            ));
        }

        let (plane, outcomes) =
            splice::splice_windows(wave, flux, error, record, windows, tolerance)?;
        let lines = search::find_lines(
            wave,
            flux,
            error,
            &plane.values,
            &plane.sigma,
            &self.catalog,
            &self.config,
        );

        let mut spliced = record.clone();
        spliced.set_active_plane(plane);
        spliced.lines = lines;
        spliced.splices = outcomes;
        Ok(spliced)
    }
}
