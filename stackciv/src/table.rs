//! The per-object table every stack is collapsed from.
//!
//! Rows are objects, columns are pixels of the shared [`WavelengthGrid`]. All
//! four planes always have exactly `grid.len()` columns. Resampling estimators
//! never touch the base table; they work on copies made with
//! [`StackTable::select`].

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{AggregateMode, WeightMode};
use crate::error::{length_mismatch, ObjectStatus, Result, StackError};
use crate::grid::WavelengthGrid;
use crate::weights::WeightPolicy;

/// One observed spectrum as handed over by the I/O layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpectrum {
    pub id: String,
    /// Observed-frame wavelength in Ångström, strictly increasing
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    /// 1σ flux error; zero or negative marks a bad pixel
    pub sigma: Vec<f64>,
    pub redshift: f64,
    /// Scalar used for ordering and selection (e.g. rest equivalent width)
    pub covariate: f64,
    #[serde(default)]
    pub completeness: Vec<f64>,
}

impl ObjectSpectrum {
    pub fn new(
        id: impl Into<String>,
        wave: Vec<f64>,
        flux: Vec<f64>,
        sigma: Vec<f64>,
        redshift: f64,
        covariate: f64,
    ) -> Self {
        Self {
            id: id.into(),
            wave,
            flux,
            sigma,
            redshift,
            covariate,
            completeness: Vec::new(),
        }
    }

    pub fn with_completeness(mut self, completeness: Vec<f64>) -> Self {
        self.completeness = completeness;
        self
    }

    /// Rest-frame wavelengths and variances. Bad pixels get NaN variance so
    /// the rebinning skips them.
    pub fn rest_frame(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        if self.flux.len() != self.wave.len() {
            let what = format!("{} flux", self.id);
            return Err(length_mismatch(&what, self.wave.len(), self.flux.len()));
        }
        if self.sigma.len() != self.wave.len() {
            let what = format!("{} sigma", self.id);
            return Err(length_mismatch(&what, self.wave.len(), self.sigma.len()));
        }
        if !(self.redshift > -1.0 && self.redshift.is_finite()) {
            return Err(StackError::NumericalInconsistency(format!(
                "{}: redshift {} is not physical",
                self.id, self.redshift
            )));
        }

        let scale = 1.0 + self.redshift;
        let wave = self.wave.iter().map(|w| w / scale).collect();
        let variance = self
            .sigma
            .iter()
            .map(|&s| if s > 0.0 && s.is_finite() { s * s } else { f64::NAN })
            .collect();
        Ok((wave, variance))
    }
}

/// Scalar bookkeeping for one row of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: String,
    pub covariate: f64,
    pub redshift: f64,
    pub completeness: Vec<f64>,
    pub status: ObjectStatus,
}

/// A single object resampled onto the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub meta: ObjectMeta,
    pub flux: Vec<f64>,
    pub variance: Vec<f64>,
    pub weight: Vec<f64>,
    pub count: Vec<u32>,
}

impl ObjectRecord {
    /// Shift to rest frame, rebin onto `grid` and weight with `policy`.
    pub fn from_spectrum(
        grid: &WavelengthGrid,
        spectrum: &ObjectSpectrum,
        policy: &WeightPolicy,
    ) -> Result<Self> {
        let (rest_wave, rest_var) = spectrum.rest_frame()?;
        let rebinned = grid.rebin(&rest_wave, &spectrum.flux, &rest_var)?;

        let mut status = ObjectStatus::Ok;
        if rebinned.covered_pixels() == 0 {
            log::warn!(
                "{}: no overlap with the destination grid, every pixel flagged empty",
                spectrum.id
            );
            status = ObjectStatus::NoCoverage;
        }

        let (weight, warning) =
            policy.object_weights(&rebinned.variance, &rebinned.count, &spectrum.completeness)?;
        if let Some(warning) = warning {
            log::warn!("{}: {warning:?}, weight forced to 0", spectrum.id);
            if status == ObjectStatus::Ok {
                status = ObjectStatus::Warning(warning);
            }
        }

        Ok(Self {
            meta: ObjectMeta {
                id: spectrum.id.clone(),
                covariate: spectrum.covariate,
                redshift: spectrum.redshift,
                completeness: spectrum.completeness.clone(),
                status,
            },
            flux: rebinned.flux,
            variance: rebinned.variance,
            weight,
            count: rebinned.count,
        })
    }
}

/// Objects × pixels planes plus the global grid and stacking flags.
#[derive(Debug, Clone, PartialEq)]
pub struct StackTable {
    grid: WavelengthGrid,
    objects: Vec<ObjectMeta>,
    flux: Array2<f64>,
    variance: Array2<f64>,
    weight: Array2<f64>,
    count: Array2<u32>,
    mode: AggregateMode,
    percentile: (f64, f64),
    weighting: WeightMode,
    completeness: bool,
}

impl StackTable {
    /// An empty table on `grid`.
    pub fn new(
        grid: WavelengthGrid,
        policy: &WeightPolicy,
        mode: AggregateMode,
        percentile: (f64, f64),
    ) -> Self {
        let n_pix = grid.len();
        Self {
            grid,
            objects: Vec::new(),
            flux: Array2::zeros((0, n_pix)),
            variance: Array2::zeros((0, n_pix)),
            weight: Array2::zeros((0, n_pix)),
            count: Array2::zeros((0, n_pix)),
            mode,
            percentile,
            weighting: policy.mode(),
            completeness: policy.uses_completeness(),
        }
    }

    /// Rebin and weight every spectrum (in parallel) and collect the rows in
    /// input order.
    pub fn build(
        grid: WavelengthGrid,
        spectra: &[ObjectSpectrum],
        policy: &WeightPolicy,
        mode: AggregateMode,
        percentile: (f64, f64),
    ) -> Result<Self> {
        let records: Vec<ObjectRecord> = spectra
            .par_iter()
            .map(|spectrum| ObjectRecord::from_spectrum(&grid, spectrum, policy))
            .collect::<Result<_>>()?;

        let mut table = Self::new(grid, policy, mode, percentile);
        for record in records {
            table.push(record)?;
        }
        Ok(table)
    }

    /// Append one row. Every plane must match the grid length.
    pub fn push(&mut self, record: ObjectRecord) -> Result<()> {
        let n_pix = self.grid.len();
        for (name, len) in [
            ("flux", record.flux.len()),
            ("variance", record.variance.len()),
            ("weight", record.weight.len()),
            ("count", record.count.len()),
        ] {
            if len != n_pix {
                let what = format!("{} {name} plane", record.meta.id);
                return Err(length_mismatch(&what, n_pix, len));
            }
        }

        let shape_err = |e: ndarray::ShapeError| StackError::NumericalInconsistency(e.to_string());
        self.flux.push_row(ArrayView1::from(&record.flux)).map_err(shape_err)?;
        self.variance.push_row(ArrayView1::from(&record.variance)).map_err(shape_err)?;
        self.weight.push_row(ArrayView1::from(&record.weight)).map_err(shape_err)?;
        self.count.push_row(ArrayView1::from(&record.count)).map_err(shape_err)?;
        self.objects.push(record.meta);
        Ok(())
    }

    /// A private copy holding the given rows, in the given order. Indices may
    /// repeat (resampling with replacement).
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            grid: self.grid.clone(),
            objects: indices.iter().map(|&i| self.objects[i].clone()).collect(),
            flux: self.flux.select(Axis(0), indices),
            variance: self.variance.select(Axis(0), indices),
            weight: self.weight.select(Axis(0), indices),
            count: self.count.select(Axis(0), indices),
            mode: self.mode,
            percentile: self.percentile,
            weighting: self.weighting,
            completeness: self.completeness,
        }
    }

    pub fn grid(&self) -> &WavelengthGrid {
        &self.grid
    }

    pub fn n_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn n_pixels(&self) -> usize {
        self.grid.len()
    }

    pub fn objects(&self) -> &[ObjectMeta] {
        &self.objects
    }

    pub fn flux(&self) -> &Array2<f64> {
        &self.flux
    }

    pub fn variance(&self) -> &Array2<f64> {
        &self.variance
    }

    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }

    pub fn count(&self) -> &Array2<u32> {
        &self.count
    }

    /// Owned copy of row `i`.
    pub fn record(&self, i: usize) -> ObjectRecord {
        ObjectRecord {
            meta: self.objects[i].clone(),
            flux: self.flux.row(i).to_vec(),
            variance: self.variance.row(i).to_vec(),
            weight: self.weight.row(i).to_vec(),
            count: self.count.row(i).to_vec(),
        }
    }

    pub fn mode(&self) -> AggregateMode {
        self.mode
    }

    pub fn percentile(&self) -> (f64, f64) {
        self.percentile
    }

    pub fn weighting(&self) -> WeightMode {
        self.weighting
    }

    pub fn uses_completeness(&self) -> bool {
        self.completeness
    }

    pub(crate) fn set_provenance(&mut self, mode: AggregateMode, percentile: (f64, f64)) {
        self.mode = mode;
        self.percentile = percentile;
    }

    pub fn covariates(&self) -> Vec<f64> {
        self.objects.iter().map(|o| o.covariate).collect()
    }

    pub fn redshifts(&self) -> Vec<f64> {
        self.objects.iter().map(|o| o.redshift).collect()
    }

    /// Row indices sorted by ascending covariate; ties keep input order and
    /// NaN covariates sort last.
    pub fn covariate_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.objects.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (self.objects[a].covariate, self.objects[b].covariate);
            match (ca.is_nan(), cb.is_nan()) {
                (false, false) => ca.total_cmp(&cb),
                (a_nan, b_nan) => a_nan.cmp(&b_nan),
            }
        });
        order
    }

    /// Objects whose status is not [`ObjectStatus::Ok`].
    pub fn flagged_objects(&self) -> Vec<(usize, ObjectStatus)> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.status != ObjectStatus::Ok)
            .map(|(i, o)| (i, o.status))
            .collect()
    }
}
