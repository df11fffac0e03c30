//! Monte-Carlo bootstrap errors for a stack.
//!
//! Each iteration draws a private copy of the table in which a fixed number of
//! rows is replaced by rows drawn with replacement, collapses it and keeps the
//! flux. The per-pixel error is the dispersion of those fluxes: MAD in median
//! mode (unscaled, like the aggregator's own error) and sample standard
//! deviation in mean mode.
//!
//! Iterations run in parallel. Each one seeds its own [`ChaCha8Rng`] from
//! `(seed, iteration)`, so results do not depend on the thread count.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stack_math::{mean_and_std, median_abs_deviation};

use crate::config::{AggregateMode, BootstrapConfig};
use crate::continuum::{ContinuumFitter, ContinuumRecord};
use crate::error::{Result, StackError};
use crate::progress::{Checkpoint, StackEvent};
use crate::stack::{collapse, StackResult};
use crate::table::StackTable;

/// Stacks excluding the covariate extremes, kept out of the dispersion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremalStacks {
    pub n_excluded: usize,
    /// Lowest-covariate objects removed
    pub without_low: StackResult,
    /// Highest-covariate objects removed
    pub without_high: StackResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapEstimate {
    pub error: Vec<f64>,
    pub iterations: usize,
    pub n_replaced: usize,
    pub extremal: Option<ExtremalStacks>,
    /// One continuum per iteration in nested mode, in iteration order
    pub continua: Vec<ContinuumRecord>,
}

/// Whether an iteration may fit a continuum to its own stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    Enabled,
    Disabled,
}

struct Iteration {
    flux: Vec<f64>,
    continuum: Option<ContinuumRecord>,
}

/// Independent seed for every iteration (SplitMix64 of seed and counter).
pub fn iteration_seed(base_seed: u64, iteration: u64) -> u64 {
    let mut z = base_seed.wrapping_add(iteration.wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Row indices for one resampled table: `n_replace` distinct positions are
/// overwritten with uniformly drawn rows, the rest keep their own row.
pub fn resample_indices<R: Rng>(n_objects: usize, n_replace: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n_objects).collect();
    if n_objects == 0 {
        return indices;
    }
    for position in sample(rng, n_objects, n_replace.min(n_objects)).into_iter() {
        indices[position] = rng.gen_range(0..n_objects);
    }
    indices
}

/// Per-pixel dispersion across iterations.
fn dispersion(fluxes: &[Vec<f64>], n_pixels: usize, mode: AggregateMode) -> Result<Vec<f64>> {
    let mut column = Vec::with_capacity(fluxes.len());
    (0..n_pixels)
        .map(|p| -> Result<f64> {
            column.clear();
            column.extend(fluxes.iter().map(|f| f[p]));
            let spread = match mode {
                AggregateMode::Median => median_abs_deviation(&column)?,
                AggregateMode::Mean => mean_and_std(&column)?.1,
            };
            Ok(spread)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BootstrapEstimator {
    config: BootstrapConfig,
    checkpoint: Checkpoint,
}

impl BootstrapEstimator {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            checkpoint: Checkpoint::default(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    fn n_replaced(&self, n_objects: usize) -> usize {
        ((self.config.exclusion_fraction * n_objects as f64).round() as usize).min(n_objects)
    }

    /// Bootstrap error of the stack of `table`, using the table's aggregation
    /// mode and percentile pair.
    ///
    /// In nested mode `fitter` must be given: every iteration's stack gets its
    /// own inner error estimate and a continuum fit with that error.
    pub fn estimate_error(
        &self,
        table: &StackTable,
        fitter: Option<&ContinuumFitter>,
    ) -> Result<BootstrapEstimate> {
        if self.config.iterations == 0 {
            return Err(StackError::Configuration("bootstrap needs at least one iteration".into()));
        }
        if table.n_objects() == 0 {
            return Err(StackError::Configuration("cannot bootstrap an empty table".into()));
        }
        if !(0.0..=1.0).contains(&self.config.exclusion_fraction) {
            return Err(StackError::Configuration(format!(
                "exclusion fraction {} outside [0, 1]",
                self.config.exclusion_fraction
            )));
        }
        let nesting = if self.config.nested {
            if fitter.is_none() {
                return Err(StackError::Configuration(
                    "nested bootstrap requires a continuum fitter".into(),
                ));
            }
            Nesting::Enabled
        } else {
            Nesting::Disabled
        };

        let n_replaced = self.n_replaced(table.n_objects());
        let extremal = if self.config.extremal {
            Some(self.extremal_stacks(table, n_replaced)?)
        } else {
            None
        };

        let iterations = self.run_iterations(
            table,
            self.config.iterations,
            self.config.seed,
            nesting,
            fitter,
            true,
        )?;

        let fluxes: Vec<Vec<f64>> = iterations.iter().map(|it| it.flux.clone()).collect();
        let error = dispersion(&fluxes, table.n_pixels(), table.mode())?;
        let continua = iterations.into_iter().filter_map(|it| it.continuum).collect();

        Ok(BootstrapEstimate {
            error,
            iterations: self.config.iterations,
            n_replaced,
            extremal,
            continua,
        })
    }

    /// Two deterministic stacks without the lowest / highest `n_excluded`
    /// objects by covariate.
    fn extremal_stacks(&self, table: &StackTable, n_excluded: usize) -> Result<ExtremalStacks> {
        let n = table.n_objects();
        if n_excluded >= n {
            return Err(StackError::Configuration(format!(
                "extremal mode would exclude {n_excluded} of {n} objects"
            )));
        }
        let order = table.covariate_order();
        let (mode, percentile) = (table.mode(), table.percentile());
        Ok(ExtremalStacks {
            n_excluded,
            without_low: collapse(&table.select(&order[n_excluded..]), mode, percentile)?,
            without_high: collapse(&table.select(&order[..n - n_excluded]), mode, percentile)?,
        })
    }

    fn run_iterations(
        &self,
        table: &StackTable,
        iterations: usize,
        seed: u64,
        nesting: Nesting,
        fitter: Option<&ContinuumFitter>,
        report: bool,
    ) -> Result<Vec<Iteration>> {
        let completed = AtomicUsize::new(0);
        (0..iterations)
            .into_par_iter()
            .map(|i| -> Result<Iteration> {
                self.checkpoint.check()?;
                let it_seed = iteration_seed(seed, i as u64);
                let iteration = self.resample_once(table, it_seed, nesting, fitter)?;
                if report {
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.checkpoint.emit(&StackEvent::BootstrapIteration {
                        completed: done,
                        total: iterations,
                    });
                }
                Ok(iteration)
            })
            .collect()
    }

    /// One resampled stack. With nesting enabled the stack is error-estimated
    /// by an inner run that has nesting disabled, then continuum-fitted.
    fn resample_once(
        &self,
        table: &StackTable,
        seed: u64,
        nesting: Nesting,
        fitter: Option<&ContinuumFitter>,
    ) -> Result<Iteration> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n_objects = table.n_objects();
        let indices = resample_indices(n_objects, self.n_replaced(n_objects), &mut rng);
        let copy = table.select(&indices);
        let result = collapse(&copy, copy.mode(), copy.percentile())?;

        let continuum = match (nesting, fitter) {
            (Nesting::Enabled, Some(fitter)) => {
                let inner = self.run_iterations(
                    &copy,
                    self.config.inner_iterations,
                    iteration_seed(seed, u64::MAX),
                    Nesting::Disabled,
                    None,
                    false,
                )?;
                let fluxes: Vec<Vec<f64>> = inner.into_iter().map(|it| it.flux).collect();
                let error = dispersion(&fluxes, copy.n_pixels(), copy.mode())?;
                Some(fitter.fit_continuum(&result.wave, &result.flux, &error)?)
            }
            _ => None,
        };

        Ok(Iteration {
            flux: result.flux,
            continuum,
        })
    }
}
