//! End-to-end stacking run driven by a [`StackConfig`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapEstimate, BootstrapEstimator};
use crate::config::StackConfig;
use crate::continuum::{ContinuumFitter, ContinuumRecord};
use crate::error::{Result, StackError};
use crate::grid::WavelengthGrid;
use crate::jackknife::{
    jackknife_statistics, JackknifeEstimator, JackknifeOutcome, JackknifeStack, JackknifeStats,
};
use crate::lines::LineCatalog;
use crate::persist;
use crate::progress::{Checkpoint, StackEvent};
use crate::stack::{stack, StackResult};
use crate::table::{ObjectSpectrum, StackTable};
use crate::weights::{CompletenessSurface, WeightPolicy};

/// Everything produced by [`StackPipeline::run`].
#[derive(Debug)]
pub struct StackRun {
    pub table: StackTable,
    pub stack: StackResult,
    pub continuum: ContinuumRecord,
    pub bootstrap: Option<BootstrapEstimate>,
    pub jackknife: Option<(Vec<JackknifeOutcome>, JackknifeStats)>,
}

/// The serialisable part of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub config: StackConfig,
    pub stack: StackResult,
    pub continuum: ContinuumRecord,
    pub bootstrap: Option<BootstrapEstimate>,
    pub jackknife: Option<JackknifeStats>,
}

impl RunSummary {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        persist::save_json(self, path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        persist::load_json(path)
    }
}

impl StackRun {
    pub fn summary(&self, config: &StackConfig) -> RunSummary {
        RunSummary {
            config: config.clone(),
            stack: self.stack.clone(),
            continuum: self.continuum.clone(),
            bootstrap: self.bootstrap.clone(),
            jackknife: self.jackknife.as_ref().map(|(_, stats)| stats.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StackPipeline {
    config: StackConfig,
    catalog: LineCatalog,
    checkpoint: Checkpoint,
}

impl StackPipeline {
    pub fn new(config: StackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog: LineCatalog::default(),
            checkpoint: Checkpoint::default(),
        })
    }

    pub fn with_catalog(mut self, catalog: LineCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Evaluate every surface for every object. Objects keep their own
    /// factors when no surfaces are given.
    fn apply_surfaces(
        &self,
        spectra: &[ObjectSpectrum],
        surfaces: &[CompletenessSurface],
    ) -> Result<Vec<ObjectSpectrum>> {
        let weighting = &self.config.weighting;
        if surfaces.is_empty() {
            return Ok(spectra.to_vec());
        }
        if weighting.completeness && surfaces.len() != weighting.n_completeness {
            return Err(StackError::Configuration(format!(
                "{} completeness surfaces given, {} configured",
                surfaces.len(),
                weighting.n_completeness
            )));
        }
        Ok(spectra
            .iter()
            .map(|s| {
                let factors = surfaces.iter().map(|c| c.factor(s.redshift, s.covariate)).collect();
                s.clone().with_completeness(factors)
            })
            .collect())
    }

    pub fn run(
        &self,
        spectra: &[ObjectSpectrum],
        surfaces: &[CompletenessSurface],
    ) -> Result<StackRun> {
        let config = &self.config;
        if spectra.is_empty() {
            return Err(StackError::Configuration("no spectra to stack".into()));
        }

        let grid = WavelengthGrid::from_config(&config.grid)?;
        let policy = WeightPolicy::new(&config.weighting)?;
        let mode = config.aggregate.mode;
        let percentile = config.aggregate.percentile_pair();

        let spectra = self.apply_surfaces(spectra, surfaces)?;
        let mut table = StackTable::build(grid, &spectra, &policy, mode, percentile)?;
        self.checkpoint.emit(&StackEvent::TableBuilt {
            n_objects: table.n_objects(),
            n_pixels: table.n_pixels(),
        });
        for (i, status) in table.flagged_objects() {
            log::info!("object {} flagged: {status:?}", table.objects()[i].id);
        }

        let mut result = stack(&mut table, mode, Some(percentile))?;
        log::info!(
            "stacked {} objects on {} pixels ({mode:?})",
            table.n_objects(),
            table.n_pixels()
        );

        let fitter = ContinuumFitter::new(config.continuum.clone(), self.catalog.clone())?;
        let bootstrap_estimator = if config.bootstrap.iterations > 0 {
            Some(
                BootstrapEstimator::new(config.bootstrap.clone())
                    .with_checkpoint(self.checkpoint.clone()),
            )
        } else {
            None
        };

        let bootstrap = match &bootstrap_estimator {
            Some(estimator) => {
                let estimate = estimator.estimate_error(&table, Some(&fitter))?;
                result.error = estimate.error.clone();
                Some(estimate)
            }
            None => None,
        };

        let mut continuum = fitter.fit_continuum(&result.wave, &result.flux, &result.error)?;
        if !config.splice.windows.is_empty() {
            continuum = fitter.splice_linear(
                &result.wave,
                &result.flux,
                &result.error,
                &continuum,
                &config.splice.windows,
                config.splice.tolerance,
            )?;
        }
        self.checkpoint.emit(&StackEvent::ContinuumFitted {
            n_lines: continuum.lines.len(),
        });
        result.set_continuum(continuum.continuum())?;

        let jackknife = if config.jackknife.enabled {
            let mut estimator = JackknifeEstimator::new(fitter)
                .with_group_fraction(config.jackknife.group_fraction)
                .with_splices(config.splice.clone())
                .with_checkpoint(self.checkpoint.clone());
            if let Some(bootstrap) = bootstrap_estimator {
                estimator = estimator.with_bootstrap(bootstrap);
            }
            let outcomes = estimator.jackknife_stacks(&table)?;
            let stacks: Vec<JackknifeStack> = outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok())
                .cloned()
                .collect();
            let failed = outcomes.len() - stacks.len();
            if failed > 0 {
                log::warn!("{failed} of {} jackknife groups failed", outcomes.len());
            }
            let stats = jackknife_statistics(&stacks, &continuum, mode, percentile)?;
            Some((outcomes, stats))
        } else {
            None
        };

        if config.aggregate.trim_empty {
            result.trim_empty();
        }

        Ok(StackRun {
            table,
            stack: result,
            continuum,
            bootstrap,
            jackknife,
        })
    }
}
