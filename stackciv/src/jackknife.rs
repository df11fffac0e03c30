//! Deleted-d group jackknife.
//!
//! Objects are sorted by covariate and cut into contiguous groups; each
//! jackknife stack leaves one group out. Statistics are computed per catalog
//! line from the equivalent widths measured on those stacks:
//!
//! - variance  = (n − 1) · mean((θᵢ − θ̄)²), defined as 0 for n ≤ 1
//! - bias      = (n − 1) · (θ̄ − θ)
//! - corrected = n · θ − (n − 1) · θ̄
//!
//! with θ the reference measurement, θᵢ the leave-one-group-out values and θ̄
//! their mean (mean mode) or median (median mode). The `(n − 1)` factor is
//! applied regardless of group size.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stack_math::{median, weighted_percentile};

use crate::bootstrap::BootstrapEstimator;
use crate::config::{AggregateMode, SpliceConfig};
use crate::continuum::{ContinuumFitter, ContinuumRecord};
use crate::error::{Result, StackError};
use crate::progress::{Checkpoint, StackEvent};
use crate::stack::{collapse, StackResult};
use crate::table::StackTable;

/// Contiguous block of objects in covariate order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JackknifeGroup {
    pub index: usize,
    /// Table row indices, in covariate order
    pub members: Vec<usize>,
    pub covariate_min: f64,
    pub covariate_max: f64,
}

/// Everything built from the objects outside one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JackknifeStack {
    pub group: JackknifeGroup,
    pub stack: StackResult,
    pub continuum: ContinuumRecord,
    /// Nested bootstrap continua of this stack, if any
    pub replicas: Vec<ContinuumRecord>,
}

/// Result for one group; a failed group does not stop its siblings.
#[derive(Debug)]
pub struct JackknifeOutcome {
    pub group: JackknifeGroup,
    pub result: std::result::Result<JackknifeStack, StackError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub index: usize,
    pub n_excluded: usize,
    pub covariate_min: f64,
    pub covariate_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineJackknife {
    pub name: String,
    pub rest_wave: Option<f64>,
    /// Equivalent width on the reference stack
    pub reference: f64,
    /// Leave-one-group-out value per contributing group
    pub leave_one_out: Vec<f64>,
    pub n_groups: usize,
    pub estimate: f64,
    pub variance: f64,
    pub bias: f64,
    pub corrected: f64,
    /// Empirical-CDF bounds at the percentile pair
    pub interval: (f64, f64),
    pub error_minus: f64,
    pub error_plus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JackknifeStats {
    pub mode: AggregateMode,
    pub percentile: (f64, f64),
    pub groups: Vec<GroupSummary>,
    pub lines: Vec<LineJackknife>,
}

/// Objects per group: `round(f · N)` or `ceil(sqrt(N))`, at least 1 and at
/// most `ceil(N / 2)` so that two or more objects always give two groups.
pub fn group_size(n_objects: usize, group_fraction: Option<f64>) -> usize {
    let size = match group_fraction {
        Some(f) => (f * n_objects as f64).round() as usize,
        None => (n_objects as f64).sqrt().ceil() as usize,
    };
    size.clamp(1, n_objects.div_ceil(2).max(1))
}

/// Split the table into `ceil(N / size)` covariate-ordered groups; the last
/// one holds the remainder.
pub fn partition_groups(
    table: &StackTable,
    group_fraction: Option<f64>,
) -> Result<Vec<JackknifeGroup>> {
    let n = table.n_objects();
    if n == 0 {
        return Err(StackError::Configuration("cannot partition an empty table".into()));
    }
    if let Some(f) = group_fraction {
        if !(f > 0.0 && f <= 1.0) {
            return Err(StackError::Configuration(format!(
                "group fraction must lie in (0, 1], got {f}"
            )));
        }
    }

    let size = group_size(n, group_fraction);
    let n_groups = n.div_ceil(size);
    let order = table.covariate_order();
    let objects = table.objects();

    let groups = (0..n_groups)
        .map(|g| {
            let start = g * size;
            let end = (start + size).min(n);
            let members = order[start..end].to_vec();
            let (lo, hi) = members.iter().map(|&i| objects[i].covariate).fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), c| (lo.min(c), hi.max(c)),
            );
            JackknifeGroup {
                index: g,
                members,
                covariate_min: lo,
                covariate_max: hi,
            }
        })
        .collect();
    Ok(groups)
}

#[derive(Debug, Clone)]
pub struct JackknifeEstimator {
    group_fraction: Option<f64>,
    fitter: ContinuumFitter,
    splice: SpliceConfig,
    bootstrap: Option<BootstrapEstimator>,
    checkpoint: Checkpoint,
}

impl JackknifeEstimator {
    pub fn new(fitter: ContinuumFitter) -> Self {
        Self {
            group_fraction: None,
            fitter,
            splice: SpliceConfig::default(),
            bootstrap: None,
            checkpoint: Checkpoint::default(),
        }
    }

    pub fn with_group_fraction(mut self, group_fraction: Option<f64>) -> Self {
        self.group_fraction = group_fraction;
        self
    }

    pub fn with_splices(mut self, splice: SpliceConfig) -> Self {
        self.splice = splice;
        self
    }

    /// Replace each jackknife stack's error with a bootstrap estimate; nested
    /// bootstrap continua become that group's replicas.
    pub fn with_bootstrap(mut self, bootstrap: BootstrapEstimator) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// One outcome per group, in group order. Only cancellation aborts the
    /// whole call.
    pub fn jackknife_stacks(&self, table: &StackTable) -> Result<Vec<JackknifeOutcome>> {
        let groups = partition_groups(table, self.group_fraction)?;
        let total = groups.len();
        let completed = AtomicUsize::new(0);

        groups
            .into_par_iter()
            .map(|group| -> Result<JackknifeOutcome> {
                self.checkpoint.check()?;
                let result = self.group_stack(table, &group);
                match &result {
                    Err(StackError::Cancelled) => return Err(StackError::Cancelled),
                    Err(e) => log::error!("jackknife group {} failed: {e}", group.index),
                    Ok(_) => {}
                }

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.checkpoint.emit(&StackEvent::JackknifeGroup {
                    completed: done,
                    total,
                    group: group.index,
                    ok: result.is_ok(),
                });
                Ok(JackknifeOutcome { group, result })
            })
            .collect()
    }

    fn group_stack(&self, table: &StackTable, group: &JackknifeGroup) -> Result<JackknifeStack> {
        let mut excluded = vec![false; table.n_objects()];
        for &i in &group.members {
            excluded[i] = true;
        }
        let keep: Vec<usize> = (0..table.n_objects()).filter(|&i| !excluded[i]).collect();
        if keep.is_empty() {
            return Err(StackError::Configuration(format!(
                "jackknife group {} excludes every object",
                group.index
            )));
        }

        let copy = table.select(&keep);
        let mut stack = collapse(&copy, copy.mode(), copy.percentile())?;

        let mut replicas = Vec::new();
        if let Some(bootstrap) = &self.bootstrap {
            let estimate = bootstrap.estimate_error(&copy, Some(&self.fitter))?;
            stack.error = estimate.error;
            replicas = estimate.continua;
        }

        let mut continuum = self.fitter.fit_continuum(&stack.wave, &stack.flux, &stack.error)?;
        if !self.splice.windows.is_empty() {
            continuum = self.fitter.splice_linear(
                &stack.wave,
                &stack.flux,
                &stack.error,
                &continuum,
                &self.splice.windows,
                self.splice.tolerance,
            )?;
        }
        stack.set_continuum(continuum.continuum())?;

        Ok(JackknifeStack {
            group: group.clone(),
            stack,
            continuum,
            replicas,
        })
    }
}

fn centre(values: &[f64], mode: AggregateMode) -> Result<f64> {
    match mode {
        AggregateMode::Mean => {
            if values.is_empty() {
                return Err(StackError::NumericalInconsistency("mean of no values".into()));
            }
            Ok(values.iter().sum::<f64>() / values.len() as f64)
        }
        AggregateMode::Median => Ok(median(values)?),
    }
}

fn line_ew(record: &ContinuumRecord, name: &str) -> Option<f64> {
    record.line(name).map(|l| l.ew).filter(|ew| ew.is_finite())
}

/// Jackknife bias, variance and interval for every identified line of
/// `reference`, from successfully built jackknife stacks.
pub fn jackknife_statistics(
    stacks: &[JackknifeStack],
    reference: &ContinuumRecord,
    mode: AggregateMode,
    percentile: (f64, f64),
) -> Result<JackknifeStats> {
    if !(0.0..=1.0).contains(&percentile.0) || !(0.0..=1.0).contains(&percentile.1) {
        return Err(StackError::Configuration(format!(
            "percentile pair ({}, {}) outside [0, 1]",
            percentile.0, percentile.1
        )));
    }

    let groups = stacks
        .iter()
        .map(|s| GroupSummary {
            index: s.group.index,
            n_excluded: s.group.members.len(),
            covariate_min: s.group.covariate_min,
            covariate_max: s.group.covariate_max,
        })
        .collect();

    let mut lines = Vec::new();
    for line in &reference.lines {
        let Some(name) = line.name.as_deref() else {
            continue;
        };
        let theta = line.ew;

        let mut leave_one_out = Vec::with_capacity(stacks.len());
        let mut all_values = Vec::new();
        let mut all_weights = Vec::new();
        for s in stacks {
            let values: Vec<f64> = std::iter::once(&s.continuum)
                .chain(&s.replicas)
                .filter_map(|r| line_ew(r, name))
                .collect();
            if values.is_empty() {
                continue;
            }
            leave_one_out.push(centre(&values, mode)?);
            all_weights.extend(std::iter::repeat(s.group.members.len() as f64).take(values.len()));
            all_values.extend(values);
        }

        if leave_one_out.is_empty() {
            log::warn!("jackknife: {name} not measured in any jackknife stack");
            continue;
        }

        let n = leave_one_out.len() as f64;
        let estimate = centre(&leave_one_out, mode)?;
        let variance = if leave_one_out.len() <= 1 {
            0.0
        } else {
            (n - 1.0) * leave_one_out.iter().map(|t| (t - estimate).powi(2)).sum::<f64>() / n
        };
        let low = weighted_percentile(&all_values, &all_weights, percentile.0)?;
        let high = weighted_percentile(&all_values, &all_weights, percentile.1)?;

        lines.push(LineJackknife {
            name: name.to_string(),
            rest_wave: line.rest_wave,
            reference: theta,
            n_groups: leave_one_out.len(),
            estimate,
            variance,
            bias: (n - 1.0) * (estimate - theta),
            corrected: n * theta - (n - 1.0) * estimate,
            interval: (low, high),
            error_minus: estimate - low,
            error_plus: high - estimate,
            leave_one_out,
        });
    }

    Ok(JackknifeStats {
        mode,
        percentile,
        groups,
        lines,
    })
}
