use std::path::Path;

use serde::{Deserialize, Serialize};
use stack_math::normal_cdf;

use crate::error::{Result, StackError};
use crate::persist;

/// Destination grid: `10^(log10(wave_min) + i * log_pixscale)` up to `wave_max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Lower bound in rest-frame Ångström
    pub wave_min: f64,
    /// Upper bound in rest-frame Ångström
    pub wave_max: f64,
    /// Pixel size in log10(Å)
    pub log_pixscale: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            wave_min: 1150.0,
            wave_max: 2900.0,
            log_pixscale: 1.0e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightMode {
    #[default]
    Uniform,
    InverseVariance,
    /// Inverse variance normalised so each object's median is 1
    LightWeighted,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightingConfig {
    pub mode: WeightMode,
    /// Divide weights by the product of per-object completeness factors
    pub completeness: bool,
    /// Number of completeness factors each object must carry
    pub n_completeness: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregateMode {
    Mean,
    #[default]
    Median,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub mode: AggregateMode,
    /// Percentile pair for the flux band; `None` means ±1σ Gaussian equivalent
    pub percentile: Option<(f64, f64)>,
    /// Drop leading and trailing pixels nobody contributed to
    pub trim_empty: bool,
}

/// ±1σ Gaussian-equivalent percentile pair, Φ(−1) and Φ(1).
pub fn default_percentile() -> (f64, f64) {
    (normal_cdf(-1.0), normal_cdf(1.0))
}

impl AggregateConfig {
    pub fn percentile_pair(&self) -> (f64, f64) {
        self.percentile.unwrap_or_else(default_percentile)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuumConfig {
    /// Spline breakpoint spacing in Ångström
    pub breakpoint_spacing: f64,
    /// Reject pixels more than this many sigma below the fit
    pub clip_lower: f64,
    /// Reject pixels more than this many sigma above the fit
    pub clip_upper: f64,
    pub max_iterations: usize,
    /// Minimum absorption significance for a pixel to join a line
    pub search_snr: f64,
    /// Minimum number of consecutive significant pixels per line
    pub min_line_pixels: usize,
    /// Catalog pairs closer than this (km/s) are re-split if detected as one
    pub pair_velocity: f64,
    /// Maximum centroid offset (km/s) for identifying a catalog line
    pub match_velocity: f64,
    /// EW half-window (km/s) for unidentified lines
    pub ew_velocity: f64,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            breakpoint_spacing: 20.0,
            clip_lower: 2.5,
            clip_upper: 3.0,
            max_iterations: 10,
            search_snr: 3.0,
            min_line_pixels: 2,
            pair_velocity: 800.0,
            match_velocity: 150.0,
            ew_velocity: 250.0,
        }
    }
}

impl ContinuumConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.breakpoint_spacing > 0.0 && self.breakpoint_spacing.is_finite()) {
            return Err(invalid(format!(
                "breakpoint spacing must be positive, got {}",
                self.breakpoint_spacing
            )));
        }
        if !(self.clip_lower > 0.0 && self.clip_upper > 0.0) {
            return Err(invalid("clipping thresholds must be positive"));
        }
        if !(self.search_snr > 0.0) || self.min_line_pixels == 0 {
            return Err(invalid("line search needs a positive S/N and at least one pixel"));
        }
        let velocities = [self.pair_velocity, self.match_velocity, self.ew_velocity];
        if velocities.iter().any(|v| !(*v >= 0.0 && v.is_finite())) {
            return Err(invalid(format!(
                "line velocities must be finite and non-negative, got {velocities:?}"
            )));
        }
        Ok(())
    }
}

/// Blue and red wavelength windows, each `(start, end)` in Ångström.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpliceWindow {
    pub blue: (f64, f64),
    pub red: (f64, f64),
}

impl SpliceWindow {
    pub fn new(blue: (f64, f64), red: (f64, f64)) -> Self {
        Self { blue, red }
    }

    pub fn is_ascending(&self) -> bool {
        self.blue.0 < self.blue.1 && self.blue.1 <= self.red.0 && self.red.0 < self.red.1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpliceConfig {
    pub windows: Vec<SpliceWindow>,
    /// Largest acceptable |line - continuum| at a seam, in flux units
    pub tolerance: f64,
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Number of resampled stacks; 0 disables the bootstrap
    pub iterations: usize,
    /// Fraction of objects replaced per iteration
    pub exclusion_fraction: f64,
    /// Add two stacks excluding the lowest/highest covariate objects
    pub extremal: bool,
    /// Fit a continuum to every resampled stack
    pub nested: bool,
    /// Iterations of the inner error estimate in nested mode
    pub inner_iterations: usize,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: 0,
            exclusion_fraction: 1.0,
            extremal: false,
            nested: false,
            inner_iterations: 50,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JackknifeConfig {
    pub enabled: bool,
    /// Group size as a fraction of N; `None` gives ceil(sqrt(N)) objects
    pub group_fraction: Option<f64>,
}

/// Full configuration of a stacking run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub grid: GridConfig,
    pub weighting: WeightingConfig,
    pub aggregate: AggregateConfig,
    pub continuum: ContinuumConfig,
    pub splice: SpliceConfig,
    pub bootstrap: BootstrapConfig,
    pub jackknife: JackknifeConfig,
}

fn invalid(msg: impl Into<String>) -> StackError {
    StackError::Configuration(msg.into())
}

impl StackConfig {
    /// Reject option combinations before any work starts.
    pub fn validate(&self) -> Result<()> {
        let g = &self.grid;
        if !(g.wave_min > 0.0 && g.wave_max > g.wave_min && g.wave_max.is_finite()) {
            return Err(invalid(format!(
                "grid bounds must satisfy 0 < wave_min < wave_max, got [{}, {}]",
                g.wave_min, g.wave_max
            )));
        }
        if !(g.log_pixscale > 0.0 && g.log_pixscale.is_finite()) {
            return Err(invalid(format!("log_pixscale must be positive, got {}", g.log_pixscale)));
        }

        let w = &self.weighting;
        if w.completeness && w.mode != WeightMode::Uniform {
            return Err(invalid(format!(
                "completeness weighting cannot be combined with {:?} weighting",
                w.mode
            )));
        }

        if let Some((low, high)) = self.aggregate.percentile {
            if !(low > 0.0 && high < 1.0 && low < high) {
                return Err(invalid(format!(
                    "percentile pair must satisfy 0 < low < high < 1, got ({low}, {high})"
                )));
            }
        }

        self.continuum.validate()?;

        if !(self.splice.tolerance > 0.0) {
            return Err(invalid("splice tolerance must be positive"));
        }
        if let Some(window) = self.splice.windows.iter().find(|w| !w.is_ascending()) {
            return Err(invalid(format!("splice windows not in ascending order: {window:?}")));
        }

        let b = &self.bootstrap;
        if !(0.0..=1.0).contains(&b.exclusion_fraction) {
            return Err(invalid(format!(
                "exclusion fraction must lie in [0, 1], got {}",
                b.exclusion_fraction
            )));
        }
        if b.nested && b.inner_iterations == 0 {
            return Err(invalid("nested bootstrap needs inner iterations"));
        }

        if let Some(f) = self.jackknife.group_fraction {
            if !(f > 0.0 && f <= 1.0) {
                return Err(invalid(format!("group fraction must lie in (0, 1], got {f}")));
            }
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        persist::save_json(self, path)
    }

    /// Load and validate a JSON configuration
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config: Self = persist::load_json(path)?;
        config.validate()?;
        Ok(config)
    }
}
