//! stackciv - Rest-frame stacking of absorber spectra
//!
//! Observed spectra are shifted to the absorber rest frame, rebinned onto a
//! shared log-linear grid, weighted and collapsed into a composite spectrum.
//! The composite gets a masked, sigma-clipped B-spline continuum, optional
//! linear splices and equivalent widths for every catalog line found in it.
//!
//! Errors on the composite come from a Monte-Carlo bootstrap; errors on the
//! line measurements come from a deleted-d group jackknife ordered by a
//! per-object covariate.
//!
//! # Example
//!
//! ```no_run
//! use stackciv::{ObjectSpectrum, StackConfig, StackPipeline};
//!
//! # fn load() -> Vec<ObjectSpectrum> { Vec::new() }
//! let spectra = load();
//! let pipeline = StackPipeline::new(StackConfig::default())?;
//! let run = pipeline.run(&spectra, &[])?;
//! for line in &run.continuum.lines {
//!     println!("{:?}: EW {:.3} ± {:.3}", line.name, line.ew, line.ew_sigma);
//! }
//! # Ok::<(), stackciv::StackError>(())
//! ```

pub mod bootstrap;
pub mod config;
pub mod continuum;
pub mod error;
pub mod grid;
pub mod jackknife;
pub mod lines;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod stack;
pub mod table;
pub mod weights;

// Re-export commonly used types
pub use crate::bootstrap::{BootstrapEstimate, BootstrapEstimator, ExtremalStacks};
pub use crate::config::{
    default_percentile, AggregateConfig, AggregateMode, BootstrapConfig, ContinuumConfig,
    GridConfig, JackknifeConfig, SpliceConfig, SpliceWindow, StackConfig, WeightMode,
    WeightingConfig,
};
pub use crate::continuum::{
    ContinuumFitter, ContinuumFlavor, ContinuumPlane, ContinuumRecord, LineMeasurement,
    SpliceOutcome, SpliceStatus,
};
pub use crate::error::{ObjectStatus, QualityWarning, Result, StackError};
pub use crate::grid::WavelengthGrid;
pub use crate::jackknife::{
    jackknife_statistics, partition_groups, JackknifeEstimator, JackknifeGroup, JackknifeOutcome,
    JackknifeStack, JackknifeStats, LineJackknife,
};
pub use crate::lines::{LineCatalog, SpectralLine};
pub use crate::pipeline::{RunSummary, StackPipeline, StackRun};
pub use crate::progress::{CancelToken, Checkpoint, StackCallback, StackEvent};
pub use crate::stack::{collapse, stack, PixelQuality, StackResult};
pub use crate::table::{ObjectMeta, ObjectRecord, ObjectSpectrum, StackTable};
pub use crate::weights::{CompletenessSurface, WeightPolicy};
