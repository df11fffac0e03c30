//! Bootstrap error estimation on small tables

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{absorber_sample, civ_grid_config, init_logging, table_from_rows};
use stackciv::{
    AggregateMode, BootstrapConfig, BootstrapEstimator, CancelToken, Checkpoint, ContinuumConfig,
    ContinuumFitter, LineCatalog, StackError, StackEvent, StackTable, WavelengthGrid, WeightPolicy,
};

fn varied_table(mode: AggregateMode) -> StackTable {
    let rows: Vec<_> = (0..10)
        .map(|i| {
            let f = i as f64;
            (vec![1.0 + 0.1 * f, 2.0 - 0.05 * f * f, 0.5 * f], vec![0.01; 3], vec![1.0; 3])
        })
        .collect();
    table_from_rows(&rows, mode)
}

fn config(iterations: usize, exclusion_fraction: f64) -> BootstrapConfig {
    BootstrapConfig {
        iterations,
        exclusion_fraction,
        ..BootstrapConfig::default()
    }
}

#[test]
fn test_scenario_c_no_replacement_gives_zero_error() {
    init_logging();
    let median = BootstrapEstimator::new(config(100, 0.0))
        .estimate_error(&varied_table(AggregateMode::Median), None)
        .unwrap();
    assert_eq!(median.error, vec![0.0; 3]);
    assert_eq!(median.n_replaced, 0);

    let mean = BootstrapEstimator::new(config(100, 0.0))
        .estimate_error(&varied_table(AggregateMode::Mean), None)
        .unwrap();
    assert!(mean.error.iter().all(|e| e.abs() < 1e-12));
}

#[test]
fn test_same_seed_is_deterministic() {
    let table = varied_table(AggregateMode::Median);
    let a = BootstrapEstimator::new(config(64, 0.5)).estimate_error(&table, None).unwrap();
    let b = BootstrapEstimator::new(config(64, 0.5)).estimate_error(&table, None).unwrap();
    assert_eq!(a, b);
    assert!(a.error.iter().any(|&e| e > 0.0));

    let other_seed = BootstrapConfig {
        seed: 7,
        ..config(64, 0.5)
    };
    let c = BootstrapEstimator::new(other_seed).estimate_error(&table, None).unwrap();
    assert_ne!(a.error, c.error);
}

#[test]
fn test_base_table_is_untouched() {
    let table = varied_table(AggregateMode::Mean);
    let before = table.clone();
    BootstrapEstimator::new(config(16, 1.0)).estimate_error(&table, None).unwrap();
    assert_eq!(table, before);
}

#[test]
fn test_extremal_stacks_drop_covariate_ends() {
    let table = varied_table(AggregateMode::Mean);
    let cfg = BootstrapConfig {
        extremal: true,
        ..config(8, 0.2)
    };
    let estimate = BootstrapEstimator::new(cfg).estimate_error(&table, None).unwrap();
    let extremal = estimate.extremal.unwrap();
    assert_eq!(extremal.n_excluded, 2);
    assert_eq!(extremal.without_low.metadata.n_objects, 8);
    assert_eq!(extremal.without_low.metadata.covariate.min, 2.0);
    assert_eq!(extremal.without_high.metadata.covariate.max, 7.0);
}

#[test]
fn test_extremal_excluding_everything_is_rejected() {
    let cfg = BootstrapConfig {
        extremal: true,
        ..config(8, 1.0)
    };
    let err = BootstrapEstimator::new(cfg)
        .estimate_error(&varied_table(AggregateMode::Mean), None)
        .unwrap_err();
    assert!(matches!(err, StackError::Configuration(_)));
}

#[test]
fn test_zero_iterations_is_rejected() {
    let err = BootstrapEstimator::new(config(0, 1.0))
        .estimate_error(&varied_table(AggregateMode::Mean), None)
        .unwrap_err();
    assert!(matches!(err, StackError::Configuration(_)));
}

#[test]
fn test_nested_fits_one_continuum_per_iteration() {
    init_logging();
    let spectra = absorber_sample(8, 5);
    let grid = WavelengthGrid::from_config(&civ_grid_config()).unwrap();
    let policy = WeightPolicy::uniform();
    let table =
        StackTable::build(grid, &spectra, &policy, AggregateMode::Median, (0.16, 0.84)).unwrap();
    let fitter = ContinuumFitter::new(ContinuumConfig::default(), LineCatalog::rest_uv()).unwrap();

    let cfg = BootstrapConfig {
        nested: true,
        inner_iterations: 5,
        ..config(4, 0.5)
    };
    let estimate = BootstrapEstimator::new(cfg.clone())
        .estimate_error(&table, Some(&fitter))
        .unwrap();
    assert_eq!(estimate.continua.len(), 4);
    for record in &estimate.continua {
        assert_eq!(record.wave.len(), table.n_pixels());
    }

    let err = BootstrapEstimator::new(cfg).estimate_error(&table, None).unwrap_err();
    assert!(matches!(err, StackError::Configuration(_)));
}

#[test]
fn test_cancelled_run_stops_with_cancelled() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let checkpoint = Checkpoint::default().with_cancel(cancel);
    let err = BootstrapEstimator::new(config(32, 1.0))
        .with_checkpoint(checkpoint)
        .estimate_error(&varied_table(AggregateMode::Mean), None)
        .unwrap_err();
    assert!(matches!(err, StackError::Cancelled));
}

#[test]
fn test_progress_reports_every_iteration() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let checkpoint = Checkpoint::default().with_callback(Arc::new(move |event: &StackEvent| {
        if let StackEvent::BootstrapIteration { total, .. } = event {
            assert_eq!(*total, 20);
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }));
    BootstrapEstimator::new(config(20, 1.0))
        .with_checkpoint(checkpoint)
        .estimate_error(&varied_table(AggregateMode::Mean), None)
        .unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 20);
}
