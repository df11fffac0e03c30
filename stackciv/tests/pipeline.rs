//! End-to-end runs on synthetic CIV absorbers

mod common;

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use common::{
    absorber_sample, civ_config, init_logging, true_continuum, CIV_1548, CIV_1550, SIII_1526,
};
use ndarray::Array2;
use stack_math::BilinearGrid;
use stackciv::persist::{load_json, save_json};
use stackciv::{
    AggregateMode, BootstrapConfig, CancelToken, Checkpoint, CompletenessSurface, ContinuumFlavor,
    JackknifeConfig, ObjectStatus, QualityWarning, RunSummary, SpliceStatus, SpliceWindow,
    StackConfig, StackError, StackEvent, StackPipeline, StackResult,
};
use tempfile::TempDir;

#[test]
fn test_stack_recovers_continuum_and_lines() {
    init_logging();
    let spectra = absorber_sample(12, 100);
    let run = StackPipeline::new(civ_config()).unwrap().run(&spectra, &[]).unwrap();

    assert_eq!(run.table.n_objects(), 12);
    assert_eq!(run.stack.len(), run.table.n_pixels());
    assert!(run.stack.ncontrib.iter().all(|&n| n == 12));

    // continuum away from the lines
    for (i, &w) in run.stack.wave.iter().enumerate() {
        if (1470.0..1510.0).contains(&w) || (1570.0..1640.0).contains(&w) {
            assert_relative_eq!(run.stack.continuum[i], true_continuum(w), epsilon = 0.02);
        }
    }

    for (name, rest) in [("SiII 1526", SIII_1526), ("CIV 1548", CIV_1548), ("CIV 1550", CIV_1550)] {
        let line = run.continuum.line(name).unwrap_or_else(|| panic!("{name} not found"));
        assert_relative_eq!(line.centroid, rest, epsilon = 0.2);
        assert!(line.ew > 0.0);
        assert!(line.ew_sigma > 0.0 && line.ew_sigma < line.ew);
    }
    assert!(run.bootstrap.is_none());
    assert!(run.jackknife.is_none());
}

#[test]
fn test_bootstrap_error_replaces_stack_error() {
    let spectra = absorber_sample(10, 7);
    let config = StackConfig {
        bootstrap: BootstrapConfig {
            iterations: 30,
            ..BootstrapConfig::default()
        },
        ..civ_config()
    };
    let run = StackPipeline::new(config).unwrap().run(&spectra, &[]).unwrap();
    let bootstrap = run.bootstrap.unwrap();
    assert_eq!(bootstrap.iterations, 30);
    assert_eq!(run.stack.error, bootstrap.error);
}

#[test]
fn test_splice_changes_only_between_seams() {
    let spectra = absorber_sample(10, 21);
    let window = SpliceWindow::new((1535.0, 1542.0), (1556.0, 1563.0));
    let mut config = civ_config();
    config.splice.windows = vec![window];
    config.splice.tolerance = 0.1;

    let spliced = StackPipeline::new(config).unwrap().run(&spectra, &[]).unwrap();
    let record = &spliced.continuum;
    assert_eq!(record.active_flavor(), ContinuumFlavor::Spliced);

    let spline = record.plane(ContinuumFlavor::Spline).unwrap();
    let SpliceStatus::Applied { blue_seam, red_seam, .. } = record.splices[0].status else {
        panic!("splice not applied: {:?}", record.splices[0]);
    };
    assert!(blue_seam < red_seam);
    for i in 0..record.wave.len() {
        if i < blue_seam || i > red_seam {
            assert_eq!(record.continuum()[i], spline.values[i]);
        }
    }
    assert_eq!(spliced.stack.continuum, record.continuum());
    assert!(record.line("CIV 1548").is_some());
}

#[test]
fn test_jackknife_statistics_for_civ() {
    init_logging();
    let spectra = absorber_sample(16, 300);
    let config = StackConfig {
        jackknife: JackknifeConfig {
            enabled: true,
            group_fraction: None,
        },
        ..civ_config()
    };

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let checkpoint = Checkpoint::default().with_callback(Arc::new(move |e: &StackEvent| {
        sink.lock().unwrap().push(e.clone());
    }));

    let run = StackPipeline::new(config)
        .unwrap()
        .with_checkpoint(checkpoint)
        .run(&spectra, &[])
        .unwrap();
    let (outcomes, stats) = run.jackknife.unwrap();

    // ceil(sqrt(16)) = 4 objects per group
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(stats.groups.iter().map(|g| g.n_excluded).sum::<usize>(), 16);

    let civ = stats.lines.iter().find(|l| l.name == "CIV 1548").unwrap();
    assert_eq!(civ.n_groups, 4);
    assert!(civ.variance > 0.0 && civ.variance.is_finite());
    assert!(civ.interval.0 <= civ.interval.1);
    assert_relative_eq!(civ.error_minus, civ.estimate - civ.interval.0, epsilon = 1e-12);
    assert_relative_eq!(civ.corrected, 4.0 * civ.reference - 3.0 * civ.estimate, epsilon = 1e-9);

    let events = events.lock().unwrap();
    assert!(matches!(events[0], StackEvent::TableBuilt { n_objects: 16, .. }));
    let groups = events
        .iter()
        .filter(|e| matches!(e, StackEvent::JackknifeGroup { .. }))
        .count();
    assert_eq!(groups, 4);
}

#[test]
fn test_cancelled_pipeline_returns_cancelled() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let config = StackConfig {
        bootstrap: BootstrapConfig {
            iterations: 10,
            ..BootstrapConfig::default()
        },
        ..civ_config()
    };
    let err = StackPipeline::new(config)
        .unwrap()
        .with_checkpoint(Checkpoint::default().with_cancel(cancel))
        .run(&absorber_sample(4, 1), &[])
        .unwrap_err();
    assert!(matches!(err, StackError::Cancelled));
}

#[test]
fn test_completeness_surface_sets_weights_and_warnings() {
    let mut spectra = absorber_sample(4, 9);
    // below the surface's valid region
    spectra[3].covariate = 0.0;

    let mut data = Array2::from_elem((2, 2), 0.5);
    data[[0, 0]] = f64::NAN;
    data[[0, 1]] = f64::NAN;
    let surface = CompletenessSurface::new(
        "civ",
        BilinearGrid::new(vec![1.0, 3.0], vec![0.0, 2.0], data).unwrap(),
    );

    let mut config = civ_config();
    config.weighting.completeness = true;
    config.weighting.n_completeness = 1;
    config.aggregate.mode = AggregateMode::Mean;

    let run = StackPipeline::new(config.clone())
        .unwrap()
        .run(&spectra, &[surface.clone()])
        .unwrap();
    let objects = run.table.objects();
    assert_eq!(objects[0].completeness.len(), 1);
    assert!(run.table.weight().row(0).iter().any(|&w| w == 2.0));
    assert_eq!(
        objects[3].status,
        ObjectStatus::Warning(QualityWarning::NonFiniteCompleteness)
    );
    assert!(run.table.weight().row(3).iter().all(|&w| w == 0.0));

    let err = StackPipeline::new(config)
        .unwrap()
        .run(&spectra, &[surface.clone(), surface])
        .unwrap_err();
    assert!(matches!(err, StackError::Configuration(_)));
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let mut config = civ_config();
    config.aggregate.percentile = Some((0.9, 0.1));
    assert!(matches!(StackPipeline::new(config), Err(StackError::Configuration(_))));

    let mut config = civ_config();
    config.weighting.completeness = true;
    config.weighting.mode = stackciv::WeightMode::InverseVariance;
    assert!(matches!(StackPipeline::new(config), Err(StackError::Configuration(_))));

    let mut config = civ_config();
    config.splice.windows = vec![SpliceWindow::new((1560.0, 1565.0), (1530.0, 1535.0))];
    assert!(matches!(StackPipeline::new(config), Err(StackError::Configuration(_))));

    let mut config = civ_config();
    config.jackknife.group_fraction = Some(1.5);
    assert!(matches!(StackPipeline::new(config), Err(StackError::Configuration(_))));
}

#[test]
fn test_results_round_trip_through_json() {
    let temp_dir = TempDir::new().unwrap();
    let spectra = absorber_sample(6, 42);
    let mut config = civ_config();
    config.aggregate.trim_empty = true;
    let run = StackPipeline::new(config.clone()).unwrap().run(&spectra, &[]).unwrap();

    let stack_path = temp_dir.path().join("stack.json");
    save_json(&run.stack, &stack_path).unwrap();
    let loaded: StackResult = load_json(&stack_path).unwrap();
    assert_eq!(loaded, run.stack);

    let summary_path = temp_dir.path().join("run.json");
    let summary = run.summary(&config);
    summary.save_to_file(&summary_path).unwrap();
    let loaded = RunSummary::load_from_file(&summary_path).unwrap();
    assert_eq!(loaded.stack, summary.stack);
    assert_eq!(loaded.continuum.lines, summary.continuum.lines);
    assert_eq!(loaded.config, config);
}
