//! Aggregation behaviour on small hand-built and synthetic tables

mod common;

use approx::assert_relative_eq;
use common::{init_logging, table_from_rows, unit_grid};
use stackciv::{
    collapse, stack, AggregateMode, ObjectSpectrum, ObjectStatus, PixelQuality, StackTable,
    WeightPolicy,
};

fn identical_objects(n: usize, flux: &[f64]) -> Vec<ObjectSpectrum> {
    let wave: Vec<f64> = (0..flux.len()).map(|i| 1500.0 + i as f64).collect();
    (0..n)
        .map(|i| {
            let (id, sigma) = (format!("obj{i}"), vec![0.1; flux.len()]);
            ObjectSpectrum::new(id, wave.clone(), flux.to_vec(), sigma, 0.0, i as f64)
        })
        .collect()
}

#[test]
fn test_scenario_a_agreeing_objects_have_zero_error() {
    init_logging();
    let rows: Vec<_> = (0..3)
        .map(|_| (vec![1.0, 2.0, 3.0], vec![0.0; 3], vec![1.0; 3]))
        .collect();
    let mut table = table_from_rows(&rows, AggregateMode::Mean);

    let result = stack(&mut table, AggregateMode::Mean, None).unwrap();
    assert_eq!(result.flux, vec![1.0, 2.0, 3.0]);
    assert_eq!(result.error, vec![0.0, 0.0, 0.0]);
    assert_eq!(result.ncontrib, vec![3, 3, 3]);
    assert_eq!(result.weight, vec![3.0, 3.0, 3.0]);
    assert!(result.quality.iter().all(|&q| q == PixelQuality::Degenerate));
}

#[test]
fn test_agreeing_noisy_objects_keep_propagated_error() {
    let spectra = identical_objects(4, &[0.0, 0.5, 1.0]);
    let policy = WeightPolicy::uniform();
    let table =
        StackTable::build(unit_grid(3), &spectra, &policy, AggregateMode::Mean, (0.25, 0.75))
            .unwrap();

    let result = collapse(&table, AggregateMode::Mean, (0.25, 0.75)).unwrap();
    // a saturated trough at zero flux still carries an error
    assert_eq!(result.flux[0], 0.0);
    for &error in &result.error {
        assert_relative_eq!(error, 0.1 / 2.0, epsilon = 1e-9);
    }

    let median = collapse(&table, AggregateMode::Median, (0.25, 0.75)).unwrap();
    assert_eq!(median.error, vec![0.0; 3]);
}

#[test]
fn test_scenario_b_even_median_averages_middle_values() {
    let table = table_from_rows(
        &[
            (vec![1.0], vec![0.01], vec![1.0]),
            (vec![3.0], vec![0.01], vec![1.0]),
        ],
        AggregateMode::Median,
    );
    let result = collapse(&table, AggregateMode::Median, (0.25, 0.75)).unwrap();
    assert_eq!(result.flux, vec![2.0]);
    assert_eq!(result.error, vec![1.0]);
    assert_eq!(result.ncontrib, vec![2]);
}

#[test]
fn test_scenario_d_non_overlapping_object_is_flagged_and_excluded() {
    init_logging();
    let mut spectra = identical_objects(2, &[1.0, 2.0, 3.0]);
    let far: Vec<f64> = (0..3).map(|i| 3000.0 + i as f64).collect();
    spectra.push(ObjectSpectrum::new("far", far, vec![50.0; 3], vec![0.1; 3], 0.0, 9.0));

    let policy = WeightPolicy::uniform();
    let table =
        StackTable::build(unit_grid(3), &spectra, &policy, AggregateMode::Mean, (0.25, 0.75))
            .unwrap();
    assert_eq!(table.n_objects(), 3);
    assert!(table.count().row(2).iter().all(|&c| c == 0));
    assert_eq!(table.objects()[2].status, ObjectStatus::NoCoverage);
    assert_eq!(table.flagged_objects(), vec![(2, ObjectStatus::NoCoverage)]);

    let result = collapse(&table, AggregateMode::Mean, (0.25, 0.75)).unwrap();
    assert_eq!(result.ncontrib, vec![2, 2, 2]);
    assert_relative_eq!(result.flux[1], 2.0, epsilon = 1e-12);
}

#[test]
fn test_grid_alignment_of_every_record() {
    let spectra = common::absorber_sample(6, 11);
    let grid = stackciv::WavelengthGrid::from_config(&common::civ_grid_config()).unwrap();
    let policy = WeightPolicy::uniform();
    let table =
        StackTable::build(grid, &spectra, &policy, AggregateMode::Median, (0.16, 0.84)).unwrap();
    let n_pix = table.grid().len();
    for i in 0..table.n_objects() {
        let record = table.record(i);
        assert_eq!(record.flux.len(), n_pix);
        assert_eq!(record.variance.len(), n_pix);
        assert_eq!(record.weight.len(), n_pix);
        assert_eq!(record.count.len(), n_pix);
    }
}

#[test]
fn test_single_contributor_passthrough_in_both_modes() {
    let nan = f64::NAN;
    let rows = [
        (vec![1.25, nan], vec![0.04, 0.0], vec![1.0, 0.0]),
        (vec![nan, 2.0], vec![0.0, 0.09], vec![0.0, 3.0]),
    ];
    for mode in [AggregateMode::Mean, AggregateMode::Median] {
        let table = table_from_rows(&rows, mode);
        let result = collapse(&table, mode, (0.25, 0.75)).unwrap();
        assert_eq!(result.flux, vec![1.25, 2.0]);
        assert_relative_eq!(result.error[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(result.error[1], 0.3, epsilon = 1e-12);
        assert_eq!(result.quality, vec![PixelQuality::Single, PixelQuality::Single]);
    }
}

#[test]
fn test_collapse_is_idempotent() {
    let spectra = common::absorber_sample(5, 3);
    let grid = stackciv::WavelengthGrid::from_config(&common::civ_grid_config()).unwrap();
    let policy = WeightPolicy::uniform();
    let table =
        StackTable::build(grid, &spectra, &policy, AggregateMode::Median, (0.16, 0.84)).unwrap();
    let first = collapse(&table, AggregateMode::Median, (0.16, 0.84)).unwrap();
    let second = collapse(&table, AggregateMode::Median, (0.16, 0.84)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_weighted_mean_and_propagated_error() {
    let rows = [
        (vec![1.0], vec![0.04], vec![1.0]),
        (vec![2.0], vec![0.09], vec![2.0]),
        (vec![4.0], vec![0.16], vec![3.0]),
    ];
    let table = table_from_rows(&rows, AggregateMode::Mean);
    let result = collapse(&table, AggregateMode::Mean, (0.25, 0.75)).unwrap();

    let expected = (1.0 + 4.0 + 12.0) / 6.0;
    let expected_var = (0.04 + 4.0 * 0.09 + 9.0 * 0.16) / 36.0;
    assert_relative_eq!(result.flux[0], expected, epsilon = 1e-12);
    assert_relative_eq!(result.error[0].powi(2), expected_var, epsilon = 1e-12);
    assert_eq!(result.weight, vec![6.0]);
}

#[test]
fn test_weighted_median_of_odd_distinct_set_is_middle_value() {
    let rows: Vec<_> = [5.0, 1.0, 3.0, 9.0, 7.0]
        .iter()
        .map(|&f| (vec![f], vec![0.01], vec![1.0]))
        .collect();
    let table = table_from_rows(&rows, AggregateMode::Median);
    let result = collapse(&table, AggregateMode::Median, (0.25, 0.75)).unwrap();
    assert_eq!(result.flux, vec![5.0]);
    assert_eq!(result.error, vec![2.0]);
}

#[test]
fn test_stack_records_provenance_on_table() {
    let rows = [(vec![1.0], vec![0.01], vec![1.0]), (vec![2.0], vec![0.01], vec![1.0])];
    let mut table = table_from_rows(&rows, AggregateMode::Mean);
    let result = stack(&mut table, AggregateMode::Median, Some((0.1, 0.9))).unwrap();
    assert_eq!(table.mode(), AggregateMode::Median);
    assert_eq!(table.percentile(), (0.1, 0.9));
    assert_eq!(result.metadata.mode, AggregateMode::Median);
    assert_eq!(result.metadata.n_objects, 2);
}
