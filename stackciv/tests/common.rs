//! Common utilities for stackciv integration tests

#![allow(dead_code)]

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use stackciv::{
    AggregateMode, GridConfig, ObjectMeta, ObjectRecord, ObjectSpectrum, ObjectStatus, StackConfig,
    StackTable, WavelengthGrid, WeightPolicy,
};

pub const SIII_1526: f64 = 1526.7070;
pub const CIV_1548: f64 = 1548.204;
pub const CIV_1550: f64 = 1550.781;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Rest-frame grid around SiII 1526 and the CIV doublet.
pub fn civ_grid_config() -> GridConfig {
    GridConfig {
        wave_min: 1450.0,
        wave_max: 1650.0,
        log_pixscale: 1.0e-4,
    }
}

pub fn civ_config() -> StackConfig {
    StackConfig {
        grid: civ_grid_config(),
        ..StackConfig::default()
    }
}

pub fn true_continuum(rest_wave: f64) -> f64 {
    1.0 + 0.001 * (rest_wave - 1500.0)
}

/// Parameters for one synthetic CIV absorber
#[derive(Debug, Clone)]
pub struct AbsorberParams {
    pub redshift: f64,
    /// Central depth of CIV 1548; CIV 1550 gets half of it
    pub civ_depth: f64,
    pub siii_depth: f64,
    /// Gaussian line width in rest-frame Ångström
    pub width: f64,
    pub noise_sigma: f64,
    pub seed: u64,
}

impl AbsorberParams {
    pub fn new(redshift: f64, civ_depth: f64, seed: u64) -> Self {
        Self {
            redshift,
            civ_depth,
            siii_depth: 0.3,
            width: 0.4,
            noise_sigma: 0.02,
            seed,
        }
    }
}

fn gaussian(w: f64, centre: f64, depth: f64, width: f64) -> f64 {
    depth * (-0.5 * ((w - centre) / width).powi(2)).exp()
}

/// Noiseless rest-frame absorption profile on `rest_wave`.
pub fn absorber_profile(rest_wave: &[f64], params: &AbsorberParams) -> Vec<f64> {
    rest_wave
        .iter()
        .map(|&w| {
            let tau = gaussian(w, SIII_1526, params.siii_depth, params.width)
                + gaussian(w, CIV_1548, params.civ_depth, params.width)
                + gaussian(w, CIV_1550, 0.5 * params.civ_depth, params.width);
            true_continuum(w) * (1.0 - tau)
        })
        .collect()
}

/// Observed-frame spectrum of one absorber with Gaussian noise. The observed
/// pixels are log-linear but offset from the stacking grid.
pub fn synthetic_absorber(id: &str, covariate: f64, params: &AbsorberParams) -> ObjectSpectrum {
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let noise = Normal::new(0.0, params.noise_sigma).unwrap();
    let scale = 1.0 + params.redshift;

    let log_start = (1430.0 * scale).log10() + 0.37e-4;
    let n = ((1670.0f64 / 1430.0).log10() / 1.0e-4) as usize;
    let wave: Vec<f64> = (0..n).map(|i| 10f64.powf(log_start + i as f64 * 1.0e-4)).collect();
    let rest: Vec<f64> = wave.iter().map(|w| w / scale).collect();

    let flux = absorber_profile(&rest, params)
        .into_iter()
        .map(|f| f + noise.sample(&mut rng))
        .collect();
    let sigma = vec![params.noise_sigma; wave.len()];
    ObjectSpectrum::new(id, wave, flux, sigma, params.redshift, covariate)
}

/// `n` absorbers with CIV depth rising with the covariate.
pub fn absorber_sample(n: usize, seed: u64) -> Vec<ObjectSpectrum> {
    (0..n)
        .map(|i| {
            let covariate = 0.5 + 0.1 * i as f64;
            let redshift = 1.6 + 0.05 * i as f64;
            let params = AbsorberParams::new(redshift, 0.3 + 0.02 * i as f64, seed + i as u64);
            synthetic_absorber(&format!("abs{i:03}"), covariate, &params)
        })
        .collect()
}

/// Explicit grid `1500, 1501, ...` with `n_pixels` pixels.
pub fn unit_grid(n_pixels: usize) -> WavelengthGrid {
    WavelengthGrid::from_wavelengths((0..n_pixels).map(|i| 1500.0 + i as f64).collect()).unwrap()
}

/// Table with hand-written rows; NaN flux marks an empty pixel.
pub fn table_from_rows(rows: &[(Vec<f64>, Vec<f64>, Vec<f64>)], mode: AggregateMode) -> StackTable {
    let grid = unit_grid(rows[0].0.len());
    let mut table = StackTable::new(grid, &WeightPolicy::uniform(), mode, (0.25, 0.75));
    for (i, (flux, variance, weight)) in rows.iter().enumerate() {
        let count = flux.iter().map(|f| if f.is_nan() { 0 } else { 1 }).collect();
        table
            .push(ObjectRecord {
                meta: ObjectMeta {
                    id: format!("row{i}"),
                    covariate: i as f64,
                    redshift: 2.0,
                    completeness: vec![],
                    status: ObjectStatus::Ok,
                },
                flux: flux.clone(),
                variance: variance.clone(),
                weight: weight.clone(),
                count,
            })
            .unwrap();
    }
    table
}
