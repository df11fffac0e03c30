//! Catalog of known absorption lines.

use serde::{Deserialize, Serialize};

/// Speed of light in km/s
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// |Δv| between two wavelengths, relative to the first, in km/s.
pub fn velocity_offset(reference: f64, wave: f64) -> f64 {
    SPEED_OF_LIGHT_KMS * (wave - reference).abs() / reference
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralLine {
    pub name: String,
    /// Rest wavelength in Ångström
    pub rest_wave: f64,
    /// Half-width (km/s) excluded from the continuum fit
    pub mask_velocity: f64,
    /// Half-width (km/s) integrated for the equivalent width
    pub ew_velocity: f64,
}

impl SpectralLine {
    pub fn new(name: impl Into<String>, rest_wave: f64) -> Self {
        Self {
            name: name.into(),
            rest_wave,
            mask_velocity: 500.0,
            ew_velocity: 250.0,
        }
    }

    pub fn with_mask_velocity(mut self, velocity: f64) -> Self {
        self.mask_velocity = velocity;
        self
    }

    pub fn with_ew_velocity(mut self, velocity: f64) -> Self {
        self.ew_velocity = velocity;
        self
    }

    /// True when `wave` lies inside the continuum mask of this line.
    pub fn masks(&self, wave: f64) -> bool {
        velocity_offset(self.rest_wave, wave) <= self.mask_velocity
    }
}

/// Known lines, kept sorted by rest wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineCatalog {
    lines: Vec<SpectralLine>,
}

impl Default for LineCatalog {
    fn default() -> Self {
        Self::rest_uv()
    }
}

impl LineCatalog {
    pub fn new(mut lines: Vec<SpectralLine>) -> Self {
        lines.sort_by(|a, b| a.rest_wave.total_cmp(&b.rest_wave));
        Self { lines }
    }

    /// Common rest-frame UV absorbers between Lyα and Mg II.
    pub fn rest_uv() -> Self {
        Self::new(vec![
            SpectralLine::new("Lya", 1215.6701)
                .with_mask_velocity(3000.0)
                .with_ew_velocity(1000.0),
            SpectralLine::new("NV 1238", 1238.821),
            SpectralLine::new("NV 1242", 1242.804),
            SpectralLine::new("SiII 1260", 1260.4221),
            SpectralLine::new("OI 1302", 1302.1685),
            SpectralLine::new("SiII 1304", 1304.3702),
            SpectralLine::new("CII 1334", 1334.5323),
            SpectralLine::new("SiIV 1393", 1393.7602),
            SpectralLine::new("SiIV 1402", 1402.7729),
            SpectralLine::new("SiII 1526", 1526.7070),
            SpectralLine::new("CIV 1548", 1548.204),
            SpectralLine::new("CIV 1550", 1550.781),
            SpectralLine::new("FeII 1608", 1608.4511),
            SpectralLine::new("AlII 1670", 1670.7886),
            SpectralLine::new("AlIII 1854", 1854.7184),
            SpectralLine::new("AlIII 1862", 1862.7910),
            SpectralLine::new("MgII 2796", 2796.354),
            SpectralLine::new("MgII 2803", 2803.531),
        ])
    }

    pub fn lines(&self) -> &[SpectralLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SpectralLine> {
        self.lines.iter().find(|l| l.name == name)
    }

    /// Catalog line closest to `wave` within `max_velocity` km/s.
    pub fn identify(&self, wave: f64, max_velocity: f64) -> Option<&SpectralLine> {
        self.lines
            .iter()
            .map(|l| (l, velocity_offset(l.rest_wave, wave)))
            .filter(|(_, dv)| *dv <= max_velocity)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(l, _)| l)
    }

    /// Neighbouring catalog lines separated by less than `max_velocity` km/s.
    pub fn close_pairs(&self, max_velocity: f64) -> Vec<(&SpectralLine, &SpectralLine)> {
        self.lines
            .windows(2)
            .filter(|w| velocity_offset(w[0].rest_wave, w[1].rest_wave) < max_velocity)
            .map(|w| (&w[0], &w[1]))
            .collect()
    }

    /// True when `wave` is masked by any line.
    pub fn masks(&self, wave: f64) -> bool {
        self.lines.iter().any(|l| l.masks(wave))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_sorted() {
        let catalog = LineCatalog::new(vec![
            SpectralLine::new("b", 2000.0),
            SpectralLine::new("a", 1000.0),
        ]);
        assert_eq!(catalog.lines()[0].name, "a");
    }

    #[test]
    fn test_close_pairs_are_doublets() {
        let catalog = LineCatalog::rest_uv();
        let names: Vec<(&str, &str)> = catalog
            .close_pairs(800.0)
            .iter()
            .map(|(a, b)| (a.name.as_str(), b.name.as_str()))
            .collect();
        assert!(names.contains(&("CIV 1548", "CIV 1550")));
        assert!(names.contains(&("OI 1302", "SiII 1304")));
        assert!(names.contains(&("MgII 2796", "MgII 2803")));
        assert!(!names.contains(&("SiIV 1393", "SiIV 1402")));
    }

    #[test]
    fn test_identify_nearest_within_velocity() {
        let catalog = LineCatalog::rest_uv();
        assert_eq!(catalog.identify(1548.5, 150.0).unwrap().name, "CIV 1548");
        assert_eq!(catalog.identify(1550.5, 150.0).unwrap().name, "CIV 1550");
        assert!(catalog.identify(1450.0, 150.0).is_none());
    }

    #[test]
    fn test_lya_mask_is_wide() {
        let catalog = LineCatalog::rest_uv();
        let lya = catalog.get("Lya").unwrap();
        assert!(lya.masks(1215.6701 * (1.0 + 2500.0 / SPEED_OF_LIGHT_KMS)));
        let civ = catalog.get("CIV 1548").unwrap();
        assert!(!civ.masks(1548.204 * (1.0 + 1000.0 / SPEED_OF_LIGHT_KMS)));
    }
}
