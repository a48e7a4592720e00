use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::types::{PhaseError, PhaseRaster, PhaseResult, ProcessedRaster, PHASE_NODATA};

/// Breakpoint table mapping vegetation-index values to ordinal phases.
///
/// For ascending breakpoints `[t1, .., tn]` a valid value `v` gets
/// `below_lowest_category` when `v < t1`, otherwise the number of breakpoints
/// `<= v` (so `1..=n`). NaN input maps to `PHASE_NODATA`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseScheme {
    pub breakpoints: Vec<f32>,
    pub below_lowest_category: u8,
}

impl Default for PhaseScheme {
    fn default() -> Self {
        Self::with_bare_soil()
    }
}

impl PhaseScheme {
    /// Create a validated scheme
    pub fn new(breakpoints: Vec<f32>, below_lowest_category: u8) -> PhaseResult<Self> {
        let scheme = Self {
            breakpoints,
            below_lowest_category,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// No data/bare soil (0), initial growth (1), transplanting (2), heading (3), maturity (4)
    pub fn with_bare_soil() -> Self {
        Self {
            breakpoints: vec![0.2, 0.4, 0.6, 0.8],
            below_lowest_category: 0,
        }
    }

    /// Every valid value lands in 1..=4; values under 0.4 count as initial growth
    pub fn without_bare_soil() -> Self {
        Self {
            breakpoints: vec![-1.0, 0.4, 0.6, 0.8],
            below_lowest_category: 0,
        }
    }

    /// `[1, 2, .., n]`: maps phase codes `0..=n` onto themselves
    pub fn identity(n: u8) -> PhaseResult<Self> {
        Self::new((1..=n).map(f32::from).collect(), 0)
    }

    /// Breakpoints must be finite, strictly ascending and fit in the phase codes below 255
    pub fn validate(&self) -> PhaseResult<()> {
        if self.breakpoints.is_empty() {
            return Err(PhaseError::InvalidBreakpoints(
                "breakpoint list is empty".to_string(),
            ));
        }
        if self.breakpoints.len() >= PHASE_NODATA as usize {
            return Err(PhaseError::InvalidBreakpoints(format!(
                "{} breakpoints exceed the {} available phase codes",
                self.breakpoints.len(),
                PHASE_NODATA - 1
            )));
        }
        if let Some(bad) = self.breakpoints.iter().find(|t| !t.is_finite()) {
            return Err(PhaseError::InvalidBreakpoints(format!(
                "breakpoint {} is not finite",
                bad
            )));
        }
        if let Some(pair) = self.breakpoints.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PhaseError::InvalidBreakpoints(format!(
                "breakpoints must be strictly ascending ({} >= {})",
                pair[0], pair[1]
            )));
        }
        if self.below_lowest_category == PHASE_NODATA {
            return Err(PhaseError::InvalidBreakpoints(format!(
                "category {} is reserved for no-data",
                PHASE_NODATA
            )));
        }
        Ok(())
    }

    /// Number of categories at or above the lowest breakpoint
    pub fn category_count(&self) -> u8 {
        self.breakpoints.len() as u8
    }

    /// Whether valid NDVI (>= -1) can land in a bare-soil category 0 below the first breakpoint
    pub fn has_bare_soil_class(&self) -> bool {
        self.below_lowest_category == 0 && self.breakpoints.first().map_or(false, |&t| t > -1.0)
    }

    /// Category for one scaled NDVI value
    #[inline]
    pub fn categorize(&self, value: f32) -> u8 {
        if value.is_nan() {
            return PHASE_NODATA;
        }
        match self.breakpoints.partition_point(|&t| t <= value) {
            0 => self.below_lowest_category,
            n => n as u8,
        }
    }
}

/// Buckets processed rasters into growth phases
#[derive(Debug, Clone)]
pub struct PhaseClassifier {
    scheme: PhaseScheme,
}

impl PhaseClassifier {
    /// Create a new classifier for `scheme`
    pub fn new(scheme: PhaseScheme) -> PhaseResult<Self> {
        scheme.validate()?;
        Ok(Self { scheme })
    }

    /// Active breakpoint scheme
    pub fn scheme(&self) -> &PhaseScheme {
        &self.scheme
    }

    /// Classify a single processed raster
    pub fn classify_raster(&self, raster: &ProcessedRaster) -> PhaseRaster {
        PhaseRaster {
            timestamp: raster.timestamp,
            phase: raster.ndvi.mapv(|v| self.scheme.categorize(v)),
            grid: raster.grid,
        }
    }

    /// Classify every raster, keeping order and timestamps
    pub fn classify(&self, series: &[ProcessedRaster]) -> PhaseResult<Vec<PhaseRaster>> {
        if series.is_empty() {
            return Err(PhaseError::EmptySeries(
                "No processed rasters to classify".to_string(),
            ));
        }

        log::info!(
            "Classifying {} rasters with breakpoints {:?}",
            series.len(),
            self.scheme.breakpoints
        );

        #[cfg(feature = "parallel")]
        let phases = series.par_iter().map(|r| self.classify_raster(r)).collect();
        #[cfg(not(feature = "parallel"))]
        let phases = series.iter().map(|r| self.classify_raster(r)).collect();

        Ok(phases)
    }

    /// Run already-classified codes back through the scheme; no-data stays no-data
    pub fn reclassify(&self, raster: &PhaseRaster) -> PhaseRaster {
        PhaseRaster {
            timestamp: raster.timestamp,
            phase: raster.phase.mapv(|p| {
                if p == PHASE_NODATA {
                    PHASE_NODATA
                } else {
                    self.scheme.categorize(f32::from(p))
                }
            }),
            grid: raster.grid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_values() {
        let scheme = PhaseScheme::with_bare_soil();

        assert_eq!(scheme.categorize(0.35), 1);
        assert_eq!(scheme.categorize(0.05), 0);
        assert_eq!(scheme.categorize(0.85), 4);
        assert_eq!(scheme.categorize(0.45), 2);
        assert_eq!(scheme.categorize(0.2), 1);
        assert_eq!(scheme.categorize(-0.3), 0);
        assert_eq!(scheme.categorize(f32::NAN), PHASE_NODATA);
    }

    #[test]
    fn test_without_bare_soil() {
        let scheme = PhaseScheme::without_bare_soil();

        assert_eq!(scheme.categorize(-0.2), 1);
        assert_eq!(scheme.categorize(0.1), 1);
        assert_eq!(scheme.categorize(0.5), 2);
        assert_eq!(scheme.categorize(0.7), 3);
        assert_eq!(scheme.categorize(0.95), 4);
    }

    #[test]
    fn test_configurable_below_category() {
        let scheme = PhaseScheme::new(vec![0.0, 0.5], 9).unwrap();
        assert_eq!(scheme.categorize(-0.5), 9);
        assert_eq!(scheme.categorize(0.0), 1);
        assert_eq!(scheme.categorize(0.7), 2);
    }

    #[test]
    fn test_monotonic() {
        let scheme = PhaseScheme::new(vec![-0.5, 0.1, 0.3, 0.35, 0.9], 0).unwrap();
        let values: Vec<f32> = (-120..=120).map(|i| i as f32 / 100.0).collect();

        for pair in values.windows(2) {
            assert!(scheme.categorize(pair[0]) <= scheme.categorize(pair[1]));
        }
    }

    #[test]
    fn test_invalid_breakpoints() {
        assert!(matches!(PhaseScheme::new(vec![], 0), Err(PhaseError::InvalidBreakpoints(_))));
        assert!(PhaseScheme::new(vec![0.4, 0.2], 0).is_err());
        assert!(PhaseScheme::new(vec![0.2, 0.2], 0).is_err());
        assert!(PhaseScheme::new(vec![0.2, f32::NAN], 0).is_err());
        assert!(PhaseScheme::new(vec![0.2], PHASE_NODATA).is_err());
    }

    #[test]
    fn test_identity_scheme() {
        let scheme = PhaseScheme::identity(4).unwrap();
        for code in 0..=4u8 {
            assert_eq!(scheme.categorize(f32::from(code)), code);
        }
    }

    #[test]
    fn test_bare_soil_class() {
        assert!(PhaseScheme::with_bare_soil().has_bare_soil_class());
        assert!(!PhaseScheme::without_bare_soil().has_bare_soil_class());
        assert!(!PhaseScheme::new(vec![0.2, 0.4], 7).unwrap().has_bare_soil_class());
        assert!(!PhaseScheme::new(vec![-1.5, 0.4], 0).unwrap().has_bare_soil_class());
    }

    #[test]
    fn test_reclassify_identity_is_noop() {
        use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
        use chrono::{TimeZone, Utc};
        use ndarray::array;

        let raster = PhaseRaster {
            timestamp: Utc.with_ymd_and_hms(2020, 6, 25, 0, 0, 0).unwrap(),
            phase: array![[0, 1, 2], [3, 4, PHASE_NODATA]],
            grid: GridSpec::new(
                GeoTransform::north_up(81.3, 20.9, 0.0025, 0.0025),
                3,
                2,
                CoordinateSystem::Geographic,
            ),
        };

        let classifier = PhaseClassifier::new(PhaseScheme::identity(4).unwrap()).unwrap();
        assert_eq!(classifier.reclassify(&raster), raster);

        // A coarser scheme folds codes but keeps no-data
        let coarse = PhaseClassifier::new(PhaseScheme::new(vec![1.0, 3.0], 0).unwrap()).unwrap();
        let folded = coarse.reclassify(&raster);
        assert_eq!(folded.phase, array![[0, 1, 1], [2, 2, PHASE_NODATA]]);
        assert_eq!(folded.timestamp, raster.timestamp);
    }
}
