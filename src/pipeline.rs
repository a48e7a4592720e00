//! End-to-end cropland phase pipeline and its configuration

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{
    resample_mask, AdminFilter, BoundaryResolver, CroplandMaskBuilder, CroplandMaskParams,
    PhaseClassifier, PhaseExtent, PhaseScheme, Region, VegetationSeriesParams,
    VegetationSeriesProcessor,
};
use crate::io::ImageryCatalog;
use crate::types::{CroplandMask, PhaseError, PhaseResult, PhaseSeries, ResampledCroplandMask};

/// Complete run configuration; defaults reproduce the Dhamtari 2020 analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub boundary_dataset: String,
    pub admin_filters: Vec<AdminFilter>,
    pub land_cover_dataset: String,
    pub vegetation_dataset: String,
    /// First day of the analysis period (inclusive)
    pub start_date: NaiveDate,
    /// End of the analysis period (exclusive)
    pub end_date: NaiveDate,
    pub mask: CroplandMaskParams,
    pub series: VegetationSeriesParams,
    pub phases: PhaseScheme,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            boundary_dataset: "FAO/GAUL/2015/level2".to_string(),
            admin_filters: vec![
                AdminFilter::new("ADM1_NAME", "Chhattisgarh"),
                AdminFilter::new("ADM2_NAME", "Dhamtari"),
            ],
            land_cover_dataset: "ESA/WorldCover/v200".to_string(),
            vegetation_dataset: "MODIS/006/MOD13Q1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or_default(),
            mask: CroplandMaskParams::default(),
            series: VegetationSeriesParams::default(),
            phases: PhaseScheme::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PhaseResult<Self> {
        log::info!("Loading pipeline configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> PhaseResult<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the period, the filters and every stage's parameters
    pub fn validate(&self) -> PhaseResult<()> {
        if self.start_date >= self.end_date {
            return Err(PhaseError::Config(format!(
                "Analysis period is empty: {} .. {}",
                self.start_date, self.end_date
            )));
        }
        if self.admin_filters.is_empty() {
            return Err(PhaseError::Config(
                "At least one administrative filter is required".to_string(),
            ));
        }
        self.mask.validate()?;
        self.series.validate()?;
        self.phases.validate()?;
        Ok(())
    }

    /// Period bounds at midnight UTC, `[start, end)`
    pub fn period(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::default()));
        (midnight(self.start_date), midnight(self.end_date))
    }
}

/// Everything a run produces, for callers that also render the mask or boundary
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub region: Region,
    pub cropland: CroplandMask,
    pub analysis_mask: ResampledCroplandMask,
    pub series: PhaseSeries,
}

/// Boundary -> cropland mask -> processed series -> phases
#[derive(Debug, Clone)]
pub struct CropPhasePipeline {
    config: PipelineConfig,
}

impl CropPhasePipeline {
    /// Create a pipeline from a validated configuration
    pub fn new(config: PipelineConfig) -> PhaseResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve the configured administrative filters against the catalog's boundaries
    pub fn resolve_region<C: ImageryCatalog>(&self, catalog: &C) -> PhaseResult<Region> {
        let layer = catalog.boundaries(&self.config.boundary_dataset)?;
        BoundaryResolver::new(layer).resolve(&self.config.admin_filters)
    }

    /// Full run keeping the intermediate region and masks
    pub fn execute<C: ImageryCatalog>(&self, catalog: &C) -> PhaseResult<PipelineRun> {
        let cfg = &self.config;
        log::info!("🚀 Starting crop phase pipeline");

        let region = self.resolve_region(catalog)?;
        if region.crs != cfg.series.target_crs {
            return Err(PhaseError::GridMismatch(format!(
                "Boundary '{}' is in {} but the analysis grid is in {}",
                region.name(),
                region.crs,
                cfg.series.target_crs
            )));
        }
        let bounds = region.bounding_box();

        let land_cover = catalog.land_cover(&cfg.land_cover_dataset, &bounds, region.crs)?;
        let cropland = CroplandMaskBuilder::new(cfg.mask.clone()).build_within(&land_cover, &region)?;

        let analysis_grid = cfg.series.analysis_grid(&bounds);
        let analysis_mask = resample_mask(&cropland, &analysis_grid)?;

        let (start, end) = cfg.period();
        let acquisitions = catalog.vegetation_series(&cfg.vegetation_dataset, &bounds, region.crs, start, end)?;

        let processor = VegetationSeriesProcessor::new(cfg.series.clone(), analysis_mask.clone())?;
        let processed = processor.process_all(&acquisitions)?;

        let classifier = PhaseClassifier::new(cfg.phases.clone())?;
        let rasters = classifier.classify(&processed)?;

        let series = PhaseSeries {
            rasters,
            warnings: cropland.saturation.clone(),
        };
        if !series.warnings.is_empty() {
            log::warn!(
                "⚠️  {} capacity ceilings reached; patch-size filtering is approximate",
                series.warnings.len()
            );
        }
        log::info!("✅ Pipeline complete: {} phase rasters for '{}'", series.len(), region.name());

        Ok(PipelineRun {
            region,
            cropland,
            analysis_mask,
            series,
        })
    }

    /// Time-ordered phase rasters (animation variant)
    pub fn run<C: ImageryCatalog>(&self, catalog: &C) -> PhaseResult<PhaseSeries> {
        Ok(self.execute(catalog)?.series)
    }

    /// Maximum-extent snapshot per phase category (snapshot variant)
    pub fn run_extents<C: ImageryCatalog>(&self, catalog: &C) -> PhaseResult<Vec<PhaseExtent>> {
        let run = self.execute(catalog)?;
        extents_for(&run, &self.config.phases)
    }
}

/// Extents for categories `1..=n` of `scheme`, reduced over the region
pub fn extents_for(run: &PipelineRun, scheme: &PhaseScheme) -> PhaseResult<Vec<PhaseExtent>> {
    let region_mask = run.region.rasterize(&run.analysis_mask.grid);
    PhaseExtent::compute_all(&run.series.rasters, 1..=scheme.category_count(), Some(&region_mask))
}
