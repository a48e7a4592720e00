use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::resample::resample_nearest;
use crate::types::{
    BoundingBox, CoordinateSystem, GridSpec, PhaseError, PhaseResult, ProcessedRaster,
    ResampledCroplandMask, VegetationIndexRaster,
};

/// MOD13Q1 NDVI scale factor
pub const MODIS_NDVI_SCALE: f64 = 0.0001;

/// Vegetation-index series processing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VegetationSeriesParams {
    /// Bit of the quality field that must be 0 for a pixel to pass
    pub quality_bit_index: u8,
    /// Multiplier from raw integers into index units
    pub scale_factor: f64,
    /// Analysis grid spacing in meters
    pub target_resolution_m: f64,
    /// Analysis grid CRS
    pub target_crs: CoordinateSystem,
}

impl Default for VegetationSeriesParams {
    fn default() -> Self {
        Self {
            quality_bit_index: 0,
            scale_factor: MODIS_NDVI_SCALE,
            target_resolution_m: 250.0,
            target_crs: CoordinateSystem::Geographic,
        }
    }
}

impl VegetationSeriesParams {
    /// Check the QA bit index, scale factor and target resolution
    pub fn validate(&self) -> PhaseResult<()> {
        if self.quality_bit_index >= 16 {
            return Err(PhaseError::InvalidInput(format!(
                "Quality bit index {} is outside the 16-bit quality field",
                self.quality_bit_index
            )));
        }
        if !(self.target_resolution_m.is_finite() && self.target_resolution_m > 0.0) {
            return Err(PhaseError::InvalidInput(format!(
                "Target resolution must be positive, got {}",
                self.target_resolution_m
            )));
        }
        if !self.scale_factor.is_finite() {
            return Err(PhaseError::InvalidInput("Scale factor must be finite".to_string()));
        }
        Ok(())
    }

    /// Analysis grid covering `bounds`
    pub fn analysis_grid(&self, bounds: &BoundingBox) -> GridSpec {
        GridSpec::covering(bounds, self.target_resolution_m, self.target_crs)
    }
}

/// Scales, quality-filters, resamples and cropland-masks each acquisition
#[derive(Debug, Clone)]
pub struct VegetationSeriesProcessor {
    params: VegetationSeriesParams,
    mask: ResampledCroplandMask,
}

impl VegetationSeriesProcessor {
    /// Create a new series processor over a resampled cropland mask
    pub fn new(params: VegetationSeriesParams, mask: ResampledCroplandMask) -> PhaseResult<Self> {
        params.validate()?;
        Ok(Self { params, mask })
    }

    /// Grid every processed raster is resampled onto
    pub fn analysis_grid(&self) -> &GridSpec {
        &self.mask.grid
    }

    /// Process one acquisition; the timestamp is carried over unchanged
    pub fn process_raster(&self, raster: &VegetationIndexRaster) -> PhaseResult<ProcessedRaster> {
        if raster.ndvi.dim() != raster.grid.dim() || raster.quality.dim() != raster.grid.dim() {
            return Err(PhaseError::GridMismatch(format!(
                "Acquisition {} bands {:?}/{:?} do not match grid {:?}",
                raster.timestamp,
                raster.ndvi.dim(),
                raster.quality.dim(),
                raster.grid.dim()
            )));
        }

        let bit = self.params.quality_bit_index;
        let scale = self.params.scale_factor;
        let nodata = raster.nodata;

        let mut scaled = Array2::<f32>::from_elem(raster.ndvi.dim(), f32::NAN);
        Zip::from(&mut scaled)
            .and(&raster.ndvi)
            .and(&raster.quality)
            .for_each(|out, &raw, &qa| {
                let good = (qa >> bit) & 1 == 0;
                if good && nodata != Some(raw) {
                    *out = (raw as f64 * scale) as f32;
                }
            });

        let mut ndvi = resample_nearest(&scaled, &raster.grid, &self.mask.grid, f32::NAN)?;
        Zip::from(&mut ndvi).and(&self.mask.mask).for_each(|v, &crop| {
            if !crop {
                *v = f32::NAN;
            }
        });

        let processed = ProcessedRaster {
            timestamp: raster.timestamp,
            ndvi,
            grid: self.mask.grid,
        };
        log::debug!(
            "Processed acquisition {}: {} valid pixels",
            processed.timestamp.format("%Y-%m-%d"),
            processed.valid_pixels()
        );
        Ok(processed)
    }

    /// Lazy, order-preserving map over the series
    pub fn process<'a>(
        &'a self,
        series: &'a [VegetationIndexRaster],
    ) -> PhaseResult<impl Iterator<Item = PhaseResult<ProcessedRaster>> + 'a> {
        if series.is_empty() {
            return Err(PhaseError::EmptySeries(
                "No vegetation index acquisitions to process".to_string(),
            ));
        }
        Ok(series.iter().map(move |raster| self.process_raster(raster)))
    }

    /// Process the whole series; acquisitions are independent and run in parallel
    pub fn process_all(&self, series: &[VegetationIndexRaster]) -> PhaseResult<Vec<ProcessedRaster>> {
        if series.is_empty() {
            return Err(PhaseError::EmptySeries(
                "No vegetation index acquisitions to process".to_string(),
            ));
        }

        log::info!(
            "🛰️  Processing {} acquisitions onto {}x{} analysis grid",
            series.len(),
            self.mask.grid.width,
            self.mask.grid.height
        );

        #[cfg(feature = "parallel")]
        let processed: PhaseResult<Vec<ProcessedRaster>> =
            series.par_iter().map(|r| self.process_raster(r)).collect();
        #[cfg(not(feature = "parallel"))]
        let processed: PhaseResult<Vec<ProcessedRaster>> =
            series.iter().map(|r| self.process_raster(r)).collect();

        let processed = processed?;
        let valid: usize = processed.iter().map(ProcessedRaster::valid_pixels).sum();
        log::info!("✅ Series processed: {} valid pixel observations", valid);
        Ok(processed)
    }
}
