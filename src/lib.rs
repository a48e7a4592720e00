//! cropphase: cropland NDVI growth-phase classification
//!
//! Resolves an administrative boundary, derives a sparse cropland mask from
//! land cover, masks and scales a vegetation-index time series, and buckets
//! every pixel into a growth phase per acquisition.

pub mod core;
pub mod io;
pub mod pipeline;
pub mod render;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, CapacitySaturation, CoordinateSystem, CroplandMask, GeoTransform, GridSpec,
    LandCoverRaster, PhaseError, PhaseRaster, PhaseResult, PhaseSeries, ProcessedRaster,
    ResampledCroplandMask, VegetationIndexRaster, PHASE_NODATA,
};

pub use crate::core::{
    AdminFilter, BoundaryResolver, CroplandMaskBuilder, CroplandMaskParams, PhaseClassifier,
    PhaseExtent, PhaseScheme, Region, VegetationSeriesParams, VegetationSeriesProcessor,
};
pub use io::{BoundaryLayer, ImageryCatalog, InMemoryCatalog};
pub use pipeline::{CropPhasePipeline, PipelineConfig, PipelineRun};

#[cfg(feature = "python")]
mod python {
    use ndarray::Array2;
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::prelude::*;

    use crate::core::{CroplandMaskBuilder, CroplandMaskParams, PhaseScheme, ThinningSeed};
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec, LandCoverRaster, PhaseError};

    fn to_py_err(e: PhaseError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    /// Unit-pixel grid for arrays handed over without georeferencing
    fn pixel_grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            GeoTransform::north_up(0.0, rows as f64, 1.0, 1.0),
            cols,
            rows,
            CoordinateSystem::Geographic,
        )
    }

    /// Bucket a scaled NDVI array into phase codes (NaN -> 255)
    #[pyfunction]
    #[pyo3(signature = (ndvi, breakpoints = None, below_lowest_category = 0))]
    fn classify_phases<'py>(
        py: Python<'py>,
        ndvi: PyReadonlyArray2<'py, f32>,
        breakpoints: Option<Vec<f32>>,
        below_lowest_category: u8,
    ) -> PyResult<&'py PyArray2<u8>> {
        let scheme = match breakpoints {
            Some(b) => PhaseScheme::new(b, below_lowest_category).map_err(to_py_err)?,
            None => PhaseScheme::with_bare_soil(),
        };
        let phases: Array2<u8> = ndvi.as_array().mapv(|v| scheme.categorize(v));
        Ok(phases.into_pyarray(py))
    }

    /// Cropland mask from a land-cover class array
    #[pyfunction]
    #[pyo3(signature = (classes, keep_probability = 0.2, min_patch_pixels = 150, seed = 42))]
    fn build_cropland_mask<'py>(
        py: Python<'py>,
        classes: PyReadonlyArray2<'py, u8>,
        keep_probability: f64,
        min_patch_pixels: usize,
        seed: u64,
    ) -> PyResult<&'py PyArray2<bool>> {
        let classes = classes.as_array().to_owned();
        let (rows, cols) = classes.dim();
        let land_cover = LandCoverRaster::new(classes, None, pixel_grid(rows, cols));

        let params = CroplandMaskParams {
            keep_probability,
            min_patch_pixels,
            seed: ThinningSeed::Fixed(seed),
            ..Default::default()
        };
        let mask = CroplandMaskBuilder::new(params)
            .build(&land_cover)
            .map_err(to_py_err)?;
        Ok(mask.mask.into_pyarray(py))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(classify_phases, m)?)?;
        m.add_function(wrap_pyfunction!(build_cropland_mask, m)?)?;
        Ok(())
    }
}
