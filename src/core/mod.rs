//! Core cropland and phase processing modules

pub mod boundary;
pub mod connectivity;
pub mod cropland_mask;
pub mod phase_classifier;
pub mod phase_composite;
pub mod resample;
pub mod vegetation_series;

// Re-export main types
pub use boundary::{AdminFilter, BoundaryResolver, Region};
pub use connectivity::{connected_pixel_count, label_components, ComponentLabels, Connectivity, PatchCounts};
pub use cropland_mask::{CroplandMaskBuilder, CroplandMaskParams, ThinningSeed, WORLDCOVER_CROPLAND};
pub use phase_classifier::{PhaseClassifier, PhaseScheme};
pub use phase_composite::{region_max, PhaseExtent};
pub use resample::{resample_mask, resample_nearest};
pub use vegetation_series::{VegetationSeriesParams, VegetationSeriesProcessor, MODIS_NDVI_SCALE};
