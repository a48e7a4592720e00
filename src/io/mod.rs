//! I/O modules for boundaries, imagery catalogs and GeoTIFF rasters

pub mod catalog;
pub mod geojson;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use catalog::{filter_series, AcquisitionDateParser, ImageryCatalog, InMemoryCatalog};
#[cfg(feature = "gdal")]
pub use catalog::GdalCatalog;
pub use geojson::{BoundaryFeature, BoundaryLayer};
