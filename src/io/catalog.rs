//! Narrow interface to the imagery/boundary platform

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::collections::HashMap;

use crate::io::geojson::BoundaryLayer;
use crate::types::{
    BoundingBox, CoordinateSystem, LandCoverRaster, PhaseError, PhaseResult, VegetationIndexRaster,
};

/// Source of boundaries, land cover and vegetation-index time series
///
/// `bounds` are expressed in `crs`; every raster returned is on a grid in `crs`.
pub trait ImageryCatalog {
    /// Administrative boundary layer for `dataset`
    fn boundaries(&self, dataset: &str) -> PhaseResult<BoundaryLayer>;

    /// First land-cover snapshot of `dataset` intersecting `bounds`
    fn land_cover(
        &self,
        dataset: &str,
        bounds: &BoundingBox,
        crs: CoordinateSystem,
    ) -> PhaseResult<LandCoverRaster>;

    /// Acquisitions intersecting `bounds` with `start <= timestamp < end`, oldest first
    fn vegetation_series(
        &self,
        dataset: &str,
        bounds: &BoundingBox,
        crs: CoordinateSystem,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PhaseResult<Vec<VegetationIndexRaster>>;
}

fn crs_mismatch(what: &str, found: CoordinateSystem, expected: CoordinateSystem) -> PhaseError {
    PhaseError::GridMismatch(format!(
        "{} is in {} but the region is in {}; reproject it first",
        what, found, expected
    ))
}

/// Apply the date and bounds filters and order by acquisition time
///
/// Bounds are only comparable within one CRS, so any acquisition in the
/// period whose grid is not in `crs` is a `GridMismatch`.
pub fn filter_series(
    rasters: impl IntoIterator<Item = VegetationIndexRaster>,
    bounds: &BoundingBox,
    crs: CoordinateSystem,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PhaseResult<Vec<VegetationIndexRaster>> {
    let in_period: Vec<_> = rasters
        .into_iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .collect();

    if let Some(r) = in_period.iter().find(|r| r.grid.crs != crs) {
        return Err(crs_mismatch(
            &format!("Acquisition {}", r.timestamp.format("%Y-%m-%d")),
            r.grid.crs,
            crs,
        ));
    }

    let mut selected: Vec<_> = in_period
        .into_iter()
        .filter(|r| r.grid.bounding_box().intersects(bounds))
        .collect();

    if selected.is_empty() {
        return Err(PhaseError::EmptySeries(format!(
            "No acquisitions between {} and {} intersect the region",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )));
    }

    selected.sort_by_key(|r| r.timestamp);
    log::info!(
        "Selected {} acquisitions between {} and {}",
        selected.len(),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    Ok(selected)
}

/// Extracts acquisition dates from product file names
#[derive(Debug, Clone)]
pub struct AcquisitionDateParser {
    /// MODIS style `A2020177` (year + day of year)
    day_of_year: Regex,
    /// `2020-06-25`
    iso: Regex,
    /// `20200625`
    compact: Regex,
}

impl AcquisitionDateParser {
    /// Compile the three supported date patterns
    pub fn new() -> PhaseResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PhaseError::Config(format!("Regex error: {}", e)))
        };
        Ok(Self {
            day_of_year: compile(r"(?:^|[^0-9A-Za-z])A(\d{4})(\d{3})(?:[^0-9]|$)")?,
            iso: compile(r"(\d{4})-(\d{2})-(\d{2})")?,
            compact: compile(r"(?:^|[^0-9])(\d{4})(\d{2})(\d{2})(?:[^0-9]|$)")?,
        })
    }

    /// Acquisition date at midnight UTC, if the name carries one
    pub fn parse(&self, name: &str) -> Option<DateTime<Utc>> {
        let num = |s: &str| s.parse::<u32>().ok();

        let date = if let Some(c) = self.day_of_year.captures(name) {
            NaiveDate::from_yo_opt(num(&c[1])? as i32, num(&c[2])?)
        } else if let Some(c) = self.iso.captures(name) {
            NaiveDate::from_ymd_opt(num(&c[1])? as i32, num(&c[2])?, num(&c[3])?)
        } else if let Some(c) = self.compact.captures(name) {
            NaiveDate::from_ymd_opt(num(&c[1])? as i32, num(&c[2])?, num(&c[3])?)
        } else {
            None
        };

        Some(Utc.from_utc_datetime(&date?.and_hms_opt(0, 0, 0)?))
    }
}

/// Catalog over rasters held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    boundaries: HashMap<String, BoundaryLayer>,
    land_cover: HashMap<String, Vec<LandCoverRaster>>,
    series: HashMap<String, Vec<VegetationIndexRaster>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the boundary layer of `dataset`
    pub fn with_boundaries(mut self, dataset: &str, layer: BoundaryLayer) -> Self {
        self.boundaries.insert(dataset.to_string(), layer);
        self
    }

    /// Add a land-cover snapshot to `dataset`
    pub fn with_land_cover(mut self, dataset: &str, raster: LandCoverRaster) -> Self {
        self.land_cover.entry(dataset.to_string()).or_default().push(raster);
        self
    }

    /// Add an acquisition to `dataset`; order does not matter
    pub fn with_acquisition(mut self, dataset: &str, raster: VegetationIndexRaster) -> Self {
        self.series.entry(dataset.to_string()).or_default().push(raster);
        self
    }
}

fn unknown(dataset: &str) -> PhaseError {
    PhaseError::InvalidInput(format!("Unknown dataset '{}'", dataset))
}

impl ImageryCatalog for InMemoryCatalog {
    fn boundaries(&self, dataset: &str) -> PhaseResult<BoundaryLayer> {
        self.boundaries.get(dataset).cloned().ok_or_else(|| unknown(dataset))
    }

    fn land_cover(
        &self,
        dataset: &str,
        bounds: &BoundingBox,
        crs: CoordinateSystem,
    ) -> PhaseResult<LandCoverRaster> {
        let rasters = self.land_cover.get(dataset).ok_or_else(|| unknown(dataset))?;

        if let Some(raster) = rasters
            .iter()
            .find(|r| r.grid.crs == crs && r.grid.bounding_box().intersects(bounds))
        {
            return Ok(raster.clone());
        }
        match rasters.iter().find(|r| r.grid.crs != crs) {
            Some(r) => Err(crs_mismatch(&format!("Land cover '{}'", dataset), r.grid.crs, crs)),
            None => Err(PhaseError::EmptySeries(format!(
                "No land cover in '{}' intersects the region",
                dataset
            ))),
        }
    }

    fn vegetation_series(
        &self,
        dataset: &str,
        bounds: &BoundingBox,
        crs: CoordinateSystem,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PhaseResult<Vec<VegetationIndexRaster>> {
        let rasters = self.series.get(dataset).ok_or_else(|| unknown(dataset))?;
        filter_series(rasters.iter().cloned(), bounds, crs, start, end)
    }
}

#[cfg(feature = "gdal")]
pub use self::gdal_catalog::GdalCatalog;

#[cfg(feature = "gdal")]
mod gdal_catalog {
    use super::*;
    use crate::io::geotiff;
    use std::path::{Path, PathBuf};

    /// Catalog over a directory tree `<root>/<dataset>/*.tif`; boundaries at `<root>/<dataset>.geojson`
    ///
    /// Rasters in another CRS than the region are warped onto it (nearest neighbour).
    #[derive(Debug, Clone)]
    pub struct GdalCatalog {
        root: PathBuf,
        dates: AcquisitionDateParser,
    }

    impl GdalCatalog {
        /// Create a catalog rooted at an existing directory
        pub fn new<P: AsRef<Path>>(root: P) -> PhaseResult<Self> {
            let root = root.as_ref().to_path_buf();
            if !root.is_dir() {
                return Err(PhaseError::Config(format!(
                    "Catalog root {} is not a directory",
                    root.display()
                )));
            }
            Ok(Self {
                root,
                dates: AcquisitionDateParser::new()?,
            })
        }

        fn rasters(&self, dataset: &str) -> PhaseResult<Vec<PathBuf>> {
            let dir = self.root.join(dataset);
            let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
                        Some("tif") | Some("tiff")
                    )
                })
                .collect();
            paths.sort();
            log::debug!("Found {} rasters under {}", paths.len(), dir.display());
            Ok(paths)
        }
    }

    impl ImageryCatalog for GdalCatalog {
        fn boundaries(&self, dataset: &str) -> PhaseResult<BoundaryLayer> {
            BoundaryLayer::from_path(self.root.join(format!("{}.geojson", dataset)))
        }

        fn land_cover(
            &self,
            dataset: &str,
            bounds: &BoundingBox,
            crs: CoordinateSystem,
        ) -> PhaseResult<LandCoverRaster> {
            for path in self.rasters(dataset)? {
                if let Some(raster) = geotiff::read_land_cover_within(&path, bounds, crs)? {
                    log::info!("Using land cover {}", path.display());
                    return Ok(raster);
                }
            }
            Err(PhaseError::EmptySeries(format!(
                "No land cover in '{}' intersects the region",
                dataset
            )))
        }

        fn vegetation_series(
            &self,
            dataset: &str,
            bounds: &BoundingBox,
            crs: CoordinateSystem,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> PhaseResult<Vec<VegetationIndexRaster>> {
            let mut rasters = Vec::new();
            for path in self.rasters(dataset)? {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let Some(timestamp) = self.dates.parse(name) else {
                    log::warn!("Skipping {}: no acquisition date in file name", path.display());
                    continue;
                };
                if timestamp < start || timestamp >= end {
                    continue;
                }
                rasters.push(geotiff::read_vegetation_index_within(&path, timestamp, bounds, crs)?);
            }
            filter_series(rasters, bounds, crs, start, end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use ndarray::Array2;

    fn acquisition(month: u32, x0: f64) -> VegetationIndexRaster {
        VegetationIndexRaster {
            timestamp: Utc.with_ymd_and_hms(2020, month, 1, 0, 0, 0).unwrap(),
            ndvi: Array2::zeros((2, 2)),
            quality: Array2::zeros((2, 2)),
            nodata: None,
            grid: GridSpec::new(
                GeoTransform::north_up(x0, 2.0, 1.0, 1.0),
                2,
                2,
                CoordinateSystem::Geographic,
            ),
        }
    }

    #[test]
    fn test_date_parser() {
        let parser = AcquisitionDateParser::new().unwrap();

        assert_eq!(
            parser.parse("MOD13Q1.A2020177.h25v07.006.tif"),
            Some(Utc.with_ymd_and_hms(2020, 6, 25, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parser.parse("ndvi_2020-06-25.tif"),
            Some(Utc.with_ymd_and_hms(2020, 6, 25, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parser.parse("ndvi_20200625.tif"),
            Some(Utc.with_ymd_and_hms(2020, 6, 25, 0, 0, 0).unwrap())
        );
        assert_eq!(parser.parse("ndvi_2020-13-25.tif"), None);
        assert_eq!(parser.parse("landcover.tif"), None);
    }

    #[test]
    fn test_series_filters_and_orders() {
        let catalog = InMemoryCatalog::new()
            .with_acquisition("MODIS", acquisition(12, 0.0))
            .with_acquisition("MODIS", acquisition(3, 0.0))
            .with_acquisition("MODIS", acquisition(5, 100.0))
            .with_acquisition("MODIS", acquisition(1, 0.0));

        let bounds = BoundingBox::new(0.5, 0.5, 1.5, 1.5);
        let series = catalog
            .vegetation_series(
                "MODIS",
                &bounds,
                CoordinateSystem::Geographic,
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();

        let months: Vec<u32> = series.iter().map(|r| chrono::Datelike::month(&r.timestamp)).collect();
        assert_eq!(months, vec![1, 3]);
    }

    #[test]
    fn test_empty_selection_and_unknown_dataset() {
        let catalog = InMemoryCatalog::new().with_acquisition("MODIS", acquisition(3, 0.0));
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap();

        assert!(matches!(
            catalog.vegetation_series("MODIS", &bounds, CoordinateSystem::Geographic, start, end),
            Err(PhaseError::EmptySeries(_))
        ));
        assert!(matches!(
            catalog.vegetation_series("S2", &bounds, CoordinateSystem::Geographic, start, end),
            Err(PhaseError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_projected_acquisition_against_geographic_region() {
        let utm = CoordinateSystem::Projected { epsg: 32644 };
        let mut projected = acquisition(3, 550_000.0);
        projected.grid.crs = utm;
        let catalog = InMemoryCatalog::new()
            .with_acquisition("MODIS", acquisition(2, 0.0))
            .with_acquisition("MODIS", projected);

        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap();

        // Disjoint bounds would otherwise read as an empty series
        assert!(matches!(
            catalog.vegetation_series("MODIS", &bounds, CoordinateSystem::Geographic, start, end),
            Err(PhaseError::GridMismatch(msg)) if msg.starts_with("Acquisition 2020-03-01")
        ));

        // Outside the period the projected acquisition is never looked at
        let march = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
        let series = catalog
            .vegetation_series("MODIS", &bounds, CoordinateSystem::Geographic, start, march)
            .unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_land_cover_crs_checked() {
        let grid = GridSpec::new(
            GeoTransform::north_up(550_000.0, 2_291_000.0, 10.0, 10.0),
            2,
            2,
            CoordinateSystem::Projected { epsg: 32644 },
        );
        let catalog = InMemoryCatalog::new()
            .with_land_cover("WorldCover", LandCoverRaster::new(Array2::from_elem((2, 2), 40), None, grid));
        let bounds = BoundingBox::new(81.4, 20.6, 81.6, 20.8);

        assert!(matches!(
            catalog.land_cover("WorldCover", &bounds, CoordinateSystem::Geographic),
            Err(PhaseError::GridMismatch(_))
        ));
        let utm_bounds = BoundingBox::new(550_000.0, 2_290_000.0, 551_000.0, 2_291_000.0);
        assert!(catalog
            .land_cover("WorldCover", &utm_bounds, CoordinateSystem::Projected { epsg: 32644 })
            .is_ok());
    }
}
