//! GeoTIFF reading and writing through GDAL

use chrono::{DateTime, Utc};
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3};
use std::path::Path;

use crate::types::{
    BoundingBox, CoordinateSystem, GeoTransform, GridSpec, LandCoverRaster, PhaseError,
    PhaseRaster, PhaseResult, VegetationIndexRaster, METERS_PER_DEGREE, PHASE_NODATA,
};

fn read_grid(dataset: &Dataset) -> PhaseResult<GridSpec> {
    let geo_transform = dataset.geo_transform()?;
    let (width, height) = dataset.raster_size();

    let crs = match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
        Ok(code) => CoordinateSystem::from_epsg(code as u32),
        Err(e) => {
            log::warn!("No EPSG code on dataset ({}); assuming EPSG:4326", e);
            CoordinateSystem::Geographic
        }
    };

    Ok(GridSpec::new(GeoTransform::from_gdal(geo_transform), width, height, crs))
}

fn reshape<T>(data: Vec<T>, grid: &GridSpec) -> PhaseResult<Array2<T>> {
    Array2::from_shape_vec(grid.dim(), data)
        .map_err(|e| PhaseError::GridMismatch(format!("Failed to reshape band data: {}", e)))
}

/// Single-band class raster, e.g. an ESA WorldCover tile
pub fn read_land_cover<P: AsRef<Path>>(path: P) -> PhaseResult<LandCoverRaster> {
    log::info!("Reading land cover from: {}", path.as_ref().display());
    land_cover_from(&Dataset::open(path.as_ref())?)
}

/// Land cover on a grid in `crs`, warped onto `bounds` when the file is in another CRS
///
/// `None` when the file has no valid pixel inside `bounds`.
pub fn read_land_cover_within<P: AsRef<Path>>(
    path: P,
    bounds: &BoundingBox,
    crs: CoordinateSystem,
) -> PhaseResult<Option<LandCoverRaster>> {
    let dataset = Dataset::open(path.as_ref())?;
    let grid = read_grid(&dataset)?;

    if grid.crs == crs {
        if !grid.bounding_box().intersects(bounds) {
            return Ok(None);
        }
        log::info!("Reading land cover from: {}", path.as_ref().display());
        return land_cover_from(&dataset).map(Some);
    }

    let fill = dataset.rasterband(1)?.no_data_value().map_or(0, |v| v as u8);
    log::info!("🌐 Warping land cover {} from {} to {}", path.as_ref().display(), grid.crs, crs);
    let raster = land_cover_from(&warp::<u8>(&dataset, &grid, bounds, crs, fill)?)?;
    Ok(raster.classes.iter().any(|&v| v != fill).then_some(raster))
}

fn land_cover_from(dataset: &Dataset) -> PhaseResult<LandCoverRaster> {
    let grid = read_grid(dataset)?;
    let (width, height) = (grid.width, grid.height);

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value().map(|v| v as u8);
    let band_data = rasterband.read_as::<u8>((0, 0), (width, height), (width, height), None)?;

    log::debug!("Land cover size: {}x{}, nodata {:?}", width, height, nodata);
    Ok(LandCoverRaster::new(reshape(band_data.data, &grid)?, nodata, grid))
}

/// Two-band acquisition: band 1 raw NDVI, band 2 quality bitfield
pub fn read_vegetation_index<P: AsRef<Path>>(
    path: P,
    timestamp: DateTime<Utc>,
) -> PhaseResult<VegetationIndexRaster> {
    log::debug!("Reading acquisition {} from {}", timestamp.format("%Y-%m-%d"), path.as_ref().display());
    vegetation_index_from(&Dataset::open(path.as_ref())?, timestamp)
}

/// Acquisition on a grid in `crs`; files in another CRS are warped onto `bounds`
pub fn read_vegetation_index_within<P: AsRef<Path>>(
    path: P,
    timestamp: DateTime<Utc>,
    bounds: &BoundingBox,
    crs: CoordinateSystem,
) -> PhaseResult<VegetationIndexRaster> {
    let dataset = Dataset::open(path.as_ref())?;
    let grid = read_grid(&dataset)?;
    if grid.crs == crs {
        log::debug!("Reading acquisition {} from {}", timestamp.format("%Y-%m-%d"), path.as_ref().display());
        return vegetation_index_from(&dataset, timestamp);
    }

    // Wide enough for both the i16 index and the u16 bitfield
    let fill = dataset
        .rasterband(1)?
        .no_data_value()
        .map_or(i16::MIN as i32, |v| v as i32);
    log::info!("🌐 Warping acquisition {} from {} to {}", path.as_ref().display(), grid.crs, crs);
    vegetation_index_from(&warp::<i32>(&dataset, &grid, bounds, crs, fill)?, timestamp)
}

fn vegetation_index_from(dataset: &Dataset, timestamp: DateTime<Utc>) -> PhaseResult<VegetationIndexRaster> {
    let grid = read_grid(dataset)?;
    let (width, height) = (grid.width, grid.height);

    let ndvi_band = dataset.rasterband(1)?;
    let nodata = ndvi_band.no_data_value().map(|v| v as i16);
    let ndvi = ndvi_band.read_as::<i16>((0, 0), (width, height), (width, height), None)?;

    let quality_band = dataset.rasterband(2)?;
    let quality = quality_band.read_as::<u16>((0, 0), (width, height), (width, height), None)?;

    Ok(VegetationIndexRaster {
        timestamp,
        ndvi: reshape(ndvi.data, &grid)?,
        quality: reshape(quality.data, &grid)?,
        nodata,
        grid,
    })
}

/// Pixel size of `grid` in meters
fn resolution_m(grid: &GridSpec) -> f64 {
    let size = grid.transform.pixel_width.abs();
    match grid.crs {
        CoordinateSystem::Geographic => size * METERS_PER_DEGREE,
        CoordinateSystem::Projected { .. } => size,
    }
}

/// Nearest-neighbour warp of every band onto an in-memory grid covering `bounds` in `crs`
///
/// Target pixels the source does not cover keep `fill`, which is also set as no-data.
fn warp<T: GdalType + Copy + Into<f64>>(
    source: &Dataset,
    source_grid: &GridSpec,
    bounds: &BoundingBox,
    crs: CoordinateSystem,
    fill: T,
) -> PhaseResult<Dataset> {
    if bounds.is_empty() {
        return Err(PhaseError::GridMismatch("Cannot warp onto an empty extent".to_string()));
    }
    let target = GridSpec::covering(bounds, resolution_m(source_grid), crs);
    let (width, height) = (target.width, target.height);
    let bands = source.raster_count();

    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut warped = driver.create_with_band_type::<T, _>("", width as isize, height as isize, bands)?;
    warped.set_geo_transform(&target.transform.to_gdal())?;
    warped.set_spatial_ref(&SpatialRef::from_epsg(crs.epsg())?)?;

    for band in 1..=bands {
        let mut rasterband = warped.rasterband(band)?;
        rasterband.write((0, 0), (width, height), &Buffer::new((width, height), vec![fill; width * height]))?;
        rasterband.set_no_data_value(Some(fill.into()))?;
    }

    gdal::raster::reproject(source, &warped)?;
    log::debug!("Warped {}x{} -> {}x{} ({})", source_grid.width, source_grid.height, width, height, crs);
    Ok(warped)
}

fn create<T: GdalType, P: AsRef<Path>>(path: P, grid: &GridSpec, bands: usize) -> PhaseResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<T, _>(
        path.as_ref(),
        grid.width as isize,
        grid.height as isize,
        bands as isize,
    )?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(grid.crs.epsg())?)?;
    Ok(dataset)
}

/// Phase categories as a byte GeoTIFF with no-data 255
pub fn write_phase<P: AsRef<Path>>(raster: &PhaseRaster, path: P) -> PhaseResult<()> {
    let dataset = create::<u8, _>(path.as_ref(), &raster.grid, 1)?;
    let (width, height) = (raster.grid.width, raster.grid.height);

    let mut rasterband = dataset.rasterband(1)?;
    let buffer = Buffer::new((width, height), raster.phase.iter().cloned().collect());
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(PHASE_NODATA as f64))?;

    log::debug!("Phase raster written to {}", path.as_ref().display());
    Ok(())
}

/// Acquisition as a two-band GeoTIFF (raw index, quality bitfield), the layout the readers expect
pub fn write_vegetation_index<P: AsRef<Path>>(raster: &VegetationIndexRaster, path: P) -> PhaseResult<()> {
    let dataset = create::<i32, _>(path.as_ref(), &raster.grid, 2)?;
    let (width, height) = (raster.grid.width, raster.grid.height);

    let mut ndvi_band = dataset.rasterband(1)?;
    let buffer = Buffer::new((width, height), raster.ndvi.iter().map(|&v| v as i32).collect());
    ndvi_band.write((0, 0), (width, height), &buffer)?;
    ndvi_band.set_no_data_value(raster.nodata.map(f64::from))?;

    let mut quality_band = dataset.rasterband(2)?;
    let buffer = Buffer::new((width, height), raster.quality.iter().map(|&v| v as i32).collect());
    quality_band.write((0, 0), (width, height), &buffer)?;

    log::debug!("Acquisition written to {}", path.as_ref().display());
    Ok(())
}

/// Boolean mask as a byte GeoTIFF (1 = set)
pub fn write_mask<P: AsRef<Path>>(mask: &Array2<bool>, grid: &GridSpec, path: P) -> PhaseResult<()> {
    let dataset = create::<u8, _>(path.as_ref(), grid, 1)?;
    let (width, height) = (grid.width, grid.height);

    let mut rasterband = dataset.rasterband(1)?;
    let buffer = Buffer::new((width, height), mask.iter().map(|&v| v as u8).collect());
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(0.0))?;
    Ok(())
}

/// RGB frame of shape (rows, cols, 3) as a three-band byte GeoTIFF
pub fn write_rgb<P: AsRef<Path>>(frame: &Array3<u8>, grid: &GridSpec, path: P) -> PhaseResult<()> {
    if frame.dim() != (grid.height, grid.width, 3) {
        return Err(PhaseError::GridMismatch(format!(
            "Frame {:?} does not match grid {:?}",
            frame.dim(),
            grid.dim()
        )));
    }

    let dataset = create::<u8, _>(path.as_ref(), grid, 3)?;
    let (width, height) = (grid.width, grid.height);

    let channels = [
        (1, frame.index_axis(ndarray::Axis(2), 0)),
        (2, frame.index_axis(ndarray::Axis(2), 1)),
        (3, frame.index_axis(ndarray::Axis(2), 2)),
    ];
    for (band, channel) in channels {
        let mut rasterband = dataset.rasterband(band)?;
        let buffer = Buffer::new((width, height), channel.iter().cloned().collect());
        rasterband.write((0, 0), (width, height), &buffer)?;
    }

    log::debug!("RGB frame written to {}", path.as_ref().display());
    Ok(())
}
