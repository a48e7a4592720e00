#![cfg(feature = "gdal")]

use chrono::{TimeZone, Utc};
use ndarray::{array, Array2, Array3};

use cropphase::io::{geotiff, GdalCatalog, ImageryCatalog};
use cropphase::types::{
    BoundingBox, CoordinateSystem, GeoTransform, GridSpec, PhaseError, PhaseRaster,
    VegetationIndexRaster, PHASE_NODATA,
};

fn grid() -> GridSpec {
    GridSpec::new(
        GeoTransform::north_up(81.3, 20.9, 0.0025, 0.0025),
        3,
        2,
        CoordinateSystem::Geographic,
    )
}

#[test]
fn test_phase_raster_written_with_georeferencing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phase.tif");

    let raster = PhaseRaster {
        timestamp: Utc.with_ymd_and_hms(2020, 8, 12, 0, 0, 0).unwrap(),
        phase: array![[0, 1, 2], [3, 4, PHASE_NODATA]],
        grid: grid(),
    };
    geotiff::write_phase(&raster, &path).unwrap();

    // Any byte raster reads back through the land-cover reader
    let reread = geotiff::read_land_cover(&path).unwrap();
    assert_eq!(reread.classes, raster.phase);
    assert_eq!(reread.nodata, Some(PHASE_NODATA));
    assert_eq!(reread.grid.crs, CoordinateSystem::Geographic);
    assert!(reread.grid.matches(&raster.grid));
}

#[test]
fn test_rgb_frame_shape_checked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.tif");

    let wrong = Array3::<u8>::zeros((3, 3, 3));
    assert!(geotiff::write_rgb(&wrong, &grid(), &path).is_err());

    let frame = Array3::<u8>::from_elem((2, 3, 3), 200);
    geotiff::write_rgb(&frame, &grid(), &path).unwrap();
    assert!(path.exists());
}

#[test]
fn test_catalog_warps_projected_acquisition_onto_region_crs() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let dataset_dir = dir.path().join("MOD13Q1");
    std::fs::create_dir_all(&dataset_dir).unwrap();

    // 2.5 km square in UTM 44N, near 81.48E 20.70N
    let utm = GridSpec::new(
        GeoTransform::north_up(550_000.0, 2_291_000.0, 250.0, 250.0),
        10,
        10,
        CoordinateSystem::Projected { epsg: 32644 },
    );
    let acquisition = VegetationIndexRaster {
        timestamp: Utc.with_ymd_and_hms(2020, 3, 5, 0, 0, 0).unwrap(),
        ndvi: Array2::from_elem((10, 10), 4500),
        quality: Array2::zeros((10, 10)),
        nodata: Some(-3000),
        grid: utm,
    };
    geotiff::write_vegetation_index(&acquisition, dataset_dir.join("ndvi_2020-03-05.tif")).unwrap();

    let catalog = GdalCatalog::new(dir.path()).unwrap();
    let bounds = BoundingBox::new(81.40, 20.60, 81.60, 20.80);
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap();

    let series = catalog
        .vegetation_series("MOD13Q1", &bounds, CoordinateSystem::Geographic, start, end)
        .unwrap();
    assert_eq!(series.len(), 1);

    let warped = &series[0];
    assert_eq!(warped.grid.crs, CoordinateSystem::Geographic);
    assert_eq!(warped.nodata, Some(-3000));
    assert!(warped.ndvi.iter().any(|&v| v == 4500));
    assert!(warped.ndvi.iter().any(|&v| v == -3000));

    // Same file, same CRS: read unchanged
    let utm_bounds = BoundingBox::new(549_000.0, 2_288_000.0, 553_000.0, 2_292_000.0);
    let native = catalog
        .vegetation_series("MOD13Q1", &utm_bounds, utm.crs, start, end)
        .unwrap();
    assert!(native[0].grid.matches(&utm));

    let empty = catalog.vegetation_series("MOD13Q1", &bounds, CoordinateSystem::Geographic, end, end);
    assert!(matches!(empty, Err(PhaseError::EmptySeries(_))));
}
