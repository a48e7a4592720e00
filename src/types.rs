use chrono::{DateTime, Utc};
use geo_types::Rect;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Phase value written for pixels that carry no valid vegetation index
pub const PHASE_NODATA: u8 = 255;

/// Approximate meters per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Coordinate reference system of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude) on WGS84, EPSG:4326
    Geographic,
    /// Projected coordinates in meters (e.g., UTM)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    /// EPSG code; geographic is 4326
    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Projected { epsg } => *epsg,
        }
    }

    /// Map EPSG:4326 to `Geographic`, anything else to `Projected`
    pub fn from_epsg(epsg: u32) -> Self {
        if epsg == 4326 {
            CoordinateSystem::Geographic
        } else {
            CoordinateSystem::Projected { epsg }
        }
    }
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        CoordinateSystem::Geographic
    }
}

impl std::fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Geospatial bounding box (map units of the owning CRS)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a bounding box from its corners
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Empty box that any point expands
    pub fn empty() -> Self {
        Self {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_lon > self.max_lon || self.min_lat > self.max_lat
    }

    /// Closed-interval overlap; empty boxes never intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_lon && x <= self.max_lon && y >= self.min_lat && y <= self.max_lat
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-or-rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Create from GDAL's six-coefficient array
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Six-coefficient array for `Dataset::set_geo_transform`
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// No rotation terms
    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (col, row) of a map coordinate; north-up transforms only
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }
}

/// Pixel grid shared by every raster of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub crs: CoordinateSystem,
}

impl GridSpec {
    /// Create a new grid specification
    pub fn new(transform: GeoTransform, width: usize, height: usize, crs: CoordinateSystem) -> Self {
        Self { transform, width, height, crs }
    }

    /// Grid covering `bounds` at `resolution_m` meters per pixel.
    ///
    /// Geographic grids convert the spacing to degrees at the box's central latitude.
    pub fn covering(bounds: &BoundingBox, resolution_m: f64, crs: CoordinateSystem) -> Self {
        let (pixel_size_x, pixel_size_y) = match crs {
            CoordinateSystem::Geographic => {
                let lat_center = (bounds.min_lat + bounds.max_lat) / 2.0;
                let meters_per_degree_lon = METERS_PER_DEGREE * lat_center.to_radians().cos();
                (
                    resolution_m / meters_per_degree_lon,
                    resolution_m / METERS_PER_DEGREE,
                )
            }
            CoordinateSystem::Projected { .. } => (resolution_m, resolution_m),
        };

        let width = ((bounds.max_lon - bounds.min_lon) / pixel_size_x).ceil().max(1.0) as usize;
        let height = ((bounds.max_lat - bounds.min_lat) / pixel_size_y).ceil().max(1.0) as usize;

        Self {
            transform: GeoTransform::north_up(bounds.min_lon, bounds.max_lat, pixel_size_x, pixel_size_y),
            width,
            height,
            crs,
        }
    }

    /// (rows, cols), matching `Array2::dim`
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Outer extent of the grid
    pub fn bounding_box(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.width as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.height as f64 * t.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// World coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_center(row, col)
    }

    /// Pixel containing a map coordinate, if it falls inside the grid
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.world_to_pixel(x, y);
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        if row < self.height && col < self.width {
            Some((row, col))
        } else {
            None
        }
    }

    /// Same CRS, size and transform (within floating tolerance)
    pub fn matches(&self, other: &GridSpec) -> bool {
        const TOL: f64 = 1e-9;
        let a = self.transform.to_gdal();
        let b = other.transform.to_gdal();
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= TOL * x.abs().max(1.0))
    }
}

/// Single-band categorical land-cover raster (e.g., ESA WorldCover at 10 m)
#[derive(Debug, Clone)]
pub struct LandCoverRaster {
    pub classes: Array2<u8>,
    pub nodata: Option<u8>,
    pub grid: GridSpec,
}

impl LandCoverRaster {
    /// Create a new land-cover raster
    pub fn new(classes: Array2<u8>, nodata: Option<u8>, grid: GridSpec) -> Self {
        Self { classes, nodata, grid }
    }

    pub fn is_valid(&self, value: u8) -> bool {
        self.nodata.map_or(true, |nd| value != nd)
    }
}

/// Boolean cropland mask at land-cover resolution (true = retained pixel)
#[derive(Debug, Clone)]
pub struct CroplandMask {
    pub mask: Array2<bool>,
    pub grid: GridSpec,
    /// Ceilings hit while labelling components and counting patches
    pub saturation: Vec<CapacitySaturation>,
}

impl CroplandMask {
    /// Number of retained cropland pixels
    pub fn retained_pixels(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
}

/// Cropland mask resampled onto the analysis grid
#[derive(Debug, Clone)]
pub struct ResampledCroplandMask {
    pub mask: Array2<bool>,
    pub grid: GridSpec,
}

/// Raw vegetation-index acquisition (e.g., one MOD13Q1 16-day composite)
#[derive(Debug, Clone)]
pub struct VegetationIndexRaster {
    pub timestamp: DateTime<Utc>,
    /// Raw integer index values, scaled into [-1, 1] during processing
    pub ndvi: Array2<i16>,
    /// Per-pixel quality/reliability bitfield
    pub quality: Array2<u16>,
    /// Raw fill value
    pub nodata: Option<i16>,
    pub grid: GridSpec,
}

/// Scaled, quality- and cropland-masked index on the analysis grid (NaN = masked)
#[derive(Debug, Clone)]
pub struct ProcessedRaster {
    pub timestamp: DateTime<Utc>,
    pub ndvi: Array2<f32>,
    pub grid: GridSpec,
}

impl ProcessedRaster {
    /// Pixels carrying a finite NDVI value
    pub fn valid_pixels(&self) -> usize {
        self.ndvi.iter().filter(|v| v.is_finite()).count()
    }
}

/// Ordinal growth-phase categories for one acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRaster {
    pub timestamp: DateTime<Utc>,
    /// Category per pixel; `PHASE_NODATA` where no valid value exists
    pub phase: Array2<u8>,
    pub grid: GridSpec,
}

impl PhaseRaster {
    /// Number of pixels in category `phase`
    pub fn count_of(&self, phase: u8) -> usize {
        self.phase.iter().filter(|&&p| p == phase).count()
    }
}

/// Time-ordered phase rasters plus the non-fatal warnings of the run
#[derive(Debug, Clone, Default)]
pub struct PhaseSeries {
    pub rasters: Vec<PhaseRaster>,
    pub warnings: Vec<CapacitySaturation>,
}

impl PhaseSeries {
    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhaseRaster> {
        self.rasters.iter()
    }

    /// Acquisition times in series order
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rasters.iter().map(|r| r.timestamp).collect()
    }
}

/// Which bounded computation hit its ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaturationStage {
    ComponentLabeling,
    PatchCount,
}

/// A connected group whose size reached a resource ceiling.
///
/// Counts inside the group are truncated, so downstream size filters are
/// less accurate there. Reported alongside results, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySaturation {
    pub stage: SaturationStage,
    /// Group label (component label, or patch index in scan order)
    pub label: u32,
    /// First pixel (row, col) of the group in scan order
    pub seed: (usize, usize),
    pub ceiling: usize,
}

impl std::fmt::Display for CapacitySaturation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} ceiling of {} pixels reached by group {} seeded at ({}, {})",
            self.stage, self.ceiling, self.label, self.seed.0, self.seed.1
        )
    }
}

/// Error types for crop phase processing
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Boundary resolution error: {0}")]
    Resolution(String),

    #[error("Empty series: {0}")]
    EmptySeries(String),

    #[error("Invalid breakpoints: {0}")]
    InvalidBreakpoints(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Invalid boundary data: {0}")]
    Boundary(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for crop phase operations
pub type PhaseResult<T> = Result<T, PhaseError>;
