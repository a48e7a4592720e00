use geo::{BoundingRect, Contains};
use geo_types::{MultiPolygon, Point};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::io::geojson::BoundaryLayer;
use crate::types::{
    BoundingBox, CoordinateSystem, GridSpec, LandCoverRaster, PhaseError, PhaseResult,
};

/// Equality constraint on one administrative attribute (e.g., `ADM2_NAME == "Dhamtari"`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminFilter {
    pub field: String,
    pub value: String,
}

impl AdminFilter {
    /// Create a new `field == value` filter
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for AdminFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} == '{}'", self.field, self.value)
    }
}

/// Resolved administrative region
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub filters: Vec<AdminFilter>,
    pub geometry: MultiPolygon<f64>,
    /// CRS of the geometry coordinates
    pub crs: CoordinateSystem,
    bbox: BoundingBox,
}

impl Region {
    /// Create a region, caching the geometry's bounding box
    pub fn new(filters: Vec<AdminFilter>, geometry: MultiPolygon<f64>, crs: CoordinateSystem) -> Self {
        let bbox = geometry
            .bounding_rect()
            .map(BoundingBox::from)
            .unwrap_or_else(BoundingBox::empty);
        Self {
            filters,
            geometry,
            crs,
            bbox,
        }
    }

    /// Bounding box of the geometry in `crs` units
    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    /// Strict interior test; points on the outline are outside
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.bbox.contains_point(x, y) && self.geometry.contains(&Point::new(x, y))
    }

    /// Pixels of `grid` whose centre lies inside the region
    pub fn rasterize(&self, grid: &GridSpec) -> Array2<bool> {
        let mut inside = Array2::from_elem(grid.dim(), false);
        if !self.bbox.intersects(&grid.bounding_box()) {
            return inside;
        }

        let test = |(row, col): (usize, usize), out: &mut bool| {
            let (x, y) = grid.pixel_center(row, col);
            *out = self.contains(x, y);
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut inside).par_for_each(test);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut inside).for_each(test);

        inside
    }

    /// Land cover with every pixel outside the region set to no-data
    pub fn clip_land_cover(&self, land_cover: &LandCoverRaster) -> LandCoverRaster {
        let inside = self.rasterize(&land_cover.grid);
        let nodata = land_cover.nodata.unwrap_or(0);
        let mut classes = land_cover.classes.clone();
        Zip::from(&mut classes)
            .and(&inside)
            .for_each(|v, &keep| {
                if !keep {
                    *v = nodata;
                }
            });
        LandCoverRaster::new(classes, Some(nodata), land_cover.grid)
    }

    /// Label for logs and layer names, e.g. "Chhattisgarh / Dhamtari"
    pub fn name(&self) -> String {
        self.filters
            .iter()
            .map(|f| f.value.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Resolves administrative name filters to exactly one region
#[derive(Debug, Clone)]
pub struct BoundaryResolver {
    layer: BoundaryLayer,
}

impl BoundaryResolver {
    /// Create a resolver over one boundary layer
    pub fn new(layer: BoundaryLayer) -> Self {
        Self { layer }
    }

    /// AND all filters together; exactly one feature must match
    pub fn resolve(&self, filters: &[AdminFilter]) -> PhaseResult<Region> {
        if filters.is_empty() {
            return Err(PhaseError::Resolution(
                "At least one administrative filter is required".to_string(),
            ));
        }

        let description = filters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" AND ");
        log::debug!("Resolving boundary: {}", description);

        let mut matches = self
            .layer
            .features
            .iter()
            .filter(|feature| filters.iter().all(|f| feature.property_equals(&f.field, &f.value)));

        let feature = match (matches.next(), matches.next()) {
            (Some(feature), None) => feature,
            (None, _) => {
                return Err(PhaseError::Resolution(format!(
                    "No boundary matches {}",
                    description
                )))
            }
            (Some(_), Some(_)) => {
                let count = 2 + matches.count();
                return Err(PhaseError::Resolution(format!(
                    "{} boundaries match {}; expected exactly one",
                    count, description
                )));
            }
        };

        if feature.geometry.0.is_empty() {
            return Err(PhaseError::Resolution(format!(
                "Boundary matching {} has an empty geometry",
                description
            )));
        }

        let region = Region::new(filters.to_vec(), feature.geometry.clone(), self.layer.crs);
        log::info!(
            "📍 Resolved boundary '{}' ({} polygon(s), {})",
            region.name(),
            region.geometry.0.len(),
            region.crs
        );
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};

    const GAUL: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature",
             "properties": {"ADM1_NAME": "Chhattisgarh", "ADM2_NAME": "Dhamtari"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
            {"type": "Feature",
             "properties": {"ADM1_NAME": "Chhattisgarh", "ADM2_NAME": "Raipur"},
             "geometry": {"type": "Polygon", "coordinates": [[[10,0],[20,0],[20,10],[10,10],[10,0]]]}},
            {"type": "Feature",
             "properties": {"ADM1_NAME": "Odisha", "ADM2_NAME": "Raipur"},
             "geometry": {"type": "Polygon", "coordinates": [[[30,0],[40,0],[40,10],[30,10],[30,0]]]}}
        ]
    }"#;

    fn resolver() -> BoundaryResolver {
        BoundaryResolver::new(BoundaryLayer::from_geojson_str(GAUL).unwrap())
    }

    #[test]
    fn test_resolve_unique() {
        let region = resolver()
            .resolve(&[
                AdminFilter::new("ADM1_NAME", "Chhattisgarh"),
                AdminFilter::new("ADM2_NAME", "Dhamtari"),
            ])
            .unwrap();

        assert_eq!(region.name(), "Chhattisgarh / Dhamtari");
        assert!(region.contains(5.0, 5.0));
        assert!(!region.contains(15.0, 5.0));
        assert_eq!(region.bounding_box(), BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_resolve_ambiguous() {
        let err = resolver()
            .resolve(&[AdminFilter::new("ADM2_NAME", "Raipur")])
            .unwrap_err();
        assert!(matches!(err, PhaseError::Resolution(msg) if msg.starts_with("2 boundaries")));
    }

    #[test]
    fn test_resolve_missing() {
        let err = resolver()
            .resolve(&[AdminFilter::new("ADM2_NAME", "Bastar")])
            .unwrap_err();
        assert!(matches!(err, PhaseError::Resolution(_)));
        assert!(resolver().resolve(&[]).is_err());
    }

    #[test]
    fn test_clip_land_cover() {
        let region = resolver()
            .resolve(&[AdminFilter::new("ADM2_NAME", "Dhamtari")])
            .unwrap();
        let grid = GridSpec::new(
            GeoTransform::north_up(0.0, 10.0, 5.0, 5.0),
            4,
            2,
            CoordinateSystem::Geographic,
        );
        let cover = LandCoverRaster::new(Array2::from_elem((2, 4), 40), None, grid);
        let clipped = region.clip_land_cover(&cover);

        assert_eq!(clipped.nodata, Some(0));
        assert_eq!(clipped.classes.row(0).to_vec(), vec![40, 40, 0, 0]);
    }

    #[test]
    fn test_rasterize_with_hole() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"ADM2_NAME": "Dhamtari"},
             "geometry": {"type": "Polygon", "coordinates": [
                [[0,0],[20,0],[20,20],[0,20],[0,0]],
                [[5,5],[10,5],[10,10],[5,10],[5,5]]
             ]}}
        ]}"#;
        let layer = BoundaryLayer::from_geojson_str(text)
            .unwrap()
            .with_crs(CoordinateSystem::Projected { epsg: 32644 });
        let region = BoundaryResolver::new(layer)
            .resolve(&[AdminFilter::new("ADM2_NAME", "Dhamtari")])
            .unwrap();
        assert_eq!(region.crs.epsg(), 32644);

        let grid = GridSpec::new(
            GeoTransform::north_up(0.0, 30.0, 5.0, 5.0),
            6,
            6,
            CoordinateSystem::Projected { epsg: 32644 },
        );
        let mask = region.rasterize(&grid);

        // 4x4 cells inside the exterior minus the one hole cell at (x 7.5, y 7.5)
        assert_eq!(mask.iter().filter(|&&v| v).count(), 15);
        assert!(!mask[[4, 1]]);
        assert!(mask[[5, 0]] && mask[[2, 3]]);
        assert!(!mask[[0, 0]] && !mask[[5, 4]]);

        let far_away = GridSpec::new(
            GeoTransform::north_up(1000.0, 1000.0, 5.0, 5.0),
            2,
            2,
            CoordinateSystem::Projected { epsg: 32644 },
        );
        assert!(region.rasterize(&far_away).iter().all(|&v| !v));
    }
}
