//! GeoJSON boundary layers (FAO GAUL style admin polygons)

use geo_types::{Geometry, MultiPolygon};
use geojson::{GeoJson, JsonObject};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

use crate::types::{CoordinateSystem, PhaseError, PhaseResult};

/// One administrative unit: attribute table row plus geometry
#[derive(Debug, Clone)]
pub struct BoundaryFeature {
    pub properties: JsonObject,
    pub geometry: MultiPolygon<f64>,
}

impl BoundaryFeature {
    /// String equality on an attribute; numbers and booleans compare by their JSON text
    pub fn property_equals(&self, field: &str, expected: &str) -> bool {
        match self.properties.get(field) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == expected,
            Some(Value::Bool(b)) => b.to_string() == expected,
            _ => false,
        }
    }
}

/// Queryable vector layer of administrative units
#[derive(Debug, Clone, Default)]
pub struct BoundaryLayer {
    pub features: Vec<BoundaryFeature>,
    /// CRS of every coordinate in the layer (EPSG:4326 unless a legacy `crs` member says otherwise)
    pub crs: CoordinateSystem,
}

impl BoundaryLayer {
    /// Read a FeatureCollection from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> PhaseResult<Self> {
        log::info!("Reading boundary layer from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_geojson_str(&text)
    }

    /// Parse a FeatureCollection of Polygon/MultiPolygon features
    pub fn from_geojson_str(text: &str) -> PhaseResult<Self> {
        let root: Value = serde_json::from_str(text)?;
        let collection = match GeoJson::from_json_value(root).map_err(|e| PhaseError::Boundary(e.to_string()))? {
            GeoJson::FeatureCollection(collection) => collection,
            _ => {
                return Err(PhaseError::Boundary(
                    "Expected a GeoJSON FeatureCollection".to_string(),
                ))
            }
        };

        let crs = match collection.foreign_members.as_ref().and_then(|m| m.get("crs")) {
            Some(member) => named_crs(member)?,
            None => CoordinateSystem::Geographic,
        };

        let mut features = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let geometry = match feature.geometry {
                Some(geometry) => to_multi_polygon(geometry)
                    .map_err(|e| PhaseError::Boundary(format!("Feature {}: {}", i, e)))?,
                None => MultiPolygon::new(Vec::new()),
            };
            features.push(BoundaryFeature {
                properties: feature.properties.unwrap_or_default(),
                geometry,
            });
        }

        log::debug!("Loaded {} boundary features ({})", features.len(), crs);
        Ok(Self { features, crs })
    }

    /// Declare the CRS of a layer whose file carries none
    pub fn with_crs(mut self, crs: CoordinateSystem) -> Self {
        self.crs = crs;
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn to_multi_polygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>, String> {
    match Geometry::<f64>::try_from(geometry).map_err(|e| e.to_string())? {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(polygons) => Ok(polygons),
        _ => Err("only Polygon and MultiPolygon geometries are supported".to_string()),
    }
}

/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32644"}}`
fn named_crs(member: &Value) -> PhaseResult<CoordinateSystem> {
    let name = member
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .ok_or_else(|| PhaseError::Boundary("crs member has no properties.name".to_string()))?;

    if name.ends_with("CRS84") {
        return Ok(CoordinateSystem::Geographic);
    }
    let epsg = Regex::new(r"EPSG:+(\d+)$")
        .map_err(|e| PhaseError::Config(format!("Regex error: {}", e)))?
        .captures(name)
        .and_then(|c| c[1].parse::<u32>().ok())
        .ok_or_else(|| PhaseError::Boundary(format!("Unsupported crs name '{}'", name)))?;
    Ok(CoordinateSystem::from_epsg(epsg))
}
