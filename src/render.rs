//! Palette visualisation, boundary outlines and an owned display session

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::PhaseScheme;
use crate::types::{PhaseError, PhaseRaster, PhaseResult, PHASE_NODATA};

pub type Rgb = [u8; 3];

pub const WHITE: Rgb = [255, 255, 255];

/// Parse "#RRGGBB" (leading '#' optional)
pub fn parse_hex(color: &str) -> PhaseResult<Rgb> {
    let hex = color.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(PhaseError::InvalidInput(format!("Invalid colour '{}'", color)));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| PhaseError::InvalidInput(format!("Invalid colour '{}'", color)))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Linear palette stretched over `[min, max]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePalette {
    pub min: u8,
    pub max: u8,
    pub colors: Vec<String>,
    /// Colour for no-data pixels
    pub background: String,
}

impl PhasePalette {
    /// White bare soil (0) through dark green maturity (4)
    pub fn with_bare_soil() -> Self {
        Self {
            min: 0,
            max: 4,
            colors: ["#FFFFFF", "#FFD700", "#00FF00", "#32CD32", "#006400"]
                .map(String::from)
                .to_vec(),
            background: "#FFFFFF".to_string(),
        }
    }

    /// Categories 1..=4 only
    pub fn without_bare_soil() -> Self {
        Self {
            min: 1,
            max: 4,
            colors: ["#FFD700", "#00FF00", "#32CD32", "#006400"]
                .map(String::from)
                .to_vec(),
            background: "#FFFFFF".to_string(),
        }
    }

    fn resolve(&self) -> PhaseResult<(Vec<Rgb>, Rgb)> {
        if self.colors.is_empty() {
            return Err(PhaseError::InvalidInput("Palette has no colours".to_string()));
        }
        if self.min > self.max {
            return Err(PhaseError::InvalidInput(format!(
                "Palette min {} exceeds max {}",
                self.min, self.max
            )));
        }
        let colors = self.colors.iter().map(|c| parse_hex(c)).collect::<PhaseResult<Vec<_>>>()?;
        Ok((colors, parse_hex(&self.background)?))
    }
}

/// Palette index for `value`, clamped to the stretch range
fn palette_index(value: u8, min: u8, max: u8, len: usize) -> usize {
    if len == 1 || max == min {
        return 0;
    }
    let v = value.clamp(min, max);
    let t = f64::from(v - min) / f64::from(max - min);
    (t * (len - 1) as f64).round() as usize
}

/// Render phases as an RGB image of shape (rows, cols, 3)
pub fn visualize(raster: &PhaseRaster, palette: &PhasePalette) -> PhaseResult<Array3<u8>> {
    let (colors, background) = palette.resolve()?;
    let (rows, cols) = raster.phase.dim();

    Ok(Array3::from_shape_fn((rows, cols, 3), |(r, c, band)| {
        let p = raster.phase[[r, c]];
        if p == PHASE_NODATA {
            background[band]
        } else {
            colors[palette_index(p, palette.min, palette.max, colors.len())][band]
        }
    }))
}

/// Paint a one-pixel outline of `region` onto `frame`
pub fn paint_outline(frame: &mut Array3<u8>, region: &Array2<bool>, color: Rgb) -> PhaseResult<()> {
    let (rows, cols, bands) = frame.dim();
    if region.dim() != (rows, cols) || bands != 3 {
        return Err(PhaseError::GridMismatch(format!(
            "Frame {:?} does not match region mask {:?}",
            frame.dim(),
            region.dim()
        )));
    }

    for ((r, c), &inside) in region.indexed_iter() {
        if !inside {
            continue;
        }
        let edge = r == 0
            || c == 0
            || r + 1 == rows
            || c + 1 == cols
            || !region[[r - 1, c]]
            || !region[[r + 1, c]]
            || !region[[r, c - 1]]
            || !region[[r, c + 1]];
        if edge {
            for (band, &value) in color.iter().enumerate() {
                frame[[r, c, band]] = value;
            }
        }
    }
    Ok(())
}

/// Legend row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub color: String,
    pub label: String,
}

impl LegendEntry {
    fn new(color: &str, label: &str) -> Self {
        Self {
            color: color.to_string(),
            label: label.to_string(),
        }
    }
}

/// Legend of the five-class animation
pub fn legend_with_bare_soil() -> Vec<LegendEntry> {
    vec![
        LegendEntry::new("#FFFFFF", "No Data/Bare Soil"),
        LegendEntry::new("#FFD700", "Initial Growth (0.2-0.4)"),
        LegendEntry::new("#00FF00", "Transplanting (0.4-0.6)"),
        LegendEntry::new("#32CD32", "Heading (0.6-0.8)"),
        LegendEntry::new("#006400", "Maturity (>0.8)"),
    ]
}

/// Legend of the four-class extent snapshots
pub fn legend_without_bare_soil() -> Vec<LegendEntry> {
    legend_with_bare_soil().split_off(1)
}

const PHASE_NAMES: [&str; 4] = ["Initial Growth", "Transplanting", "Heading", "Maturity"];

/// Palette and legend for the categories `scheme` produces
///
/// The bare-soil colour is only used when valid NDVI can fall below the first
/// breakpoint. The two presets keep their published legends; other schemes get
/// labels built from their breakpoints.
pub fn presentation(scheme: &PhaseScheme) -> (PhasePalette, Vec<LegendEntry>) {
    let mut palette = if scheme.has_bare_soil_class() {
        PhasePalette::with_bare_soil()
    } else {
        PhasePalette::without_bare_soil()
    };
    palette.max = scheme.category_count().max(palette.min);

    let legend = if *scheme == PhaseScheme::with_bare_soil() {
        legend_with_bare_soil()
    } else if *scheme == PhaseScheme::without_bare_soil() {
        legend_without_bare_soil()
    } else {
        let t = &scheme.breakpoints;
        (palette.min..=palette.max)
            .map(|category| {
                let color = &palette.colors
                    [palette_index(category, palette.min, palette.max, palette.colors.len())];
                let label = match category {
                    0 => format!("No Data/Bare Soil (<{})", t[0]),
                    c => {
                        let i = usize::from(c) - 1;
                        let name = PHASE_NAMES
                            .get(i)
                            .map_or_else(|| format!("Phase {}", c), |n| n.to_string());
                        match t.get(i + 1) {
                            Some(upper) => format!("{} ({}-{})", name, t[i], upper),
                            None => format!("{} (>{})", name, t[i]),
                        }
                    }
                };
                LegendEntry::new(color, &label)
            })
            .collect()
    };
    (palette, legend)
}

/// Kind of content a display layer carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    /// Animation frame for one acquisition
    Frame { timestamp: DateTime<Utc> },
    /// Maximum-extent composite for one phase
    PhaseExtent { phase: u8, max_occurrence: Option<u32> },
    CroplandMask,
    Boundary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayLayer {
    pub name: String,
    pub kind: LayerKind,
    /// Where the rendered layer was written, if it was
    pub path: Option<String>,
}

/// Owned collection of layers and legend for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySession {
    pub title: String,
    pub frames_per_second: f64,
    pub layers: Vec<DisplayLayer>,
    pub legend: Vec<LegendEntry>,
}

impl DisplaySession {
    /// Create an empty session at the animation rate of 1.5 frames per second
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            frames_per_second: 1.5,
            layers: Vec::new(),
            legend: Vec::new(),
        }
    }

    /// Append a layer; later layers draw on top
    pub fn add_layer(&mut self, name: impl Into<String>, kind: LayerKind, path: Option<String>) {
        self.layers.push(DisplayLayer {
            name: name.into(),
            kind,
            path,
        });
    }

    /// Replace the legend
    pub fn set_legend(&mut self, legend: Vec<LegendEntry>) {
        self.legend = legend;
    }

    /// Animation frames in insertion order
    pub fn frames(&self) -> impl Iterator<Item = &DisplayLayer> {
        self.layers
            .iter()
            .filter(|l| matches!(l.kind, LayerKind::Frame { .. }))
    }

    /// Persist the session as a JSON manifest
    pub fn write_manifest<P: AsRef<Path>>(&self, path: P) -> PhaseResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("Display manifest written to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a manifest written by `write_manifest`
    pub fn read_manifest<P: AsRef<Path>>(path: P) -> PhaseResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use chrono::TimeZone;
    use ndarray::array;

    fn phase_raster(phase: Array2<u8>) -> PhaseRaster {
        let (h, w) = phase.dim();
        PhaseRaster {
            timestamp: Utc.with_ymd_and_hms(2020, 3, 5, 0, 0, 0).unwrap(),
            phase,
            grid: GridSpec::new(
                GeoTransform::north_up(0.0, h as f64, 1.0, 1.0),
                w,
                h,
                CoordinateSystem::Geographic,
            ),
        }
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#32CD32").unwrap(), [0x32, 0xCD, 0x32]);
        assert_eq!(parse_hex("006400").unwrap(), [0, 0x64, 0]);
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#GG0000").is_err());
    }

    #[test]
    fn test_visualize_bare_soil_palette() {
        let raster = phase_raster(array![[0, 1, 4, PHASE_NODATA]]);
        let rgb = visualize(&raster, &PhasePalette::with_bare_soil()).unwrap();

        assert_eq!(rgb.dim(), (1, 4, 3));
        assert_eq!(rgb.slice(ndarray::s![0, 0, ..]).to_vec(), vec![255, 255, 255]);
        assert_eq!(rgb.slice(ndarray::s![0, 1, ..]).to_vec(), vec![0xFF, 0xD7, 0x00]);
        assert_eq!(rgb.slice(ndarray::s![0, 2, ..]).to_vec(), vec![0x00, 0x64, 0x00]);
        assert_eq!(rgb.slice(ndarray::s![0, 3, ..]).to_vec(), vec![255, 255, 255]);
    }

    #[test]
    fn test_visualize_clamps_below_min() {
        let raster = phase_raster(array![[0, 1]]);
        let rgb = visualize(&raster, &PhasePalette::without_bare_soil()).unwrap();
        assert_eq!(rgb.slice(ndarray::s![0, 0, ..]), rgb.slice(ndarray::s![0, 1, ..]));
    }

    #[test]
    fn test_presentation_follows_scheme() {
        let (palette, legend) = presentation(&PhaseScheme::with_bare_soil());
        assert_eq!(palette, PhasePalette::with_bare_soil());
        assert_eq!(legend, legend_with_bare_soil());

        let (palette, legend) = presentation(&PhaseScheme::without_bare_soil());
        assert_eq!(palette, PhasePalette::without_bare_soil());
        assert_eq!(legend, legend_without_bare_soil());

        // Custom scheme from a configuration file
        let scheme = PhaseScheme::new(vec![0.3, 0.5, 0.7], 0).unwrap();
        let (palette, legend) = presentation(&scheme);
        assert_eq!((palette.min, palette.max), (0, 3));
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "No Data/Bare Soil (<0.3)",
                "Initial Growth (0.3-0.5)",
                "Transplanting (0.5-0.7)",
                "Heading (>0.7)"
            ]
        );
        assert_eq!(legend[0].color, "#FFFFFF");
        assert_eq!(legend[3].color, "#006400");

        let (palette, legend) = presentation(&PhaseScheme::new(vec![-1.0, 0.5], 0).unwrap());
        assert_eq!((palette.min, palette.max), (1, 2));
        assert_eq!(legend.len(), 2);
        assert_eq!(legend[1].label, "Transplanting (>0.5)");
    }

    #[test]
    fn test_paint_outline() {
        let region = Array2::from_shape_fn((5, 5), |(r, c)| (1..4).contains(&r) && (1..4).contains(&c));
        let mut frame = Array3::<u8>::zeros((5, 5, 3));
        paint_outline(&mut frame, &region, WHITE).unwrap();

        assert_eq!(frame[[1, 1, 0]], 255);
        assert_eq!(frame[[1, 2, 1]], 255);
        assert_eq!(frame[[2, 2, 0]], 0);
        assert_eq!(frame[[0, 0, 0]], 0);
    }

    #[test]
    fn test_session_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = DisplaySession::new("NDVI Crop Phase Animation (2020)");
        session.set_legend(legend_with_bare_soil());
        session.add_layer(
            "2020-03-05",
            LayerKind::Frame {
                timestamp: Utc.with_ymd_and_hms(2020, 3, 5, 0, 0, 0).unwrap(),
            },
            Some("frame_000.tif".to_string()),
        );
        session.add_layer("District Boundary", LayerKind::Boundary, None);
        session.write_manifest(&path).unwrap();

        let loaded = DisplaySession::read_manifest(&path).unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.frames().count(), 1);
        assert_eq!(legend_without_bare_soil().len(), 4);
    }
}
