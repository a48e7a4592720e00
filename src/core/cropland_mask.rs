use ndarray::{Array2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::boundary::Region;
use crate::core::connectivity::{connected_pixel_count, label_components, Connectivity};
use crate::types::{CroplandMask, LandCoverRaster, PhaseError, PhaseResult};

/// ESA WorldCover class code for cropland
pub const WORLDCOVER_CROPLAND: u8 = 40;

/// Seed for the stochastic thinning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThinningSeed {
    /// Reproducible draws
    Fixed(u64),
    /// Seed from the wall clock at build time
    Clock,
}

impl Default for ThinningSeed {
    fn default() -> Self {
        ThinningSeed::Fixed(42)
    }
}

impl ThinningSeed {
    fn resolve(&self) -> u64 {
        match self {
            ThinningSeed::Fixed(seed) => *seed,
            ThinningSeed::Clock => {
                let now = chrono::Utc::now();
                now.timestamp_nanos_opt()
                    .unwrap_or_else(|| now.timestamp_micros()) as u64
            }
        }
    }
}

/// Cropland mask derivation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CroplandMaskParams {
    /// Land-cover class selected as cropland
    pub crop_class_code: u8,
    /// Probability of keeping each cropland pixel
    pub keep_probability: f64,
    /// Adjacency used to label retained pixels
    pub component_connectivity: Connectivity,
    /// Resource ceiling for component labelling (pixels per group)
    pub max_component_pixels: usize,
    /// Adjacency used when counting patch sizes
    pub patch_connectivity: Connectivity,
    /// Resource ceiling for patch counts
    pub max_patch_pixels: usize,
    /// Pixels in patches smaller than this survive; 0 disables the filter
    pub min_patch_pixels: usize,
    pub seed: ThinningSeed,
}

impl Default for CroplandMaskParams {
    fn default() -> Self {
        Self {
            crop_class_code: WORLDCOVER_CROPLAND,
            keep_probability: 0.2,
            component_connectivity: Connectivity::Four,
            max_component_pixels: 100,
            patch_connectivity: Connectivity::Eight,
            max_patch_pixels: 128,
            min_patch_pixels: 150,
            seed: ThinningSeed::default(),
        }
    }
}

impl CroplandMaskParams {
    /// Check probability range and ceilings
    pub fn validate(&self) -> PhaseResult<()> {
        if !(0.0..=1.0).contains(&self.keep_probability) {
            return Err(PhaseError::InvalidInput(format!(
                "keep_probability must be within [0, 1], got {}",
                self.keep_probability
            )));
        }
        if self.max_component_pixels == 0 || self.max_patch_pixels == 0 {
            return Err(PhaseError::InvalidInput(
                "Component and patch ceilings must be at least 1".to_string(),
            ));
        }
        if self.min_patch_pixels > self.max_patch_pixels {
            log::debug!(
                "min_patch_pixels ({}) exceeds max_patch_pixels ({}); the size filter keeps every patch",
                self.min_patch_pixels,
                self.max_patch_pixels
            );
        }
        Ok(())
    }
}

/// Derives the sparse, denoised cropland mask from a land-cover raster
#[derive(Debug, Clone)]
pub struct CroplandMaskBuilder {
    params: CroplandMaskParams,
}

impl CroplandMaskBuilder {
    /// Create a new cropland mask builder
    pub fn new(params: CroplandMaskParams) -> Self {
        Self { params }
    }

    /// Active parameters
    pub fn params(&self) -> &CroplandMaskParams {
        &self.params
    }

    /// Clip to `region` and build; both must share a CRS
    pub fn build_within(&self, land_cover: &LandCoverRaster, region: &Region) -> PhaseResult<CroplandMask> {
        if land_cover.grid.crs != region.crs {
            return Err(PhaseError::GridMismatch(format!(
                "Land cover is in {} but region '{}' is in {}",
                land_cover.grid.crs,
                region.name(),
                region.crs
            )));
        }
        let clipped = region.clip_land_cover(land_cover);
        self.build(&clipped)
    }

    /// Select, thin, label and size-filter cropland pixels
    pub fn build(&self, land_cover: &LandCoverRaster) -> PhaseResult<CroplandMask> {
        let p = &self.params;
        p.validate()?;

        if land_cover.classes.dim() != land_cover.grid.dim() {
            return Err(PhaseError::GridMismatch(format!(
                "Land cover shape {:?} does not match grid {:?}",
                land_cover.classes.dim(),
                land_cover.grid.dim()
            )));
        }

        log::info!(
            "🌾 Building cropland mask: class {} on {}x{} grid",
            p.crop_class_code,
            land_cover.grid.width,
            land_cover.grid.height
        );

        // Step 1: cropland selection
        let cropland = land_cover
            .classes
            .mapv(|v| land_cover.is_valid(v) && v == p.crop_class_code);
        let cropland_pixels = cropland.iter().filter(|&&v| v).count();
        log::debug!("Cropland pixels: {}", cropland_pixels);

        // Step 2: stochastic thinning, one draw per pixel in scan order
        let seed = p.seed.resolve();
        log::debug!("Thinning with keep probability {} (seed {})", p.keep_probability, seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let draws: Array2<f64> = Array2::from_shape_simple_fn(cropland.dim(), || rng.gen::<f64>());
        let mut scattered = cropland.clone();
        Zip::from(&mut scattered)
            .and(&draws)
            .for_each(|keep, &draw| *keep = *keep && draw < p.keep_probability);
        let scattered_pixels = scattered.iter().filter(|&&v| v).count();
        log::debug!("Pixels after thinning: {}", scattered_pixels);

        // Steps 3-4: component labels, then patch sizes over the labels
        let components = label_components(&scattered, p.component_connectivity, p.max_component_pixels)?;
        let patches = connected_pixel_count(&components.labels, p.patch_connectivity, p.max_patch_pixels)?;
        log::debug!(
            "Labelled {} components ({} saturated), {} saturated patches",
            components.group_count,
            components.saturated.len(),
            patches.saturated.len()
        );

        // Steps 5-6: keep only pixels of small patches
        let mask = if p.min_patch_pixels == 0 {
            scattered
        } else {
            let min = p.min_patch_pixels as u64;
            let mut mask = scattered;
            Zip::from(&mut mask)
                .and(&patches.counts)
                .for_each(|keep, &count| *keep = *keep && (count as u64) < min);
            mask
        };

        let mut saturation = components.saturated;
        saturation.extend(patches.saturated);
        for warning in &saturation {
            log::warn!("⚠️  Capacity saturation: {}", warning);
        }

        let result = CroplandMask {
            mask,
            grid: land_cover.grid,
            saturation,
        };

        log::info!(
            "✅ Cropland mask: {} of {} cropland pixels retained",
            result.retained_pixels(),
            cropland_pixels
        );

        Ok(result)
    }
}
