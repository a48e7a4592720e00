use ndarray::{Array2, Zip};

use crate::types::{GridSpec, PhaseError, PhaseRaster, PhaseResult, PHASE_NODATA};

/// Per-phase maximum-extent snapshot over a classified series
#[derive(Debug, Clone)]
pub struct PhaseExtent {
    pub phase: u8,
    /// Number of acquisitions in which each pixel was in `phase`
    pub occurrence: Array2<u32>,
    /// Pixels with at least one valid acquisition
    pub observed: Array2<bool>,
    /// Region-wide maximum of `occurrence`; None when nothing in the region was observed
    pub max_occurrence: Option<u32>,
    /// Observed pixels whose occurrence equals the maximum
    pub at_max: Array2<bool>,
    /// `phase` where the pixel ever reached it, no-data elsewhere
    pub composite: Array2<u8>,
    pub grid: GridSpec,
}

impl PhaseExtent {
    /// Reduce `series` for one phase code; `region` limits the maximum reduction
    pub fn compute(series: &[PhaseRaster], phase: u8, region: Option<&Array2<bool>>) -> PhaseResult<Self> {
        if phase == PHASE_NODATA {
            return Err(PhaseError::InvalidInput(format!(
                "Phase code {} is reserved for no-data",
                PHASE_NODATA
            )));
        }
        let first = series.first().ok_or_else(|| {
            PhaseError::EmptySeries("No phase rasters to composite".to_string())
        })?;
        let grid = first.grid;
        if let Some(mask) = region {
            if mask.dim() != grid.dim() {
                return Err(PhaseError::GridMismatch(format!(
                    "Region mask {:?} does not match grid {:?}",
                    mask.dim(),
                    grid.dim()
                )));
            }
        }

        let mut occurrence = Array2::<u32>::zeros(grid.dim());
        let mut observed = Array2::<bool>::from_elem(grid.dim(), false);
        for raster in series {
            if raster.phase.dim() != grid.dim() {
                return Err(PhaseError::GridMismatch(format!(
                    "Phase raster {} has shape {:?}, expected {:?}",
                    raster.timestamp,
                    raster.phase.dim(),
                    grid.dim()
                )));
            }
            Zip::from(&mut occurrence)
                .and(&mut observed)
                .and(&raster.phase)
                .for_each(|count, seen, &p| {
                    if p != PHASE_NODATA {
                        *seen = true;
                        if p == phase {
                            *count += 1;
                        }
                    }
                });
        }

        let max_occurrence = region_max(&occurrence, &observed, region);
        let at_max = match max_occurrence {
            Some(max) => Zip::from(&occurrence)
                .and(&observed)
                .map_collect(|&count, &seen| seen && count == max),
            None => Array2::from_elem(grid.dim(), false),
        };
        let composite = occurrence.mapv(|count| if count > 0 { phase } else { PHASE_NODATA });

        log::info!(
            "Phase {} extent: {} pixels ever in phase, region maximum {:?} acquisitions",
            phase,
            composite.iter().filter(|&&p| p == phase).count(),
            max_occurrence
        );

        Ok(Self {
            phase,
            occurrence,
            observed,
            max_occurrence,
            at_max,
            composite,
            grid,
        })
    }

    /// One extent per code in `phases`
    pub fn compute_all(
        series: &[PhaseRaster],
        phases: impl IntoIterator<Item = u8>,
        region: Option<&Array2<bool>>,
    ) -> PhaseResult<Vec<Self>> {
        phases
            .into_iter()
            .map(|phase| Self::compute(series, phase, region))
            .collect()
    }
}

/// Maximum over observed pixels, optionally restricted to a region mask
pub fn region_max(values: &Array2<u32>, observed: &Array2<bool>, region: Option<&Array2<bool>>) -> Option<u32> {
    values
        .indexed_iter()
        .filter(|(idx, _)| observed[*idx] && region.map_or(true, |m| m[*idx]))
        .map(|(_, &v)| v)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    const N: u8 = PHASE_NODATA;

    fn series(frames: Vec<Array2<u8>>) -> Vec<PhaseRaster> {
        let grid = GridSpec::new(
            GeoTransform::north_up(0.0, 2.0, 1.0, 1.0),
            2,
            2,
            CoordinateSystem::Geographic,
        );
        frames
            .into_iter()
            .enumerate()
            .map(|(i, phase)| PhaseRaster {
                timestamp: Utc.with_ymd_and_hms(2020, 1 + i as u32, 1, 0, 0, 0).unwrap(),
                phase,
                grid,
            })
            .collect()
    }

    #[test]
    fn test_occurrence_and_max() {
        let s = series(vec![
            array![[2, 1], [N, 2]],
            array![[2, 2], [N, 3]],
            array![[1, 2], [N, 2]],
        ]);
        let extent = PhaseExtent::compute(&s, 2, None).unwrap();

        assert_eq!(extent.occurrence, array![[2, 2], [0, 2]]);
        assert_eq!(extent.max_occurrence, Some(2));
        assert_eq!(extent.at_max, array![[true, true], [false, true]]);
        assert_eq!(extent.composite, array![[2, 2], [N, 2]]);
        assert!(!extent.observed[[1, 0]]);
    }

    #[test]
    fn test_region_restricts_max() {
        let s = series(vec![array![[3, 3], [3, 1]], array![[3, 1], [1, 1]]]);
        let region = array![[false, true], [true, true]];
        let extent = PhaseExtent::compute(&s, 3, Some(&region)).unwrap();

        assert_eq!(extent.occurrence[[0, 0]], 2);
        assert_eq!(extent.max_occurrence, Some(1));
    }

    #[test]
    fn test_nothing_observed() {
        let s = series(vec![Array2::from_elem((2, 2), N)]);
        let extent = PhaseExtent::compute(&s, 1, None).unwrap();

        assert_eq!(extent.max_occurrence, None);
        assert!(extent.at_max.iter().all(|&v| !v));
        assert!(PhaseExtent::compute(&[], 1, None).is_err());
    }
}
