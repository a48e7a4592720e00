use ndarray::{Array2, Zip};

use crate::types::{CroplandMask, GridSpec, PhaseError, PhaseResult, ResampledCroplandMask};

/// Nearest-neighbour resampling of `source` onto `target_grid`.
///
/// Each target pixel takes the source pixel containing its centre; target
/// pixels that fall outside the source grid get `fill`. Both grids must share a
/// CRS and be north-up.
pub fn resample_nearest<T>(
    source: &Array2<T>,
    source_grid: &GridSpec,
    target_grid: &GridSpec,
    fill: T,
) -> PhaseResult<Array2<T>>
where
    T: Copy + Send + Sync,
{
    if source.dim() != source_grid.dim() {
        return Err(PhaseError::GridMismatch(format!(
            "Array shape {:?} does not match grid {:?}",
            source.dim(),
            source_grid.dim()
        )));
    }
    if source_grid.crs != target_grid.crs {
        return Err(PhaseError::GridMismatch(format!(
            "Reprojection from {} to {} is not supported",
            source_grid.crs, target_grid.crs
        )));
    }
    if !source_grid.transform.is_north_up() || !target_grid.transform.is_north_up() {
        return Err(PhaseError::GridMismatch(
            "Rotated geotransforms are not supported".to_string(),
        ));
    }

    if source_grid.matches(target_grid) {
        return Ok(source.clone());
    }

    log::debug!(
        "Resampling {}x{} -> {}x{} (nearest)",
        source_grid.width,
        source_grid.height,
        target_grid.width,
        target_grid.height
    );

    let mut output = Array2::from_elem(target_grid.dim(), fill);
    let sample = |(row, col): (usize, usize), out: &mut T| {
        let (x, y) = target_grid.pixel_center(row, col);
        if let Some(idx) = source_grid.locate(x, y) {
            *out = source[idx];
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(sample);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(sample);

    Ok(output)
}

/// Resample a cropland mask onto the analysis grid; pixels outside the source are dropped
pub fn resample_mask(mask: &CroplandMask, target_grid: &GridSpec) -> PhaseResult<ResampledCroplandMask> {
    let resampled = resample_nearest(&mask.mask, &mask.grid, target_grid, false)?;
    let retained = resampled.iter().filter(|&&v| v).count();

    log::info!(
        "Cropland mask resampled to {}x{} ({} cropland pixels)",
        target_grid.width,
        target_grid.height,
        retained
    );
    if retained == 0 {
        log::warn!("Resampled cropland mask is empty; every acquisition will be fully masked");
    }

    Ok(ResampledCroplandMask {
        mask: resampled,
        grid: *target_grid,
    })
}
