use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::{CapacitySaturation, PhaseError, PhaseResult, SaturationStage};

/// Pixel adjacency rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbours only (plus-shaped kernel)
    Four,
    /// Edge and corner neighbours
    Eight,
}

const FOUR_OFFSETS: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
#[rustfmt::skip]
const EIGHT_OFFSETS: [(isize, isize); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

impl Connectivity {
    /// Row/column neighbour offsets in scan order
    pub fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &FOUR_OFFSETS,
            Connectivity::Eight => &EIGHT_OFFSETS,
        }
    }
}

#[inline]
fn neighbor(dim: (usize, usize), row: usize, col: usize, offset: (isize, isize)) -> Option<(usize, usize)> {
    let r = row as isize + offset.0;
    let c = col as isize + offset.1;
    if r < 0 || c < 0 || r >= dim.0 as isize || c >= dim.1 as isize {
        None
    } else {
        Some((r as usize, c as usize))
    }
}

/// Result of connected-component labelling
#[derive(Debug, Clone)]
pub struct ComponentLabels {
    /// Group label per pixel, 0 for unset pixels
    pub labels: Array2<u32>,
    pub group_count: u32,
    /// One entry per blob that had to be split at the size ceiling
    pub saturated: Vec<CapacitySaturation>,
}

/// Label connected groups of set pixels.
///
/// Groups are grown breadth-first from the first unlabelled pixel in scan
/// order. A group stops growing once it holds `max_size` pixels; the rest of
/// the blob is picked up by later groups. `max_size` is a hard resource bound,
/// not a filter: every set pixel always receives a label.
pub fn label_components(
    mask: &Array2<bool>,
    connectivity: Connectivity,
    max_size: usize,
) -> PhaseResult<ComponentLabels> {
    if max_size == 0 {
        return Err(PhaseError::InvalidInput(
            "Component size ceiling must be at least 1".to_string(),
        ));
    }

    let dim = mask.dim();
    let mut labels = Array2::<u32>::zeros(dim);
    let mut saturated = Vec::new();
    let mut queue = VecDeque::new();
    let mut next_label: u32 = 0;
    let mut in_saturated_blob = Array2::<bool>::from_elem(dim, false);

    for ((row, col), &set) in mask.indexed_iter() {
        if !set || labels[[row, col]] != 0 {
            continue;
        }

        next_label = next_label.checked_add(1).ok_or_else(|| {
            PhaseError::InvalidInput("Too many connected components to label".to_string())
        })?;

        labels[[row, col]] = next_label;
        queue.push_back((row, col));
        let mut size = 1usize;
        let mut truncated = false;

        while let Some((r, c)) = queue.pop_front() {
            for &offset in connectivity.offsets() {
                let Some((nr, nc)) = neighbor(dim, r, c, offset) else {
                    continue;
                };
                if !mask[[nr, nc]] || labels[[nr, nc]] != 0 {
                    continue;
                }
                if size >= max_size {
                    truncated = true;
                    continue;
                }
                labels[[nr, nc]] = next_label;
                size += 1;
                queue.push_back((nr, nc));
            }
        }

        // One report per oversized blob, however many groups it was split into
        if truncated && !in_saturated_blob[[row, col]] {
            mark_blob(mask, connectivity, (row, col), &mut in_saturated_blob);
            saturated.push(CapacitySaturation {
                stage: SaturationStage::ComponentLabeling,
                label: next_label,
                seed: (row, col),
                ceiling: max_size,
            });
        }
    }

    Ok(ComponentLabels {
        labels,
        group_count: next_label,
        saturated,
    })
}

/// Flag every set pixel connected to `seed`, ignoring the size ceiling
fn mark_blob(mask: &Array2<bool>, connectivity: Connectivity, seed: (usize, usize), marked: &mut Array2<bool>) {
    let dim = mask.dim();
    let mut stack = vec![seed];
    marked[seed] = true;
    while let Some((r, c)) = stack.pop() {
        for &offset in connectivity.offsets() {
            if let Some(next) = neighbor(dim, r, c, offset) {
                if mask[next] && !marked[next] {
                    marked[next] = true;
                    stack.push(next);
                }
            }
        }
    }
}

/// Per-pixel patch sizes
#[derive(Debug, Clone)]
pub struct PatchCounts {
    /// Size of the pixel's patch capped at the ceiling, 0 for unlabelled pixels
    pub counts: Array2<u32>,
    /// Patches whose true size exceeds the ceiling
    pub saturated: Vec<CapacitySaturation>,
}

/// Count, for every labelled pixel, the pixels connected to it that carry the same label.
///
/// Counts saturate at `max_size`.
pub fn connected_pixel_count(
    labels: &Array2<u32>,
    connectivity: Connectivity,
    max_size: usize,
) -> PhaseResult<PatchCounts> {
    if max_size == 0 {
        return Err(PhaseError::InvalidInput(
            "Patch size ceiling must be at least 1".to_string(),
        ));
    }

    let dim = labels.dim();
    let mut counts = Array2::<u32>::zeros(dim);
    let mut visited = Array2::<bool>::from_elem(dim, false);
    let mut saturated = Vec::new();
    let mut members = Vec::new();
    let mut stack = Vec::new();
    let mut patch_index: u32 = 0;
    let ceiling = u32::try_from(max_size).unwrap_or(u32::MAX);

    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 || visited[[row, col]] {
            continue;
        }
        patch_index = patch_index.saturating_add(1);

        members.clear();
        visited[[row, col]] = true;
        stack.push((row, col));

        while let Some((r, c)) = stack.pop() {
            members.push((r, c));
            for &offset in connectivity.offsets() {
                if let Some((nr, nc)) = neighbor(dim, r, c, offset) {
                    if !visited[[nr, nc]] && labels[[nr, nc]] == label {
                        visited[[nr, nc]] = true;
                        stack.push((nr, nc));
                    }
                }
            }
        }

        let size = members.len();
        let count = u32::try_from(size).unwrap_or(u32::MAX).min(ceiling);
        for &(r, c) in &members {
            counts[[r, c]] = count;
        }

        if size > max_size {
            saturated.push(CapacitySaturation {
                stage: SaturationStage::PatchCount,
                label: patch_index,
                seed: (row, col),
                ceiling: max_size,
            });
        }
    }

    Ok(PatchCounts { counts, saturated })
}
