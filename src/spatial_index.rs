use crate::grid::{GridError, RectilinearGrid, VoxelIndex, close};
use crate::volume::{PlanarImage, Volume};

use nalgebra::Vector3;

/// Maximum deviation, in voxels, of a test slice from the reference lattice
/// for the two to count as aligned.
const ALIGNMENT_TOLERANCE: f64 = 1e-4;

/// Widens index ranges so rounding never drops a boundary voxel; callers
/// filter on exact distances afterwards.
const RANGE_SLACK: f64 = 1e-9;

/// Maps a test slice's (row, column) indices directly onto reference voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAlignment {
    pub slice: usize,
    pub row_offset: isize,
    pub col_offset: isize,
}

/// Point and neighbourhood queries over a rectilinear reference volume.
pub struct SpatialIndex<'a> {
    grid: RectilinearGrid,
    volume: &'a Volume,
}

/// Inclusive index range `[ceil(center - half_extent), floor(center + half_extent)]`
/// clipped to `0..len`.
#[inline]
fn index_range(center: f64, half_extent: f64, len: usize) -> Option<(usize, usize)> {
    let lo = (center - half_extent - RANGE_SLACK).ceil().max(0.0);
    let hi = (center + half_extent + RANGE_SLACK).floor().min(len as f64 - 1.0);
    if lo <= hi {
        Some((lo as usize, hi as usize))
    } else {
        None
    }
}

impl<'a> SpatialIndex<'a> {
    /// # Errors
    ///
    /// Returns a [`GridError`] if the volume is not rectilinear.
    pub fn new(volume: &'a Volume) -> Result<Self, GridError> {
        Ok(Self {
            grid: RectilinearGrid::from_volume(volume)?,
            volume,
        })
    }

    pub fn grid(&self) -> &RectilinearGrid {
        &self.grid
    }

    pub fn volume(&self) -> &'a Volume {
        self.volume
    }

    /// Value of a voxel, `None` if the index or channel is out of bounds.
    #[inline]
    pub fn value(&self, index: &VoxelIndex, channel: usize) -> Option<f32> {
        if !self.grid.contains(index) {
            return None;
        }
        let image = &self.volume.images()[self.grid.image_index(index.slice)];
        image.value(index.row, index.col, channel)
    }

    #[inline]
    pub fn position(&self, index: &VoxelIndex) -> Vector3<f64> {
        self.grid.position(index)
    }

    /// The voxel whose box `[centre - s/2, centre + s/2)` contains the point.
    pub fn locate(&self, point: &Vector3<f64>) -> Option<VoxelIndex> {
        let fractional = self.grid.fractional_index(point);
        let dims = self.grid.dims();
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let i = (fractional[axis] + 0.5).floor();
            if !(i >= 0.0 && i < dims[axis] as f64) {
                return None;
            }
            index[axis] = i as usize;
        }
        Some(VoxelIndex::new(index[0], index[1], index[2]))
    }

    /// Voxels whose centres lie at a distance `d` with
    /// `radius <= d < radius + width` from the point, ordered by slice, row
    /// then column.
    pub fn neighbours_at_shell(
        &self,
        point: &Vector3<f64>,
        radius: f64,
        width: f64,
    ) -> Vec<VoxelIndex> {
        let mut voxels = Vec::new();
        self.shell_voxels(&self.grid.fractional_index(point), radius, width, &mut voxels);
        voxels.into_iter().map(|(index, _)| index).collect()
    }

    /// Same as [`Self::neighbours_at_shell`] but appends `(voxel, d²)` pairs
    /// into a reusable buffer. The point is given by its fractional index.
    pub(crate) fn shell_voxels(
        &self,
        fractional: &[f64; 3],
        radius: f64,
        width: f64,
        out: &mut Vec<(VoxelIndex, f64)>,
    ) {
        out.clear();
        let inner_sq = radius * radius;
        let outer = radius + width;
        let outer_sq = outer * outer;
        let [slice_spacing, row_spacing, col_spacing] = self.grid.spacing();
        let [slices, rows, cols] = self.grid.dims();

        let Some((s_lo, s_hi)) = index_range(fractional[0], outer / slice_spacing, slices) else {
            return;
        };
        for slice in s_lo..=s_hi {
            let ds = (slice as f64 - fractional[0]) * slice_spacing;
            let ds2 = ds * ds;
            if ds2 >= outer_sq {
                continue;
            }
            let row_reach = (outer_sq - ds2).sqrt() / row_spacing;
            let Some((r_lo, r_hi)) = index_range(fractional[1], row_reach, rows) else {
                continue;
            };
            for row in r_lo..=r_hi {
                let dr = (row as f64 - fractional[1]) * row_spacing;
                let h2 = ds2 + dr * dr;
                if h2 >= outer_sq {
                    continue;
                }
                let col_reach = (outer_sq - h2).sqrt() / col_spacing;
                let Some((c_lo, c_hi)) = index_range(fractional[2], col_reach, cols) else {
                    continue;
                };
                // Columns a full voxel inside the inner sphere cannot belong to the shell.
                let hole = if inner_sq > h2 {
                    index_range(fractional[2], (inner_sq - h2).sqrt() / col_spacing - 1.0, cols)
                } else {
                    None
                };

                let mut col = c_lo;
                while col <= c_hi {
                    if let Some((g_lo, g_hi)) = hole {
                        if (g_lo..=g_hi).contains(&col) {
                            col = g_hi + 1;
                            continue;
                        }
                    }
                    let index = VoxelIndex::new(slice, row, col);
                    let d2 = self.grid.distance_squared(fractional, &index);
                    if d2 >= inner_sq && d2 < outer_sq {
                        out.push((index, d2));
                    }
                    col += 1;
                }
            }
        }
    }

    /// The up to six face-adjacent voxels inside the grid.
    pub fn face_neighbours(&self, index: &VoxelIndex) -> impl Iterator<Item = VoxelIndex> + use<> {
        let [slices, rows, cols] = self.grid.dims();
        let VoxelIndex { slice, row, col } = *index;
        [
            slice.checked_sub(1).map(|s| VoxelIndex::new(s, row, col)),
            (slice + 1 < slices).then(|| VoxelIndex::new(slice + 1, row, col)),
            row.checked_sub(1).map(|r| VoxelIndex::new(slice, r, col)),
            (row + 1 < rows).then(|| VoxelIndex::new(slice, row + 1, col)),
            col.checked_sub(1).map(|c| VoxelIndex::new(slice, row, c)),
            (col + 1 < cols).then(|| VoxelIndex::new(slice, row, col + 1)),
        ]
        .into_iter()
        .flatten()
    }

    /// Distance from a point, given by its fractional index, to the farthest
    /// voxel centre of the grid.
    pub fn farthest_voxel_distance(&self, fractional: &[f64; 3]) -> f64 {
        let dims = self.grid.dims();
        let spacing = self.grid.spacing();
        (0..3)
            .map(|axis| {
                let last = (dims[axis] - 1) as f64;
                let reach =
                    fractional[axis].abs().max((last - fractional[axis]).abs()) * spacing[axis];
                reach * reach
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Detect whether every voxel centre of `image` coincides with a
    /// reference voxel centre (or would, were the reference grid extended
    /// in-plane).
    pub fn alignment_for(&self, image: &PlanarImage) -> Option<SliceAlignment> {
        let [_, row_spacing, col_spacing] = self.grid.spacing();
        let axes = self.grid.axes();
        if !close(image.spacing.0, row_spacing) || !close(image.spacing.1, col_spacing) {
            return None;
        }
        if (image.row_unit - axes[1]).norm() > ALIGNMENT_TOLERANCE
            || (image.col_unit - axes[2]).norm() > ALIGNMENT_TOLERANCE
        {
            return None;
        }

        let fractional = self.grid.fractional_index(&image.offset);
        let rounded = fractional.map(f64::round);
        if (0..3).any(|axis| !((fractional[axis] - rounded[axis]).abs() <= ALIGNMENT_TOLERANCE)) {
            return None;
        }
        if !(rounded[0] >= 0.0 && rounded[0] < self.grid.dims()[0] as f64) {
            return None;
        }

        Some(SliceAlignment {
            slice: rounded[0] as usize,
            row_offset: rounded[1] as isize,
            col_offset: rounded[2] as isize,
        })
    }

    /// The reference voxel sharing its centre with test voxel (row, col).
    pub fn aligned_voxel(
        &self,
        alignment: &SliceAlignment,
        row: usize,
        col: usize,
    ) -> Option<VoxelIndex> {
        let [_, rows, cols] = self.grid.dims();
        let r = usize::try_from(row as isize + alignment.row_offset).ok()?;
        let c = usize::try_from(col as isize + alignment.col_offset).ok()?;
        (r < rows && c < cols).then(|| VoxelIndex::new(alignment.slice, r, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_builder::VolumeBuilder;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn reference() -> Volume {
        VolumeBuilder::from_fn((4, 5, 6), (1.0, 1.0, 2.0), Vector3::zeros(), |p| {
            (p.x + 10.0 * p.y + 100.0 * p.z) as f32
        })
        .unwrap()
    }

    #[test]
    fn locate_rounds_to_containing_voxel() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        assert_eq!(
            index.locate(&Vector3::new(2.4, 0.6, 2.9)),
            Some(VoxelIndex::new(1, 1, 2))
        );
        // Boundaries belong to the upper voxel.
        assert_eq!(
            index.locate(&Vector3::new(0.5, 0.0, 0.0)),
            Some(VoxelIndex::new(0, 0, 1))
        );
        assert_eq!(index.locate(&Vector3::new(-0.5, 0.0, 0.0)), Some(VoxelIndex::new(0, 0, 0)));
        assert_eq!(index.locate(&Vector3::new(-0.6, 0.0, 0.0)), None);
        assert_eq!(index.locate(&Vector3::new(0.0, 0.0, 7.0)), None);
    }

    #[test]
    fn value_follows_stack_order() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        assert_eq!(index.value(&VoxelIndex::new(2, 3, 1), 0), Some(431.0));
        assert_eq!(index.value(&VoxelIndex::new(2, 3, 1), 1), None);
        assert_eq!(index.value(&VoxelIndex::new(4, 0, 0), 0), None);
    }

    #[test]
    fn shell_matches_brute_force() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        let point = Vector3::new(2.3, 1.7, 3.1);
        let grid = index.grid();
        let fractional = grid.fractional_index(&point);
        let [slices, rows, cols] = grid.dims();

        for k in 0..8 {
            let radius = k as f64;
            let shell = index.neighbours_at_shell(&point, radius, 1.0);
            let mut expected = Vec::new();
            for s in 0..slices {
                for r in 0..rows {
                    for c in 0..cols {
                        let v = VoxelIndex::new(s, r, c);
                        let d2 = grid.distance_squared(&fractional, &v);
                        if d2 >= radius * radius && d2 < (radius + 1.0) * (radius + 1.0) {
                            expected.push(v);
                        }
                    }
                }
            }
            assert_eq!(shell, expected, "shell {k}");
        }
    }

    #[test]
    fn shell_includes_lower_boundary() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        let shell = index.neighbours_at_shell(&Vector3::zeros(), 1.0, 1.0);
        assert!(shell.contains(&VoxelIndex::new(0, 0, 1)));
        assert!(shell.contains(&VoxelIndex::new(0, 1, 0)));
        assert!(!shell.contains(&VoxelIndex::new(0, 0, 0)));
        assert!(!shell.contains(&VoxelIndex::new(0, 0, 2)));
    }

    #[test]
    fn face_neighbours_stay_inside() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        assert_eq!(index.face_neighbours(&VoxelIndex::new(0, 0, 0)).count(), 3);
        assert_eq!(index.face_neighbours(&VoxelIndex::new(1, 2, 3)).count(), 6);
        assert_eq!(index.face_neighbours(&VoxelIndex::new(3, 4, 5)).count(), 3);
    }

    #[test]
    fn farthest_distance_uses_opposite_corner() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();
        let fractional = index.grid().fractional_index(&Vector3::zeros());
        // Opposite corner centre is (5, 4, 6).
        assert_relative_eq!(
            index.farthest_voxel_distance(&fractional),
            (25.0f64 + 16.0 + 36.0).sqrt()
        );
    }

    #[test]
    fn alignment_detects_shared_lattice() {
        let volume = reference();
        let index = SpatialIndex::new(&volume).unwrap();

        let aligned = PlanarImage::new(
            Array3::zeros((2, 2, 1)),
            Vector3::new(2.0, 1.0, 4.0),
            Vector3::y(),
            Vector3::x(),
            (1.0, 1.0, 2.0),
        );
        let alignment = index.alignment_for(&aligned).unwrap();
        assert_eq!(
            alignment,
            SliceAlignment {
                slice: 2,
                row_offset: 1,
                col_offset: 2
            }
        );
        assert_eq!(index.aligned_voxel(&alignment, 1, 1), Some(VoxelIndex::new(2, 2, 3)));
        assert_eq!(index.aligned_voxel(&alignment, 4, 0), None);

        let mut shifted = aligned.clone();
        shifted.offset.x += 0.5;
        assert_eq!(index.alignment_for(&shifted), None);

        let mut coarse = aligned;
        coarse.spacing = (2.0, 2.0, 2.0);
        assert_eq!(index.alignment_for(&coarse), None);
    }
}
