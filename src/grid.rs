use crate::volume::{PlanarImage, Volume};

use nalgebra::Vector3;
use thiserror::Error;

/// Geometric tolerance (mm, or unitless for directions) used when deciding
/// whether two slices share a lattice.
pub const GEOMETRY_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Volume contains no images")]
    Empty,

    #[error("Reference images do not form a rectilinear grid: {0}")]
    NonRectilinear(String),
}

/// Index of a voxel on a [`RectilinearGrid`]. `slice` counts along the stack
/// normal, which may differ from the volume's image order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoxelIndex {
    pub slice: usize,
    pub row: usize,
    pub col: usize,
}

impl VoxelIndex {
    pub fn new(slice: usize, row: usize, col: usize) -> Self {
        Self { slice, row, col }
    }
}

/// Spatial layout of a volume whose voxels sit on a uniform, orthogonal
/// lattice. Per-axis arrays are ordered (slice, row, column).
#[derive(Debug, Clone)]
pub struct RectilinearGrid {
    origin: Vector3<f64>,
    axes: [Vector3<f64>; 3],
    spacing: [f64; 3],
    dims: [usize; 3],
    slice_order: Vec<usize>,
}

#[inline]
pub(crate) fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= GEOMETRY_TOLERANCE * 1f64.max(a.abs()).max(b.abs())
}

fn non_rectilinear(reason: impl Into<String>) -> GridError {
    GridError::NonRectilinear(reason.into())
}

impl RectilinearGrid {
    /// Verify that the volume's slices form a rectilinear grid and describe it.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Empty`] for a volume without slices and
    /// [`GridError::NonRectilinear`] if the slices disagree in shape, spacing
    /// or orientation, or are not evenly stacked along their normal.
    pub fn from_volume(volume: &Volume) -> Result<Self, GridError> {
        let first = volume.images().first().ok_or(GridError::Empty)?;
        let (rows, cols, _) = first.dim();
        if rows == 0 || cols == 0 {
            return Err(non_rectilinear("slices contain no voxels"));
        }

        let (row_spacing, col_spacing, thickness) = first.spacing;
        if [row_spacing, col_spacing, thickness]
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(non_rectilinear("spacing must be finite and positive"));
        }

        let row_unit = first.row_unit;
        let col_unit = first.col_unit;
        if !close(row_unit.norm(), 1.0)
            || !close(col_unit.norm(), 1.0)
            || row_unit.dot(&col_unit).abs() > GEOMETRY_TOLERANCE
        {
            return Err(non_rectilinear("in-plane axes are not orthonormal"));
        }
        let normal = first.normal();

        for (i, image) in volume.images().iter().enumerate() {
            Self::check_slice_matches(first, image)
                .map_err(|reason| non_rectilinear(format!("slice {i}: {reason}")))?;
        }

        let mut slice_order: Vec<usize> = (0..volume.images().len()).collect();
        let stack_position = |i: usize| volume.images()[i].offset.dot(&normal);
        slice_order.sort_by(|&a, &b| {
            stack_position(a)
                .partial_cmp(&stack_position(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let slice_spacing =
            Self::slice_spacing(volume, &slice_order, &normal)?.unwrap_or(thickness);
        let origin = volume.images()[slice_order[0]].offset;

        Ok(Self {
            origin,
            axes: [normal, row_unit, col_unit],
            spacing: [slice_spacing, row_spacing, col_spacing],
            dims: [slice_order.len(), rows, cols],
            slice_order,
        })
    }

    fn check_slice_matches(first: &PlanarImage, image: &PlanarImage) -> Result<(), String> {
        if image.dim() != first.dim() {
            return Err(format!(
                "dimensions {:?} differ from {:?}",
                image.dim(),
                first.dim()
            ));
        }
        if !close(image.spacing.0, first.spacing.0) || !close(image.spacing.1, first.spacing.1) {
            return Err(format!(
                "in-plane spacing ({}, {}) differs from ({}, {})",
                image.spacing.0, image.spacing.1, first.spacing.0, first.spacing.1
            ));
        }
        if (image.row_unit - first.row_unit).norm() > GEOMETRY_TOLERANCE
            || (image.col_unit - first.col_unit).norm() > GEOMETRY_TOLERANCE
        {
            return Err("orientation differs".to_string());
        }
        Ok(())
    }

    /// Uniform separation of the stacked slices, `None` for a single slice.
    fn slice_spacing(
        volume: &Volume,
        slice_order: &[usize],
        normal: &Vector3<f64>,
    ) -> Result<Option<f64>, GridError> {
        if slice_order.len() < 2 {
            return Ok(None);
        }

        let offsets: Vec<Vector3<f64>> = slice_order
            .iter()
            .map(|&i| volume.images()[i].offset)
            .collect();

        let base = offsets[0];
        for offset in &offsets[1..] {
            let delta = offset - base;
            let drift = delta - normal * delta.dot(normal);
            if drift.norm() > GEOMETRY_TOLERANCE * 1f64.max(delta.norm()) {
                return Err(non_rectilinear("slices are shifted within their plane"));
            }
        }

        let separation = (offsets[1] - offsets[0]).dot(normal);
        if separation <= GEOMETRY_TOLERANCE {
            return Err(non_rectilinear("slices overlap"));
        }
        for pair in offsets.windows(2) {
            let step = (pair[1] - pair[0]).dot(normal);
            if !close(step, separation) {
                return Err(non_rectilinear(format!(
                    "slice separation {step} differs from {separation}"
                )));
            }
        }
        Ok(Some(separation))
    }

    /// Number of voxels along (slice, row, column).
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Spacing along (slice, row, column).
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// Unit axes (normal, row, column).
    pub fn axes(&self) -> &[Vector3<f64>; 3] {
        &self.axes
    }

    /// Centre of voxel (0, 0, 0).
    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    /// Index into the volume's images for a stacked slice index.
    pub fn image_index(&self, slice: usize) -> usize {
        self.slice_order[slice]
    }

    pub fn min_spacing(&self) -> f64 {
        self.spacing.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max_spacing(&self) -> f64 {
        self.spacing.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn contains(&self, index: &VoxelIndex) -> bool {
        index.slice < self.dims[0] && index.row < self.dims[1] && index.col < self.dims[2]
    }

    /// Centre of a voxel.
    #[inline]
    pub fn position(&self, index: &VoxelIndex) -> Vector3<f64> {
        self.origin
            + self.axes[0] * (index.slice as f64 * self.spacing[0])
            + self.axes[1] * (index.row as f64 * self.spacing[1])
            + self.axes[2] * (index.col as f64 * self.spacing[2])
    }

    /// Continuous (slice, row, column) index of an arbitrary point. Voxel
    /// centres sit on integer values.
    #[inline]
    pub fn fractional_index(&self, point: &Vector3<f64>) -> [f64; 3] {
        let delta = point - self.origin;
        [
            delta.dot(&self.axes[0]) / self.spacing[0],
            delta.dot(&self.axes[1]) / self.spacing[1],
            delta.dot(&self.axes[2]) / self.spacing[2],
        ]
    }

    /// Squared distance between a point, given by its fractional index, and
    /// a voxel centre.
    #[inline]
    pub fn distance_squared(&self, fractional: &[f64; 3], index: &VoxelIndex) -> f64 {
        let ds = (index.slice as f64 - fractional[0]) * self.spacing[0];
        let dr = (index.row as f64 - fractional[1]) * self.spacing[1];
        let dc = (index.col as f64 - fractional[2]) * self.spacing[2];
        ds * ds + dr * dr + dc * dc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_builder::VolumeBuilder;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn slice(z: f64, spacing: (f64, f64, f64)) -> PlanarImage {
        PlanarImage::new(
            Array3::zeros((3, 4, 1)),
            Vector3::new(0.0, 0.0, z),
            Vector3::y(),
            Vector3::x(),
            spacing,
        )
    }

    #[test]
    fn uniform_volume_is_rectilinear() {
        let volume =
            VolumeBuilder::uniform((5, 3, 4), (0.5, 1.0, 2.0), Vector3::new(1.0, 2.0, 3.0), 0.0)
                .unwrap();
        let grid = RectilinearGrid::from_volume(&volume).unwrap();
        assert_eq!(grid.dims(), [5, 3, 4]);
        assert_eq!(grid.spacing(), [2.0, 0.5, 1.0]);
        assert_eq!(grid.min_spacing(), 0.5);
        assert_eq!(grid.max_spacing(), 2.0);
        assert_eq!(grid.voxel_count(), 60);

        let p = grid.position(&VoxelIndex::new(2, 1, 3));
        assert_relative_eq!(p.x, 4.0);
        assert_relative_eq!(p.y, 2.5);
        assert_relative_eq!(p.z, 7.0);

        let f = grid.fractional_index(&p);
        assert_relative_eq!(f[0], 2.0);
        assert_relative_eq!(f[1], 1.0);
        assert_relative_eq!(f[2], 3.0);
    }

    #[test]
    fn unordered_slices_are_stacked_along_normal() {
        let spacing = (1.0, 1.0, 1.0);
        let volume =
            Volume::new(vec![slice(2.0, spacing), slice(0.0, spacing), slice(1.0, spacing)]);
        let grid = RectilinearGrid::from_volume(&volume).unwrap();
        assert_eq!(grid.image_index(0), 1);
        assert_eq!(grid.image_index(1), 2);
        assert_eq!(grid.image_index(2), 0);
        assert_relative_eq!(grid.origin().z, 0.0);
    }

    #[test]
    fn single_slice_uses_thickness() {
        let volume = Volume::new(vec![slice(0.0, (1.0, 1.0, 2.5))]);
        let grid = RectilinearGrid::from_volume(&volume).unwrap();
        assert_eq!(grid.spacing()[0], 2.5);
        assert_eq!(grid.dims()[0], 1);
    }

    #[test]
    fn differing_spacing_is_rejected() {
        let volume = Volume::new(vec![slice(0.0, (1.0, 1.0, 1.0)), slice(1.0, (2.0, 1.0, 1.0))]);
        assert!(matches!(
            RectilinearGrid::from_volume(&volume),
            Err(GridError::NonRectilinear(_))
        ));
    }

    #[test]
    fn uneven_stacking_is_rejected() {
        let spacing = (1.0, 1.0, 1.0);
        let volume =
            Volume::new(vec![slice(0.0, spacing), slice(1.0, spacing), slice(3.0, spacing)]);
        assert!(matches!(
            RectilinearGrid::from_volume(&volume),
            Err(GridError::NonRectilinear(_))
        ));

        let duplicate = Volume::new(vec![slice(0.0, spacing), slice(0.0, spacing)]);
        assert!(RectilinearGrid::from_volume(&duplicate).is_err());
    }

    #[test]
    fn in_plane_drift_is_rejected() {
        let spacing = (1.0, 1.0, 1.0);
        let mut shifted = slice(1.0, spacing);
        shifted.offset.x = 0.5;
        let volume = Volume::new(vec![slice(0.0, spacing), shifted]);
        assert!(RectilinearGrid::from_volume(&volume).is_err());
    }

    #[test]
    fn empty_volume_is_rejected() {
        assert!(matches!(
            RectilinearGrid::from_volume(&Volume::default()),
            Err(GridError::Empty)
        ));
    }
}
