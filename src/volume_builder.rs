use crate::{
    enums::SortBy,
    volume::{PlanarImage, Volume},
};

use nalgebra::Vector3;
use ndarray::Array3;
use thiserror::Error;

const UNIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum VolumeBuilderError {
    #[error("No valid images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Invalid spacing ({0}, {1}, {2}): all components must be finite and positive")]
    InvalidSpacing(f64, f64, f64),

    #[error("Row and column directions must be orthogonal unit vectors")]
    DegenerateOrientation,
}

pub struct VolumeBuilder;

impl VolumeBuilder {
    /// Build a volume from planar images
    ///
    /// # Arguments
    ///
    /// * `images` - The slices making up the volume
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no images are given, dimensions are inconsistent, or
    /// a slice carries unusable geometry
    pub fn from_images(
        mut images: Vec<PlanarImage>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeBuilderError> {
        if images.is_empty() {
            return Err(VolumeBuilderError::NoValidImages);
        }

        Self::validate_dimensions(&images)?;
        for image in &images {
            Self::validate_geometry(image)?;
        }
        Self::sort_images(&mut images, sort_by);

        Ok(Volume::new(images))
    }

    /// Build an axis-aligned volume of `dim = (slices, rows, cols)` voxels
    /// with a single channel filled with `fill`. Columns run along +x, rows
    /// along +y and slices along +z; `origin` is the centre of the first
    /// voxel.
    pub fn uniform(
        dim: (usize, usize, usize),
        spacing: (f64, f64, f64),
        origin: Vector3<f64>,
        fill: f32,
    ) -> Result<Volume, VolumeBuilderError> {
        let (slices, rows, cols) = dim;
        let images = (0..slices)
            .map(|slice| {
                PlanarImage::new(
                    Array3::from_elem((rows, cols, 1), fill),
                    origin + Vector3::z() * (slice as f64 * spacing.2),
                    Vector3::y(),
                    Vector3::x(),
                    spacing,
                )
            })
            .collect();
        Self::from_images(images, SortBy::None)
    }

    /// Build an axis-aligned volume whose voxel values are computed from
    /// their centre positions.
    pub fn from_fn<F>(
        dim: (usize, usize, usize),
        spacing: (f64, f64, f64),
        origin: Vector3<f64>,
        field: F,
    ) -> Result<Volume, VolumeBuilderError>
    where
        F: Fn(&Vector3<f64>) -> f32,
    {
        let mut volume = Self::uniform(dim, spacing, origin, 0.0)?;
        for image in volume.images_mut() {
            let (rows, cols, _) = image.dim();
            for row in 0..rows {
                for col in 0..cols {
                    let position = image.position(row, col);
                    image.data[[row, col, 0]] = field(&position);
                }
            }
        }
        Ok(volume)
    }

    fn sort_images(images: &mut [PlanarImage], sort_by: SortBy) {
        if matches!(sort_by, SortBy::SlicePosition) {
            images.sort_by(|a, b| {
                a.stack_position()
                    .partial_cmp(&b.stack_position())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(images: &[PlanarImage]) -> Result<(), VolumeBuilderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeBuilderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn validate_geometry(image: &PlanarImage) -> Result<(), VolumeBuilderError> {
        let (dx, dy, dz) = image.spacing;
        if [dx, dy, dz].iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(VolumeBuilderError::InvalidSpacing(dx, dy, dz));
        }

        let is_unit = |v: &Vector3<f64>| (v.norm() - 1.0).abs() < UNIT_TOLERANCE;
        if !is_unit(&image.row_unit)
            || !is_unit(&image.col_unit)
            || image.row_unit.dot(&image.col_unit).abs() > UNIT_TOLERANCE
        {
            return Err(VolumeBuilderError::DegenerateOrientation);
        }
        Ok(())
    }
}
