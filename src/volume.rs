use std::collections::BTreeMap;

use nalgebra::Vector3;
use ndarray::Array3;

pub const DESCRIPTION_KEY: &str = "Description";
pub const WINDOW_CENTER_KEY: &str = "WindowCenter";
pub const WINDOW_WIDTH_KEY: &str = "WindowWidth";

/// A single planar slice with its own spatial transform.
#[derive(Debug, Clone)]
pub struct PlanarImage {
    /// Voxel values shaped (rows, columns, channels)
    pub data: Array3<f32>,
    /// Centre of voxel (0, 0)
    pub offset: Vector3<f64>,
    /// Unit direction of increasing row index
    pub row_unit: Vector3<f64>,
    /// Unit direction of increasing column index
    pub col_unit: Vector3<f64>,
    /// (row, column, thickness) spacing in mm
    pub spacing: (f64, f64, f64),
}

impl PlanarImage {
    pub fn new(
        data: Array3<f32>,
        offset: Vector3<f64>,
        row_unit: Vector3<f64>,
        col_unit: Vector3<f64>,
        spacing: (f64, f64, f64),
    ) -> Self {
        Self {
            data,
            offset,
            row_unit,
            col_unit,
            spacing,
        }
    }

    /// Get the dimensions of the slice (rows, columns, channels)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Unit normal of the slice plane.
    pub fn normal(&self) -> Vector3<f64> {
        self.col_unit.cross(&self.row_unit)
    }

    /// Centre of the voxel at (row, col).
    #[inline]
    pub fn position(&self, row: usize, col: usize) -> Vector3<f64> {
        self.offset
            + self.row_unit * (row as f64 * self.spacing.0)
            + self.col_unit * (col as f64 * self.spacing.1)
    }

    /// Position of the slice along its own normal.
    pub fn stack_position(&self) -> f64 {
        self.offset.dot(&self.normal())
    }

    pub fn value(&self, row: usize, col: usize, channel: usize) -> Option<f32> {
        self.data.get([row, col, channel]).copied()
    }
}

/// An ordered stack of planar slices. Slices may be irregularly spaced.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub images: Vec<PlanarImage>,
    pub metadata: BTreeMap<String, String>,
}

impl Volume {
    pub fn new(images: Vec<PlanarImage>) -> Self {
        Self {
            images,
            metadata: BTreeMap::new(),
        }
    }

    pub fn images(&self) -> &[PlanarImage] {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut [PlanarImage] {
        &mut self.images
    }

    /// Smallest channel count over all slices, zero for an empty volume.
    pub fn channels(&self) -> usize {
        self.images
            .iter()
            .map(PlanarImage::channels)
            .min()
            .unwrap_or(0)
    }

    pub fn voxel_count(&self) -> usize {
        self.images
            .iter()
            .map(|image| {
                let (rows, cols, _) = image.dim();
                rows * cols
            })
            .sum()
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.get(DESCRIPTION_KEY).map(String::as_str)
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.metadata
            .insert(DESCRIPTION_KEY.to_string(), description.into());
    }

    pub fn set_window(&mut self, center: f64, width: f64) {
        self.metadata
            .insert(WINDOW_CENTER_KEY.to_string(), center.to_string());
        self.metadata
            .insert(WINDOW_WIDTH_KEY.to_string(), width.to_string());
    }

    /// The display window as (center, width), if set.
    pub fn window(&self) -> Option<(f64, f64)> {
        let center = self.metadata.get(WINDOW_CENTER_KEY)?.parse().ok()?;
        let width = self.metadata.get(WINDOW_WIDTH_KEY)?.parse().ok()?;
        Some((center, width))
    }
}
