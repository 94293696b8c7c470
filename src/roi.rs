use nalgebra::Vector3;

/// Point containment test restricting which test voxels are compared.
///
/// Contour handling lives outside this crate; anything that can answer
/// "is this voxel centre inside?" can act as a region of interest.
pub trait RoiMask: Sync {
    fn contains(&self, point: &Vector3<f64>) -> bool;
}

/// Accepts every voxel.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntireVolume;

impl RoiMask for EntireVolume {
    fn contains(&self, _point: &Vector3<f64>) -> bool {
        true
    }
}

/// Axis-aligned box, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl BoundingBox {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }
}

impl RoiMask for BoundingBox {
    fn contains(&self, point: &Vector3<f64>) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }
}

impl<F> RoiMask for F
where
    F: Fn(&Vector3<f64>) -> bool + Sync,
{
    fn contains(&self, point: &Vector3<f64>) -> bool {
        self(point)
    }
}
