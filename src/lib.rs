//! # voxel-compare
//!
//! Per-voxel comparison of a *test* volume against a *reference* volume,
//! as used to check that a re-computed or re-sampled dose grid agrees with
//! an accepted one.
//!
//! Three metrics are available:
//!  - Discrepancy: value difference against the overlapping reference voxel
//!  - Distance-to-agreement (DTA): distance to the nearest reference voxel
//!    whose value matches within tolerance
//!  - Gamma-index: combined distance and discrepancy criterion, passing
//!    when at most one (Low et al. 1998, doi:10.1118/1.598248)
//!
//! Test volumes may be arbitrary stacks of planar slices, partially
//! overlapping or misaligned with the reference. The reference volume must
//! form a rectilinear grid; this is verified before any voxel is written.
//! Slices of the test volume are compared in parallel using rayon.
//!
//! No field values are interpolated. DTA and gamma searches only use
//! implicit interpolation (via the intermediate value theorem) to locate
//! where an agreeing value must lie between two voxels, so distances are
//! accurate to the reference voxel size at best. Supersample the reference
//! if more accuracy is needed.
//!
//! # Examples
//!
//! ## Gamma analysis of a shifted volume
//!
//! ```no_run
//! # use voxel_compare::{compare_pixels, ComparisonConfig, EntireVolume, RoiMask, VolumeBuilder};
//! # use nalgebra::Vector3;
//! let reference = VolumeBuilder::from_fn((20, 64, 64), (1.0, 1.0, 1.0), Vector3::zeros(), |p| {
//!     (100.0 * (-(p - Vector3::new(32.0, 32.0, 10.0)).norm_squared() / 200.0).exp()) as f32
//! })
//! .expect("should have built the reference volume");
//! let mut test = reference.clone();
//!
//! let rois: [&dyn RoiMask; 1] = [&EntireVolume];
//! let summaries = compare_pixels(
//!     std::slice::from_mut(&mut test),
//!     &[&reference],
//!     &rois,
//!     &ComparisonConfig::default(),
//! )
//! .expect("should have compared volumes");
//! println!("{:?}", summaries[0].pass_rate());
//! ```

pub mod comparator;
pub mod config;
pub mod enums;
pub mod grid;
mod interpolator;
pub mod metrics;
pub mod roi;
pub mod search;
pub mod spatial_index;
pub mod volume;
pub mod volume_builder;

pub use comparator::{Comparator, ComparisonError, ComparisonSummary, compare_pixels};
pub use config::{ComparisonConfig, ConfigError, ValueRange};
pub use enums::{ComparisonMethod, DiscrepancyKind, SortBy};
pub use grid::{GridError, RectilinearGrid, VoxelIndex};
pub use metrics::ComparisonResult;
pub use roi::{BoundingBox, EntireVolume, RoiMask};
pub use spatial_index::{SliceAlignment, SpatialIndex};
pub use volume::{PlanarImage, Volume};
pub use volume_builder::{VolumeBuilder, VolumeBuilderError};
