//! Parallel per-voxel comparison of test volumes against one reference.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use ndarray::s;
use parking_lot::Mutex;
use rayon::prelude::*;
use thiserror::Error;
use web_time::Instant;

use crate::config::{ComparisonConfig, ConfigError};
use crate::enums::{ComparisonMethod, DiscrepancyKind};
use crate::grid::GridError;
use crate::metrics::{ComparisonResult, MetricEvaluator};
use crate::roi::RoiMask;
use crate::search::{CandidateSearch, SearchBuffers};
use crate::spatial_index::SpatialIndex;
use crate::volume::{PlanarImage, Volume};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRole {
    Test,
    Reference,
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("Exactly one reference image collection must be selected, found {found}")]
    ReferenceSelection { found: usize },

    #[error("No ROIs selected. Cannot continue.")]
    EmptyRoiSelection,

    #[error("Channel {channel} is not available in the {role} volume ({available} channels)")]
    InvalidChannel {
        role: VolumeRole,
        channel: usize,
        available: usize,
    },
}

/// Voxel counts and value range of one comparison run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonSummary {
    pub voxels_visited: usize,
    pub voxels_processed: usize,
    pub skipped_threshold: usize,
    pub skipped_roi: usize,
    pub not_found: usize,
    pub confirmed_failing: usize,
    /// Gamma indices at or below one, or DTA and discrepancy values found
    pub passing: usize,
    /// Smallest and largest finite value written
    pub value_range: Option<(f64, f64)>,
    pub elapsed: Duration,
}

impl ComparisonSummary {
    fn record(&mut self, result: &ComparisonResult, method: ComparisonMethod, written: f32) {
        self.voxels_processed += 1;
        match result {
            ComparisonResult::NotFound => self.not_found += 1,
            ComparisonResult::ConfirmedFailing => self.confirmed_failing += 1,
            ComparisonResult::Value(value) => {
                if method != ComparisonMethod::GammaIndex || *value <= 1.0 {
                    self.passing += 1;
                }
            }
        }

        let written = f64::from(written);
        if written.is_finite() {
            self.value_range = Some(match self.value_range {
                Some((lo, hi)) => (lo.min(written), hi.max(written)),
                None => (written, written),
            });
        }
    }

    fn merge(self, other: Self) -> Self {
        let value_range = match (self.value_range, other.value_range) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => Some((a_lo.min(b_lo), a_hi.max(b_hi))),
            (a, b) => a.or(b),
        };
        Self {
            voxels_visited: self.voxels_visited + other.voxels_visited,
            voxels_processed: self.voxels_processed + other.voxels_processed,
            skipped_threshold: self.skipped_threshold + other.skipped_threshold,
            skipped_roi: self.skipped_roi + other.skipped_roi,
            not_found: self.not_found + other.not_found,
            confirmed_failing: self.confirmed_failing + other.confirmed_failing,
            passing: self.passing + other.passing,
            value_range,
            elapsed: self.elapsed + other.elapsed,
        }
    }

    /// Share of processed voxels counted as passing.
    pub fn pass_rate(&self) -> Option<f64> {
        (self.voxels_processed > 0).then(|| self.passing as f64 / self.voxels_processed as f64)
    }
}

/// Shared completion counter for progress reporting.
struct Progress {
    completed: Mutex<usize>,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            completed: Mutex::new(0),
            total,
        }
    }

    fn slice_done(&self) {
        let mut completed = self.completed.lock();
        *completed += 1;
        let percent = *completed * 100 / self.total;
        let previous = (*completed - 1) * 100 / self.total;
        if percent / 10 != previous / 10 {
            info!("Compared {}/{} slices ({percent}%)", *completed, self.total);
        }
    }
}

/// A validated comparison setup: configuration, reference index and ROIs.
/// Building one performs every check that can fail, so
/// [`Comparator::compare`] only fails on a test volume lacking the channel.
pub struct Comparator<'r> {
    config: ComparisonConfig,
    index: SpatialIndex<'r>,
    rois: Vec<&'r dyn RoiMask>,
    reference_max: f64,
}

impl<'r> Comparator<'r> {
    /// # Errors
    ///
    /// Returns [`ComparisonError`] if the configuration is invalid, no ROI is
    /// given, the reference grid is not rectilinear or lacks the channel.
    pub fn new(
        config: ComparisonConfig,
        reference: &'r Volume,
        rois: &[&'r dyn RoiMask],
    ) -> Result<Self, ComparisonError> {
        config.validate()?;
        if rois.is_empty() {
            return Err(ComparisonError::EmptyRoiSelection);
        }

        let index = SpatialIndex::new(reference)?;
        Self::check_channel(reference, config.channel, VolumeRole::Reference)?;

        let grid = index.grid();
        let [slices, rows, cols] = grid.dims();
        let [slice_spacing, row_spacing, col_spacing] = grid.spacing();
        info!(
            "Reference grid: {slices} x {rows} x {cols} ({}) voxels, \
             spacing {slice_spacing} x {row_spacing} x {col_spacing} mm",
            grid.voxel_count()
        );

        let reference_max = if config.method == ComparisonMethod::Discrepancy
            && config.discrepancy_kind == DiscrepancyKind::PinnedToMax
        {
            Self::reference_max(reference, &config)
        } else {
            0.0
        };

        Ok(Self {
            config,
            index,
            rois: rois.to_vec(),
            reference_max,
        })
    }

    fn check_channel(
        volume: &Volume,
        channel: usize,
        role: VolumeRole,
    ) -> Result<(), ComparisonError> {
        let available = volume.channels();
        if channel >= available && !volume.images().is_empty() {
            return Err(ComparisonError::InvalidChannel {
                role,
                channel,
                available,
            });
        }
        Ok(())
    }

    /// Check a test volume can be compared without touching it.
    pub fn check_test_volume(&self, test: &Volume) -> Result<(), ComparisonError> {
        Self::check_channel(test, self.config.channel, VolumeRole::Test)
    }

    /// Largest in-range reference magnitude.
    fn reference_max(reference: &Volume, config: &ComparisonConfig) -> f64 {
        reference
            .images()
            .par_iter()
            .map(|image| {
                image
                    .data
                    .slice(s![.., .., config.channel])
                    .iter()
                    .map(|&v| f64::from(v))
                    .filter(|v| v.is_finite() && config.reference_range.contains(*v))
                    .fold(0.0, |max: f64, v| max.max(v.abs()))
            })
            .reduce(|| 0.0, f64::max)
    }

    /// Overwrite every selected voxel of `test` with its comparison result.
    ///
    /// # Errors
    ///
    /// Returns [`ComparisonError::InvalidChannel`] before any voxel is
    /// written if the test volume lacks the configured channel.
    pub fn compare(&self, test: &mut Volume) -> Result<ComparisonSummary, ComparisonError> {
        self.check_test_volume(test)?;
        if test.images().is_empty() {
            warn!("Test volume contains no images; nothing to compare");
        }

        let start = Instant::now();
        let search =
            CandidateSearch::new(&self.index, self.config.channel, self.config.reference_range);
        let progress = Progress::new(test.images().len());

        let mut summary = test
            .images_mut()
            .par_iter_mut()
            .map(|image| {
                let summary = self.compare_image(&search, image);
                progress.slice_done();
                summary
            })
            .reduce(ComparisonSummary::default, ComparisonSummary::merge);
        summary.elapsed = start.elapsed();

        self.annotate(test, &summary);
        info!(
            "Compared {} of {} voxels ({}) in {:.2?}: {} not found, {} confirmed failing",
            summary.voxels_processed,
            summary.voxels_visited,
            self.config.method,
            summary.elapsed,
            summary.not_found,
            summary.confirmed_failing
        );
        if let Some(rate) = summary.pass_rate() {
            info!("Pass rate: {:.2}%", rate * 100.0);
        }
        Ok(summary)
    }

    fn compare_image(
        &self,
        search: &CandidateSearch<'_, 'r>,
        image: &mut PlanarImage,
    ) -> ComparisonSummary {
        let method = self.config.method;
        let channel = self.config.channel;
        let alignment = self.index.alignment_for(image);
        match alignment {
            Some(alignment) => {
                debug!("Test slice aligned with reference slice {}", alignment.slice)
            }
            None => debug!("Test slice not aligned with reference grid"),
        }

        let evaluator = MetricEvaluator::new(search, &self.config, self.reference_max);
        let mut buffers = SearchBuffers::default();
        let mut summary = ComparisonSummary::default();
        let (rows, cols, _) = image.dim();

        for row in 0..rows {
            for col in 0..cols {
                summary.voxels_visited += 1;
                let value = image.data[[row, col, channel]];
                if !self.config.test_range.contains(f64::from(value)) {
                    summary.skipped_threshold += 1;
                    continue;
                }
                let position = image.position(row, col);
                if !self.rois.iter().any(|roi| roi.contains(&position)) {
                    summary.skipped_roi += 1;
                    continue;
                }

                let test = f64::from(value);
                let result = match method {
                    ComparisonMethod::Discrepancy => {
                        let voxel = match &alignment {
                            Some(alignment) => self.index.aligned_voxel(alignment, row, col),
                            None => self.index.locate(&position),
                        };
                        evaluator.discrepancy(test, voxel)
                    }
                    ComparisonMethod::DistanceToAgreement => {
                        evaluator.distance_to_agreement(&position, test, &mut buffers)
                    }
                    ComparisonMethod::GammaIndex => {
                        evaluator.gamma_index(&position, test, &mut buffers)
                    }
                };

                let written = result.encode(method, self.config.dta_max);
                image.data[[row, col, channel]] = written;
                summary.record(&result, method, written);
            }
        }
        summary
    }

    /// Record the comparison in the volume's description and display window.
    fn annotate(&self, test: &mut Volume, summary: &ComparisonSummary) {
        let config = &self.config;
        match config.method {
            ComparisonMethod::GammaIndex => {
                test.set_description(format!(
                    "Gamma-index ({} mm, {} %)",
                    config.gamma_dta_threshold, config.gamma_discrepancy_threshold
                ));
                test.set_window(1.0, 2.0);
            }
            ComparisonMethod::DistanceToAgreement => {
                test.set_description(format!("Distance-to-agreement (max {} mm)", config.dta_max));
                test.set_window(config.dta_max / 2.0, config.dta_max);
            }
            ComparisonMethod::Discrepancy => {
                test.set_description(format!("Discrepancy ({})", config.discrepancy_kind));
                if let Some((lo, hi)) = summary.value_range {
                    let width = if hi > lo { hi - lo } else { 1.0 };
                    test.set_window((lo + hi) / 2.0, width);
                }
            }
        }
    }
}

/// Compare every test volume against the single reference volume.
///
/// All setup checks (reference and ROI selection, configuration, grid
/// rectilinearity, channel availability in every volume) happen before any
/// voxel is written, so an error leaves every test volume untouched.
///
/// # Errors
///
/// Returns [`ComparisonError`] for any configuration problem.
pub fn compare_pixels<'r>(
    tests: &mut [Volume],
    references: &[&'r Volume],
    rois: &[&'r dyn RoiMask],
    config: &ComparisonConfig,
) -> Result<Vec<ComparisonSummary>, ComparisonError> {
    let [reference] = references else {
        return Err(ComparisonError::ReferenceSelection {
            found: references.len(),
        });
    };

    let comparator = Comparator::new(config.clone(), *reference, rois)?;
    for test in tests.iter() {
        comparator.check_test_volume(test)?;
    }
    if tests.is_empty() {
        warn!("No test volumes selected");
    }

    tests
        .iter_mut()
        .map(|test| comparator.compare(test))
        .collect()
}
