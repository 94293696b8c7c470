//! Discrepancy, distance-to-agreement and gamma-index evaluation for single
//! test voxels.

use nalgebra::Vector3;

use crate::config::ComparisonConfig;
use crate::enums::{ComparisonMethod, DiscrepancyKind};
use crate::grid::VoxelIndex;
use crate::search::{Candidate, CandidateSearch, SearchBuffers};

/// Outcome of comparing one test voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonResult {
    Value(f64),
    /// No agreeing or overlapping reference voxel within reach.
    NotFound,
    /// Gamma search stopped once the index was known to exceed one.
    ConfirmedFailing,
}

impl ComparisonResult {
    /// The value stored in the test voxel.
    ///
    /// * discrepancy not found: `NaN`
    /// * DTA not found: the next `f32` above `dta_max`
    /// * gamma not found: `+inf`
    /// * gamma confirmed failing: the next `f32` above one
    pub fn encode(self, method: ComparisonMethod, dta_max: f64) -> f32 {
        match (self, method) {
            (Self::Value(value), _) => value as f32,
            (Self::NotFound, ComparisonMethod::Discrepancy) => f32::NAN,
            (Self::NotFound, ComparisonMethod::DistanceToAgreement) => next_up(dta_max as f32),
            (Self::NotFound, ComparisonMethod::GammaIndex) => f32::INFINITY,
            (Self::ConfirmedFailing, _) => gamma_failing_sentinel(),
        }
    }
}

/// The value reported for gamma indices known to exceed one.
pub fn gamma_failing_sentinel() -> f32 {
    next_up(1.0)
}

/// Smallest `f32` strictly greater than `x`.
pub(crate) fn next_up(x: f32) -> f32 {
    if x.is_nan() || x == f32::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f32::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}

/// `numerator / denominator` with `0 / x = 0` and `x / 0 = ±inf`.
#[inline]
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if numerator == 0.0 {
        0.0
    } else if denominator == 0.0 {
        numerator.signum() * f64::INFINITY
    } else {
        numerator / denominator
    }
}

/// Absolute difference relative to the reference value, in percent.
#[inline]
pub fn relative_difference(test: f64, reference: f64) -> f64 {
    100.0 * ratio((test - reference).abs(), reference.abs())
}

/// A non-negative quantity scaled by its acceptance threshold. A zero
/// threshold accepts nothing but zero; an infinite one accepts anything,
/// including an infinite value.
#[inline]
pub fn normalized(value: f64, threshold: f64) -> f64 {
    if threshold == f64::INFINITY {
        0.0
    } else {
        ratio(value, threshold)
    }
}

/// Gamma index of one reference candidate at `distance` from the test voxel.
pub fn gamma_index(
    distance: f64,
    test: f64,
    reference: f64,
    dta_threshold: f64,
    discrepancy_threshold: f64,
) -> f64 {
    let spatial = normalized(distance, dta_threshold);
    let dosimetric = normalized(relative_difference(test, reference), discrepancy_threshold);
    spatial.hypot(dosimetric)
}

/// Signed discrepancy of a test value against its reference value.
pub fn discrepancy(kind: DiscrepancyKind, test: f64, reference: f64, reference_max: f64) -> f64 {
    match kind {
        DiscrepancyKind::Relative => 100.0 * ratio(test - reference, reference.abs()),
        DiscrepancyKind::Difference => test - reference,
        DiscrepancyKind::PinnedToMax => 100.0 * ratio(test - reference, reference_max),
    }
}

pub struct MetricEvaluator<'s, 'i, 'a> {
    search: &'s CandidateSearch<'i, 'a>,
    config: &'s ComparisonConfig,
    reference_max: f64,
}

impl<'s, 'i, 'a> MetricEvaluator<'s, 'i, 'a> {
    /// `reference_max` is the largest in-range reference magnitude, used by
    /// [`DiscrepancyKind::PinnedToMax`].
    pub fn new(
        search: &'s CandidateSearch<'i, 'a>,
        config: &'s ComparisonConfig,
        reference_max: f64,
    ) -> Self {
        Self {
            search,
            config,
            reference_max,
        }
    }

    /// Compare against the reference voxel overlapping the test voxel, as
    /// found by the caller.
    pub fn discrepancy(&self, test: f64, reference_voxel: Option<VoxelIndex>) -> ComparisonResult {
        match reference_voxel.and_then(|voxel| self.search.reference_value(&voxel)) {
            Some(reference) => ComparisonResult::Value(discrepancy(
                self.config.discrepancy_kind,
                test,
                reference,
                self.reference_max,
            )),
            None => ComparisonResult::NotFound,
        }
    }

    fn agrees(&self, test: f64, candidate: &Candidate) -> bool {
        match *candidate {
            Candidate::Crossing { .. } => true,
            Candidate::Voxel { value, .. } => {
                (value - test).abs() <= self.config.dta_abs_tolerance
                    || relative_difference(test, value) <= self.config.dta_rel_tolerance
            }
        }
    }

    /// Distance to the nearest agreeing reference voxel or crossing, taken
    /// from the first shell containing any agreement.
    pub fn distance_to_agreement(
        &self,
        position: &Vector3<f64>,
        test: f64,
        buffers: &mut SearchBuffers,
    ) -> ComparisonResult {
        let query = self.search.query(position, test);
        let limit = self.search.shell_limit(&query, self.config.dta_max);

        let mut k = 0;
        while self.search.shell_radius(k) <= limit {
            self.search.collect_shell(&query, k, buffers);
            let nearest = buffers
                .candidates()
                .iter()
                .filter(|candidate| self.agrees(test, candidate))
                .map(Candidate::distance)
                .fold(None, |nearest: Option<f64>, d| match nearest {
                    Some(n) if n <= d => Some(n),
                    _ => Some(d),
                });

            if let Some(distance) = nearest {
                return if distance <= self.config.dta_max {
                    ComparisonResult::Value(distance)
                } else {
                    ComparisonResult::NotFound
                };
            }
            k += 1;
        }
        ComparisonResult::NotFound
    }

    /// Minimum gamma index over all candidates within `dta_max`.
    ///
    /// The search stops as soon as the distance term alone of every
    /// remaining shell is no smaller than the current minimum. With
    /// `gamma_terminate_above_one` it also stops once that term exceeds one,
    /// and every index above one is reported as
    /// [`ComparisonResult::ConfirmedFailing`]. An infinite minimum is
    /// reported that way regardless of the flag.
    pub fn gamma_index(
        &self,
        position: &Vector3<f64>,
        test: f64,
        buffers: &mut SearchBuffers,
    ) -> ComparisonResult {
        let dta_threshold = self.config.gamma_dta_threshold;
        let discrepancy_threshold = self.config.gamma_discrepancy_threshold;
        let terminate = self.config.gamma_terminate_above_one;

        let query = self.search.query(position, test);
        let limit = self.search.shell_limit(&query, self.config.dta_max);

        let mut best: Option<f64> = None;
        let mut k = 0;
        while self.search.shell_radius(k) <= limit {
            let bound = normalized(self.search.lower_bound(k), dta_threshold);
            if best.is_some_and(|b| b <= bound) {
                break;
            }
            if terminate && bound > 1.0 {
                return ComparisonResult::ConfirmedFailing;
            }

            self.search.collect_shell(&query, k, buffers);
            for candidate in buffers.candidates() {
                let gamma = match *candidate {
                    Candidate::Voxel { distance, value, .. } => {
                        gamma_index(distance, test, value, dta_threshold, discrepancy_threshold)
                    }
                    Candidate::Crossing { distance } => normalized(distance, dta_threshold),
                };
                if !gamma.is_nan() && best.is_none_or(|b| gamma < b) {
                    best = Some(gamma);
                }
            }
            k += 1;
        }

        match best {
            Some(gamma) if gamma.is_infinite() => ComparisonResult::ConfirmedFailing,
            Some(gamma) if terminate && gamma > 1.0 => ComparisonResult::ConfirmedFailing,
            Some(gamma) => ComparisonResult::Value(gamma),
            None => ComparisonResult::NotFound,
        }
    }
}
