//! Expanding-shell search over the reference volume.
//!
//! Shell `k` holds every reference voxel whose centre lies at a distance
//! `d` with `kΔ <= d < (k + 1)Δ` from the query point, `Δ` being the
//! smallest grid spacing. Besides the voxels themselves, each shell reports
//! the points where the reference field must cross the query's target value
//! on an edge between two face-adjacent voxels (intermediate value theorem).
//! Distances to those crossings are only as accurate as the grid, so the
//! search may overestimate a distance by up to one voxel diagonal.

use nalgebra::Vector3;

use crate::config::ValueRange;
use crate::grid::VoxelIndex;
use crate::interpolator::Interpolator;
use crate::spatial_index::SpatialIndex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Candidate {
    /// A reference voxel centre and its value.
    Voxel {
        index: VoxelIndex,
        distance: f64,
        value: f64,
    },
    /// A point between two voxels where the reference field takes the
    /// target value.
    Crossing { distance: f64 },
}

impl Candidate {
    pub fn distance(&self) -> f64 {
        match self {
            Self::Voxel { distance, .. } | Self::Crossing { distance } => *distance,
        }
    }
}

/// Scratch space reused across the queries of one task.
#[derive(Debug, Default)]
pub struct SearchBuffers {
    voxels: Vec<(VoxelIndex, f64)>,
    candidates: Vec<Candidate>,
}

impl SearchBuffers {
    /// Candidates produced by the last [`CandidateSearch::collect_shell`].
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

/// A search centred on one point, looking for one target value.
#[derive(Debug, Clone, Copy)]
pub struct Query {
    point: Vector3<f64>,
    fractional: [f64; 3],
    target: f64,
    reach: f64,
}

pub struct CandidateSearch<'i, 'a> {
    index: &'i SpatialIndex<'a>,
    channel: usize,
    reference_range: ValueRange,
    step: f64,
    edge_length: f64,
}

impl<'i, 'a> CandidateSearch<'i, 'a> {
    pub fn new(index: &'i SpatialIndex<'a>, channel: usize, reference_range: ValueRange) -> Self {
        Self {
            index,
            channel,
            reference_range,
            step: index.grid().min_spacing(),
            edge_length: index.grid().max_spacing(),
        }
    }

    /// Radial width of every shell.
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn query(&self, point: &Vector3<f64>, target: f64) -> Query {
        let fractional = self.index.grid().fractional_index(point);
        Query {
            point: *point,
            fractional,
            target,
            reach: self.index.farthest_voxel_distance(&fractional),
        }
    }

    /// Inner radius of shell `k`.
    #[inline]
    pub fn shell_radius(&self, k: usize) -> f64 {
        k as f64 * self.step
    }

    /// Shells are visited while their inner radius does not exceed this
    /// limit: past the farthest voxel no shell holds any voxel.
    pub fn shell_limit(&self, query: &Query, max_radius: f64) -> f64 {
        max_radius.min(query.reach)
    }

    /// Lower bound on the distance of any candidate reported by shell `k`.
    /// Crossings found in a shell may lie up to one edge closer than its
    /// inner radius.
    #[inline]
    pub fn lower_bound(&self, k: usize) -> f64 {
        (self.shell_radius(k) - self.edge_length).max(0.0)
    }

    /// Reference value of a voxel if it takes part in the search.
    #[inline]
    pub fn reference_value(&self, index: &VoxelIndex) -> Option<f64> {
        let value = f64::from(self.index.value(index, self.channel)?);
        (value.is_finite() && self.reference_range.contains(value)).then_some(value)
    }

    /// Fill `buffers` with the candidates of shell `k`. Voxels appear in
    /// slice, row, column order, each followed by the crossings on its edges
    /// to already visited neighbours.
    pub fn collect_shell(&self, query: &Query, k: usize, buffers: &mut SearchBuffers) {
        let SearchBuffers { voxels, candidates } = buffers;
        candidates.clear();

        let radius = self.shell_radius(k);
        let inner_sq = radius * radius;
        let outer = radius + self.step;
        let outer_sq = outer * outer;
        self.index
            .shell_voxels(&query.fractional, radius, self.step, voxels);

        for &(index, d2) in voxels.iter() {
            let Some(value) = self.reference_value(&index) else {
                continue;
            };
            candidates.push(Candidate::Voxel {
                index,
                distance: d2.sqrt(),
                value,
            });

            let offset = value - query.target;
            if offset == 0.0 {
                continue;
            }
            let position = self.index.position(&index);
            for neighbour in self.index.face_neighbours(&index) {
                let nd2 = self.index.grid().distance_squared(&query.fractional, &neighbour);
                let visited = nd2 < inner_sq || (nd2 < outer_sq && neighbour < index);
                if !visited {
                    continue;
                }
                let Some(neighbour_value) = self.reference_value(&neighbour) else {
                    continue;
                };
                if offset * (neighbour_value - query.target) >= 0.0 {
                    continue;
                }
                if let Some(distance) = Interpolator::crossing_distance(
                    &query.point,
                    &position,
                    value,
                    &self.index.position(&neighbour),
                    neighbour_value,
                    query.target,
                ) {
                    candidates.push(Candidate::Crossing { distance });
                }
            }
        }
    }
}
