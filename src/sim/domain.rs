// Obstacles, inflows and the cached accessible/active masks

use std::{fmt::Debug, sync::Arc};

use ndarray::{ArrayD, Axis, IxDyn, Zip};
use tracing::debug;

use crate::{
    ScalarField,
    sim::{
        field::StaggeredField,
        grid::{Boundary, Domain, Grid},
    },
};

/// A region of space that can be sampled at arbitrary points.
pub trait Geometry: Debug + Send + Sync {
    /// How much of `point` lies inside the region, in `[0, 1]`
    fn value_at(&self, point: &[f32]) -> f32;

    /// Sample the region at every cell centre, as a `[batch, spatial.., 1]` field
    fn values_at_centers(&self, grid: &Grid, batch: usize) -> ScalarField {
        let shape = grid.shape(batch, 1);
        let rank = grid.rank();
        ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let idx = ndarray::Dimension::slice(&idx);
            self.value_at(&grid.cell_center(&idx[1..=rank]))
        })
    }

    /// Binary occupancy of every cell
    fn indicator(&self, grid: &Grid, batch: usize) -> ScalarField {
        self.values_at_centers(grid, batch)
            .mapv(|v| if v >= 0.5 { 1. } else { 0. })
    }
}

/// Axis-aligned box between `lower` and `upper` (physical coordinates).
#[derive(Debug, Clone, PartialEq)]
pub struct BoxGeometry {
    pub lower: Vec<f32>,
    pub upper: Vec<f32>,
}

impl BoxGeometry {
    pub fn new(lower: Vec<f32>, upper: Vec<f32>) -> Self {
        BoxGeometry { lower, upper }
    }
}

impl Geometry for BoxGeometry {
    fn value_at(&self, point: &[f32]) -> f32 {
        let inside = point
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(p, (lo, hi))| lo <= p && p <= hi);
        if inside { 1. } else { 0. }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SphereGeometry {
    pub center: Vec<f32>,
    pub radius: f32,
}

impl SphereGeometry {
    pub fn new(center: Vec<f32>, radius: f32) -> Self {
        SphereGeometry { center, radius }
    }
}

impl Geometry for SphereGeometry {
    fn value_at(&self, point: &[f32]) -> f32 {
        let distance_sq: f32 = point
            .iter()
            .zip(&self.center)
            .map(|(p, c)| (p - c).powi(2))
            .sum();
        if distance_sq <= self.radius.powi(2) { 1. } else { 0. }
    }
}

/// A solid region the liquid cannot enter.
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub geometry: Arc<dyn Geometry>,

    /// Velocity imposed on the faces the obstacle blocks; static if `None`
    pub velocity: Option<Vec<f32>>,
}

impl Obstacle {
    pub fn new(geometry: Arc<dyn Geometry>) -> Self {
        Obstacle {
            geometry,
            velocity: None,
        }
    }

    pub fn moving(geometry: Arc<dyn Geometry>, velocity: Vec<f32>) -> Self {
        Obstacle {
            geometry,
            velocity: Some(velocity),
        }
    }
}

/// A region that adds liquid at `rate` per unit time.
#[derive(Debug, Clone)]
pub struct Inflow {
    pub geometry: Arc<dyn Geometry>,
    pub rate: f32,
}

impl Inflow {
    pub fn new(geometry: Arc<dyn Geometry>, rate: f32) -> Self {
        Inflow { geometry, rate }
    }
}

/// Density added per unit time by all inflows. Exactly zero without inflows.
pub fn inflow_density(inflows: &[Inflow], grid: &Grid, batch: usize) -> ScalarField {
    let mut total: ScalarField = ArrayD::zeros(IxDyn(&grid.shape(batch, 1)));
    for inflow in inflows {
        total.scaled_add(inflow.rate, &inflow.geometry.values_at_centers(grid, batch));
    }
    total
}

/// Masks derived from the obstacles, kept between steps while the
/// obstacle set stays the same.
#[derive(Debug, Clone)]
pub struct DomainCache {
    domain: Domain,

    /// The obstacle set the masks were computed from
    obstacles: Vec<Arc<Obstacle>>,

    /// `1` where a cell is not blocked by an obstacle
    accessible: Arc<ScalarField>,

    /// `1` where a cell holds liquid
    active: ScalarField,

    /// `1` on faces between two accessible cells, staggered layout
    face_mask: Arc<ArrayD<f32>>,

    /// Velocity of the obstacle on blocked faces, zero elsewhere
    solid_velocity: Arc<ArrayD<f32>>,
}

impl DomainCache {
    /// Reuse `prior` if it was built from the same obstacles, otherwise
    /// recompute the accessible mask. A recomputed cache keeps the liquid
    /// of `prior` that is still accessible.
    ///
    /// Parameters
    /// - `prior` - The cache of the previous state, if any
    /// - `domain` - The simulated box
    /// - `obstacles` - The current obstacle set
    /// - `batch` - The batch size of the state
    pub fn compute(
        prior: Option<&DomainCache>,
        domain: &Domain,
        obstacles: &[Arc<Obstacle>],
        batch: usize,
    ) -> DomainCache {
        if let Some(prior) = prior {
            if prior.is_valid(obstacles) && prior.batch_size() == batch && &prior.domain == domain {
                return prior.clone();
            }
        }

        let grid = &domain.grid;
        let indicators: Vec<ScalarField> = obstacles
            .iter()
            .map(|o| o.geometry.indicator(grid, batch))
            .collect();

        let mut accessible: ScalarField = ArrayD::ones(IxDyn(&grid.shape(batch, 1)));
        for indicator in &indicators {
            Zip::from(&mut accessible)
                .and(indicator)
                .for_each(|a, &i| *a = a.min(1. - i));
        }

        let active = match prior {
            Some(prior) if prior.active.shape() == accessible.shape() => &accessible * &prior.active,
            _ => accessible.clone(),
        };

        debug!(
            obstacles = obstacles.len(),
            accessible_cells = accessible.sum(),
            "recomputed domain cache"
        );

        let face_mask = face_mask(&accessible, domain.boundary);
        let solid_velocity = solid_velocity(&face_mask, obstacles, &indicators);

        DomainCache {
            domain: domain.clone(),
            obstacles: obstacles.to_vec(),
            accessible: Arc::new(accessible),
            active,
            face_mask: Arc::new(face_mask),
            solid_velocity: Arc::new(solid_velocity),
        }
    }

    /// Whether the cache was built from exactly these obstacles
    pub fn is_valid(&self, obstacles: &[Arc<Obstacle>]) -> bool {
        self.obstacles.len() == obstacles.len()
            && self
                .obstacles
                .iter()
                .zip(obstacles)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn grid(&self) -> &Grid {
        &self.domain.grid
    }

    pub fn batch_size(&self) -> usize {
        self.accessible.shape()[0]
    }

    pub fn active(&self) -> &ScalarField {
        &self.active
    }

    pub fn accessible(&self) -> &ScalarField {
        &self.accessible
    }

    /// The shared accessible mask; identical between reused caches
    pub fn accessible_shared(&self) -> &Arc<ScalarField> {
        &self.accessible
    }

    /// Replace the liquid mask after new density is known. The stepper does
    /// this once per step; nothing else writes into a cache.
    pub(crate) fn replace_active(&mut self, active: ScalarField) {
        debug_assert_eq!(active.shape(), self.accessible.shape());
        self.active = active;
    }

    /// Remove flow through solid faces. Normal components on faces touching
    /// an inaccessible cell (or a closed wall) take the obstacle velocity,
    /// zero for static solids; tangential components are left free.
    pub fn with_hard_boundary_conditions(&self, velocity: &StaggeredField) -> StaggeredField {
        let mut data = velocity.data() * &*self.face_mask;
        data += &*self.solid_velocity;
        StaggeredField::new(data)
    }
}

/// Staggered mask of faces whose two neighbouring cells are both accessible.
/// The outside of the box counts as accessible only for open walls.
fn face_mask(accessible: &ScalarField, boundary: Boundary) -> ArrayD<f32> {
    let rank = accessible.ndim() - 2;
    let outside = match boundary {
        Boundary::Closed => 0.,
        Boundary::Open => 1.,
    };

    let mut shape = accessible.shape().to_vec();
    for n in shape[1..=rank].iter_mut() {
        *n += 1;
    }
    shape[rank + 1] = rank;

    let mut cell = vec![0usize; rank + 2];
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        let idx = ndarray::Dimension::slice(&idx);
        let d = idx[rank + 1];
        if (1..=rank).any(|a| a != d + 1 && idx[a] + 1 == shape[a]) {
            return 0.;
        }

        cell.copy_from_slice(idx);
        cell[rank + 1] = 0;
        let upper = if idx[d + 1] + 1 < shape[d + 1] {
            accessible[cell.as_slice()]
        } else {
            outside
        };
        let lower = if idx[d + 1] > 0 {
            cell[d + 1] -= 1;
            accessible[cell.as_slice()]
        } else {
            outside
        };
        upper * lower
    })
}

/// Obstacle velocities on the blocked faces next to moving obstacles.
fn solid_velocity(
    face_mask: &ArrayD<f32>,
    obstacles: &[Arc<Obstacle>],
    indicators: &[ScalarField],
) -> ArrayD<f32> {
    let mut velocity: ArrayD<f32> = ArrayD::zeros(face_mask.raw_dim());
    let rank = face_mask.ndim() - 2;
    let last = Axis(rank + 1);

    for (obstacle, indicator) in obstacles.iter().zip(indicators) {
        let Some(obstacle_velocity) = &obstacle.velocity else {
            continue;
        };

        let mut cell = vec![0usize; rank + 2];
        for d in 0..rank.min(obstacle_velocity.len()) {
            // faces of component d with the obstacle on either side
            let mut touched = face_mask.index_axis(last, d).mapv(|_| 0.);
            for (idx, t) in touched.indexed_iter_mut() {
                let idx = ndarray::Dimension::slice(&idx);
                cell[..=rank].copy_from_slice(idx);
                cell[rank + 1] = 0;
                let n = indicator.shape()[d + 1];
                if (1..=rank).any(|a| cell[a] >= indicator.shape()[a] && a != d + 1) {
                    continue;
                }
                let upper = if cell[d + 1] < n { indicator[cell.as_slice()] } else { 0. };
                let lower = if cell[d + 1] > 0 {
                    cell[d + 1] -= 1;
                    indicator[cell.as_slice()]
                } else {
                    0.
                };
                *t = upper.max(lower);
            }

            Zip::from(velocity.index_axis_mut(last, d))
                .and(&touched)
                .and(face_mask.index_axis(last, d))
                .for_each(|v, &t, &open| {
                    if t > 0. && open == 0. {
                        *v = obstacle_velocity[d];
                    }
                });
        }
    }

    velocity
}
