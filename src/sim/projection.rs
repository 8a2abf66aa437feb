// Pressure projection onto divergence-free velocities

use tracing::debug;

use crate::{
    LiquidError, LiquidResult, ScalarField,
    sim::{
        domain::DomainCache,
        extrapolate::{PROJECTION_EXTRAPOLATION, extrapolate_staggered},
        field::{Field, StaggeredField},
        liquid::LiquidState,
        numeric,
        poisson::{LinearSolver, PressureSolveResult},
    },
};

/// What to compute a pressure for
#[derive(Debug, Clone, Copy)]
pub enum PressureSource<'a> {
    /// The velocity of a liquid state
    State(&'a LiquidState),

    /// A staggered velocity, or a centered velocity with one channel per axis
    Field(&'a Field),
}

/// Side channel for the last pressure solve of a projection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub last_pressure: Option<ScalarField>,
    pub last_pressure_iterations: Option<u64>,
}

/// Calculate the pressure that removes the divergence of a velocity.
///
/// Parameters
/// - `source` - A state, staggered velocity, or centered velocity whose
///   divergence is taken with central differences
/// - `domain_cache` - The liquid and obstacle masks
/// - `solver` - The linear solver to use
///
/// Returns
/// - The pressure and solver iteration count, or `InvalidFieldShape` when
///   the field matches neither velocity layout
pub fn solve_pressure(
    source: PressureSource<'_>,
    domain_cache: &DomainCache,
    solver: &dyn LinearSolver,
) -> LiquidResult<PressureSolveResult> {
    let grid = domain_cache.grid();
    let dx = grid.dx();
    let rank = grid.rank();

    let divergence = match source {
        PressureSource::State(state) => state.velocity().divergence(dx),
        PressureSource::Field(Field::Staggered(velocity)) => {
            if velocity.shape() != grid.staggered_shape(velocity.batch_size()).as_slice() {
                return Err(LiquidError::InvalidFieldShape {
                    shape: velocity.shape().to_vec(),
                    rank,
                });
            }
            velocity.divergence(dx)
        }
        PressureSource::Field(Field::Centered(values)) => {
            let shape = values.shape();
            if shape.len() != rank + 2 || shape != grid.shape(shape[0], rank).as_slice() {
                return Err(LiquidError::InvalidFieldShape {
                    shape: shape.to_vec(),
                    rank,
                });
            }
            numeric::central_divergence(values, dx)
        }
    };

    solver.solve(&divergence, domain_cache, None)
}

/// Project a velocity so it is divergence free in the liquid and does not
/// flow into solids.
///
/// The velocity is first carried two cells past the surface so the solve
/// sees sensible values there, then the pressure gradient is subtracted
/// from the incoming velocity and the boundary conditions reapplied.
///
/// Parameters
/// - `velocity` - The velocity to project
/// - `domain_cache` - The liquid and obstacle masks
/// - `solver` - The linear solver to use
/// - `diagnostics` - Receives the pressure and iteration count when given
pub fn make_divergence_free(
    velocity: &StaggeredField,
    domain_cache: &DomainCache,
    solver: &dyn LinearSolver,
    diagnostics: Option<&mut Diagnostics>,
) -> LiquidResult<StaggeredField> {
    let grid = domain_cache.grid();

    let (_, extrapolated) =
        extrapolate_staggered(velocity, domain_cache.active(), 1., PROJECTION_EXTRAPOLATION);
    let extrapolated = Field::Staggered(domain_cache.with_hard_boundary_conditions(&extrapolated));

    let PressureSolveResult {
        pressure,
        iterations,
    } = solve_pressure(PressureSource::Field(&extrapolated), domain_cache, solver)?;
    debug!(iterations, "projected velocity");

    let gradient = StaggeredField::gradient(&pressure, grid.dx(), domain_cache.domain().boundary);
    let projected = domain_cache.with_hard_boundary_conditions(&(velocity - &gradient));

    if let Some(diagnostics) = diagnostics {
        diagnostics.last_pressure = Some(pressure);
        diagnostics.last_pressure_iterations = Some(iterations);
    }

    Ok(projected)
}
