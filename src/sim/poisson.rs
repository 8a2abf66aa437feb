// Iterative solver for the pressure poisson equation.

use argmin::{
    core::{Executor, Operator, State},
    solver::conjugategradient::ConjugateGradient,
};
use na::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    LiquidError, LiquidResult, ScalarField,
    sim::{domain::DomainCache, grid::Boundary},
};

pub const TARGET_CG_COST: f32 = 1e-5; // maximum residual norm in conjugate-gradient solve
pub const MAX_CG_ITER: u64 = 10_000; // maximum number of iterations for conjugate-gradient

/// Pressure along with the work it took to find it.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureSolveResult {
    /// `[batch, spatial.., 1]` pressure
    pub pressure: ScalarField,

    /// Iterations used; the maximum over the batch
    pub iterations: u64,
}

/// Solves ∇²p = ∇⋅u on the liquid cells of a domain.
///
/// Running out of iterations is not an error: the best pressure found is
/// returned and the iteration count tells the caller what happened.
pub trait LinearSolver: Send + Sync {
    fn solve(
        &self,
        divergence: &ScalarField,
        domain_cache: &DomainCache,
        initial_guess: Option<&ScalarField>,
    ) -> LiquidResult<PressureSolveResult>;
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f32>,
}

impl Operator for ConjugateGradientOperator<'_> {
    type Param = Vec<f32>;
    type Output = Vec<f32>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok((self.a * DVector::from_vec(x.to_vec()))
            .data
            .as_vec()
            .clone())
    }
}

/// Sparse conjugate-gradient pressure solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseCg {
    pub max_iterations: u64,
    pub target_cost: f32,
}

impl Default for SparseCg {
    fn default() -> Self {
        SparseCg {
            max_iterations: MAX_CG_ITER,
            target_cost: TARGET_CG_COST,
        }
    }
}

/// Classification of a cell for the pressure solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Liquid,
    Air,
    Solid,
}

impl SparseCg {
    /// Solve a single batch entry. `cells`, `divergence` and `guess` are
    /// flattened in row-major order over `resolution`.
    fn solve_entry(
        &self,
        resolution: &[usize],
        cells: &[Cell],
        divergence: &[f32],
        guess: Option<Vec<f32>>,
        boundary: Boundary,
        dx: f32,
    ) -> LiquidResult<(Vec<f32>, u64)> {
        let n = cells.len();
        let rank = resolution.len();

        let mut strides = vec![1usize; rank];
        for a in (0..rank.saturating_sub(1)).rev() {
            strides[a] = strides[a + 1] * resolution[a + 1];
        }

        // neighbours of cell k as (index, None for outside the box)
        let neighbors = |k: usize| {
            let mut out = Vec::with_capacity(2 * rank);
            for a in 0..rank {
                let i = (k / strides[a]) % resolution[a];
                out.push(if i > 0 { Some(k - strides[a]) } else { None });
                out.push(if i + 1 < resolution[a] { Some(k + strides[a]) } else { None });
            }
            out
        };

        // a liquid region with no zero-pressure neighbour only defines p up to
        // a constant, so pin its first cell
        let dirichlet = |nb: Option<usize>| match nb {
            None => boundary == Boundary::Open,
            Some(m) => cells[m] == Cell::Air,
        };
        let mut pinned = vec![false; n];
        let mut visited = vec![false; n];
        let mut stack = Vec::new();
        for first in 0..n {
            if cells[first] != Cell::Liquid || visited[first] {
                continue;
            }

            // flood fill the connected liquid region starting at `first`
            let mut touches_dirichlet = false;
            visited[first] = true;
            stack.push(first);
            while let Some(k) = stack.pop() {
                for nb in neighbors(k) {
                    touches_dirichlet |= dirichlet(nb);
                    if let Some(m) = nb {
                        if cells[m] == Cell::Liquid && !visited[m] {
                            visited[m] = true;
                            stack.push(m);
                        }
                    }
                }
            }
            pinned[first] = !touches_dirichlet;
        }

        // start with a coordinate sparse rep for easy loading; convert to compressed sparse-row after
        let mut a_coo: CooMatrix<f32> = CooMatrix::new(n, n);
        let mut b: Vec<f32> = vec![0.; n];

        for k in 0..n {
            // Dirichlet condition that p=0 outside the liquid
            if cells[k] != Cell::Liquid || pinned[k] {
                a_coo.push(k, k, 1.);
                continue;
            }

            let mut diagonal = 0.;
            for nb in neighbors(k) {
                match nb {
                    // closed walls and solids are Neumann: dp/dn = 0
                    None if boundary == Boundary::Closed => {}
                    None => diagonal += 1.,
                    Some(m) => match cells[m] {
                        Cell::Solid => {}
                        Cell::Air => diagonal += 1.,
                        Cell::Liquid if pinned[m] => diagonal += 1.,
                        Cell::Liquid => {
                            diagonal += 1.;
                            a_coo.push(k, m, -1.);
                        }
                    },
                }
            }

            // add center coefficient at the end
            a_coo.push(k, k, diagonal);
            b[k] = -divergence[k] * dx.powi(2);
        }

        if b.iter().all(|&v| v == 0.) {
            return Ok((vec![0.; n], 0));
        }

        let a_csr = CsrMatrix::from(&a_coo); // convert to csr sparse

        // solve system
        let solver: ConjugateGradient<Vec<f32>, f32> = ConjugateGradient::new(b);
        let initial_guess: Vec<f32> = guess.unwrap_or_else(|| vec![0.0; n]);
        let operator = ConjugateGradientOperator { a: &a_csr };

        let res = Executor::new(operator, solver)
            .configure(|state| {
                state
                    .param(initial_guess)
                    .max_iters(self.max_iterations)
                    .target_cost(self.target_cost)
            })
            .run()
            .map_err(|err| LiquidError::Solver(err.to_string()))?;

        let iterations = res.state().get_iter();
        let best_param = res
            .state()
            .best_param
            .as_ref()
            .ok_or_else(|| LiquidError::Solver("conjugate gradient produced no estimate".into()))?
            .to_owned();

        Ok((best_param, iterations))
    }
}

impl LinearSolver for SparseCg {
    fn solve(
        &self,
        divergence: &ScalarField,
        domain_cache: &DomainCache,
        initial_guess: Option<&ScalarField>,
    ) -> LiquidResult<PressureSolveResult> {
        let grid = domain_cache.grid();
        let batch = divergence.shape()[0];
        let expected = grid.shape(batch, 1);
        if divergence.shape() != expected.as_slice() {
            return Err(LiquidError::ShapeMismatch {
                field: "divergence",
                expected,
                found: divergence.shape().to_vec(),
            });
        }

        let mut pressure: Vec<f32> = Vec::with_capacity(divergence.len());
        let mut iterations = 0;

        for b in 0..batch {
            let active = domain_cache.active().index_axis(Axis(0), b);
            let accessible = domain_cache.accessible().index_axis(Axis(0), b);
            let cells: Vec<Cell> = active
                .iter()
                .zip(accessible.iter())
                .map(|(&a, &s)| match (a > 0., s > 0.) {
                    (_, false) => Cell::Solid,
                    (true, true) => Cell::Liquid,
                    (false, true) => Cell::Air,
                })
                .collect();

            let div: Vec<f32> = divergence.index_axis(Axis(0), b).iter().copied().collect();
            let guess = initial_guess.map(|g| g.index_axis(Axis(0), b).iter().copied().collect());

            let (p, iter) = self.solve_entry(
                grid.resolution(),
                &cells,
                &div,
                guess,
                domain_cache.domain().boundary,
                grid.dx(),
            )?;

            if iter >= self.max_iterations {
                warn!(batch = b, iterations = iter, "pressure solve did not converge");
            }
            iterations = iterations.max(iter);
            pressure.extend(p);
        }

        debug!(iterations, "pressure solve finished");

        let pressure = ArrayD::from_shape_vec(IxDyn(&grid.shape(batch, 1)), pressure)
            .map_err(|err| LiquidError::Solver(err.to_string()))?;

        Ok(PressureSolveResult {
            pressure,
            iterations,
        })
    }
}
