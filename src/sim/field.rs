// Centered and staggered field containers

use std::ops::Sub;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::{
    ScalarField,
    sim::{
        grid::{Boundary, Grid},
        numeric::{self, PadMode},
    },
};

/// A vector field sampled on cell faces.
///
/// The data is laid out as `[batch, n_0 + 1, .., n_{r-1} + 1, rank]`.
/// Channel `d` at index `i` holds the component along axis `d` on the
/// lower face of cell `i`; index `n_d` along axis `d` is the upper wall.
#[derive(Debug, Clone, PartialEq)]
pub struct StaggeredField {
    data: ArrayD<f32>,
}

impl StaggeredField {
    pub fn new(data: ArrayD<f32>) -> Self {
        StaggeredField { data }
    }

    pub fn zeros(grid: &Grid, batch: usize) -> Self {
        StaggeredField::new(ArrayD::zeros(IxDyn(&grid.staggered_shape(batch))))
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn rank(&self) -> usize {
        self.data.ndim() - 2
    }

    pub fn batch_size(&self) -> usize {
        self.data.shape()[0]
    }

    /// Cells per axis of the grid this field lives on
    pub fn resolution(&self) -> Vec<usize> {
        self.data.shape()[1..=self.rank()]
            .iter()
            .map(|n| n - 1)
            .collect()
    }

    /// The `[batch, n_0 + 1, ..]` samples of the component along `axis`
    pub fn component(&self, axis: usize) -> ArrayViewD<'_, f32> {
        self.data.index_axis(Axis(self.data.ndim() - 1), axis)
    }

    /// Compute the divergence ∇⋅u of the face velocities, i.e. the net
    /// outflow of each cell.
    ///
    /// Parameters:
    /// - `dx` - The cell size
    ///
    /// Returns:
    ///     A `[batch, spatial.., 1]` field of the divergence.
    pub fn divergence(&self, dx: f32) -> ScalarField {
        let rank = self.rank();
        let mut shape = vec![self.batch_size()];
        shape.extend(self.resolution());
        shape.push(1);

        let mut upper = vec![0usize; rank + 2];
        let mut lower = vec![0usize; rank + 2];
        ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let idx = ndarray::Dimension::slice(&idx);
            let mut div = 0.;
            for d in 0..rank {
                lower.copy_from_slice(idx);
                lower[rank + 1] = d;
                upper.copy_from_slice(&lower);
                upper[d + 1] += 1;
                div += self.data[upper.as_slice()] - self.data[lower.as_slice()];
            }
            div / dx
        })
    }

    /// Compute the face-centred gradient ∇p of a centered scalar field.
    /// Wall faces see the pressure mirrored for closed walls and zero
    /// pressure outside open walls.
    ///
    /// Parameters:
    /// - `pressure` - A `[batch, spatial.., 1]` field
    /// - `dx` - The cell size
    /// - `boundary` - The wall behaviour of the domain
    ///
    /// Returns:
    ///     A `StaggeredField` of the gradient.
    pub fn gradient(pressure: &ScalarField, dx: f32, boundary: Boundary) -> Self {
        let rank = numeric::spatial_rank(pressure);
        let mode = match boundary {
            Boundary::Closed => PadMode::Symmetric,
            Boundary::Open => PadMode::Constant(0.),
        };

        let mut widths = vec![(0, 0)];
        widths.extend(std::iter::repeat_n((1, 1), rank));
        widths.push((0, 0));
        let padded = numeric::pad(pressure, &widths, mode);

        let mut shape = pressure.shape().to_vec();
        for n in shape[1..=rank].iter_mut() {
            *n += 1;
        }
        shape[rank + 1] = rank;

        let mut upper = vec![0usize; rank + 2];
        let mut lower = vec![0usize; rank + 2];
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let idx = ndarray::Dimension::slice(&idx);
            let d = idx[rank + 1];

            // faces beyond the last cell on a tangential axis carry nothing
            if (1..=rank).any(|a| a != d + 1 && idx[a] + 1 == shape[a]) {
                return 0.;
            }

            // padded index of the upper cell is i + 1 along every axis except d,
            // where the face i sits between padded cells i and i + 1
            upper.copy_from_slice(idx);
            upper[rank + 1] = 0;
            for a in 1..=rank {
                if a != d + 1 {
                    upper[a] += 1;
                }
            }
            lower.copy_from_slice(&upper);
            upper[d + 1] += 1;
            (padded[upper.as_slice()] - padded[lower.as_slice()]) / dx
        });

        StaggeredField::new(data)
    }
}

impl Sub<&StaggeredField> for &StaggeredField {
    type Output = StaggeredField;

    fn sub(self, rhs: &StaggeredField) -> StaggeredField {
        StaggeredField::new(&self.data - &rhs.data)
    }
}

/// Either sampling layout a field can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// One sample per cell, `[batch, spatial.., channels]`
    Centered(ScalarField),

    /// One sample per face and axis
    Staggered(StaggeredField),
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;

    #[test]
    fn test_divergence_of_uniform_flow_is_zero_inside() {
        let grid = Grid::new(vec![3, 4], 1.);
        let mut velocity = StaggeredField::zeros(&grid, 1);
        velocity.data_mut().fill(2.);

        let div = velocity.divergence(1.);

        assert_eq!(div.shape(), &[1, 3, 4, 1]);
        assert!(div.iter().all(|&d| d == 0.));
    }

    #[test]
    fn test_divergence_1d() {
        let data = Array::from_shape_vec((1, 5, 1), vec![0., 1., 3., 3., 0.])
            .unwrap()
            .into_dyn();
        let velocity = StaggeredField::new(data);

        let div: Vec<f32> = velocity.divergence(0.5).iter().copied().collect();

        assert_eq!(div, vec![2., 4., 0., -6.]);
    }

    #[test]
    fn test_gradient_walls() {
        let pressure = Array::from_shape_vec((1, 3, 1), vec![1., 2., 4.])
            .unwrap()
            .into_dyn();

        let closed = StaggeredField::gradient(&pressure, 1., Boundary::Closed);
        let closed: Vec<f32> = closed.data().iter().copied().collect();
        assert_eq!(closed, vec![0., 1., 2., 0.]);

        let open = StaggeredField::gradient(&pressure, 1., Boundary::Open);
        let open: Vec<f32> = open.data().iter().copied().collect();
        assert_eq!(open, vec![1., 1., 2., -4.]);
    }

    #[test]
    fn test_gradient_2d_components() {
        // p = row index
        let pressure = Array::from_shape_fn((1, 3, 2, 1), |(_, r, _, _)| r as f32).into_dyn();

        let grad = StaggeredField::gradient(&pressure, 1., Boundary::Closed);

        assert_eq!(grad.shape(), &[1, 4, 3, 2]);
        // interior faces along axis 0 see a unit slope, walls see none
        assert_eq!(grad.data()[[0, 1, 0, 0]], 1.);
        assert_eq!(grad.data()[[0, 2, 1, 0]], 1.);
        assert_eq!(grad.data()[[0, 0, 1, 0]], 0.);
        assert_eq!(grad.data()[[0, 3, 1, 0]], 0.);
        // no slope along axis 1
        assert!(grad.component(1).iter().all(|&g| g == 0.));
    }
}
