// Semi-Lagrangian advection on the staggered grid

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::{
    ScalarField,
    sim::field::{Field, StaggeredField},
};

/// Multilinear interpolation of a spatial array at fractional index
/// coordinates, clamped to the first `extent[a]` samples of every axis.
fn interpolate(values: &ArrayViewD<'_, f32>, coords: &[f32], extent: &[usize]) -> f32 {
    let rank = coords.len();
    let mut base = vec![0usize; rank];
    let mut upper = vec![0usize; rank];
    let mut weight = vec![0f32; rank];

    for a in 0..rank {
        let max = (extent[a] - 1) as f32;
        let c = coords[a].clamp(0., max);
        let i = (c.floor() as usize).min(extent[a] - 1);
        base[a] = i;
        upper[a] = (i + 1).min(extent[a] - 1);
        weight[a] = c - i as f32;
    }

    let mut corner = vec![0usize; rank];
    let mut total = 0.;
    for bits in 0..(1usize << rank) {
        let mut w = 1.;
        for a in 0..rank {
            if bits >> a & 1 == 1 {
                corner[a] = upper[a];
                w *= weight[a];
            } else {
                corner[a] = base[a];
                w *= 1. - weight[a];
            }
        }
        if w != 0. {
            total += w * values[corner.as_slice()];
        }
    }
    total
}

/// Velocity at a point given in cell units, where cell `i` spans `[i, i + 1)`
fn sample_velocity(velocity: &[ArrayViewD<'_, f32>], resolution: &[usize], point: &[f32]) -> Vec<f32> {
    let rank = resolution.len();
    let mut coords = vec![0f32; rank];
    let mut extent = vec![0usize; rank];

    (0..rank)
        .map(|d| {
            for a in 0..rank {
                // component d sits on integer positions along d and on cell centres elsewhere
                if a == d {
                    coords[a] = point[a];
                    extent[a] = resolution[a] + 1;
                } else {
                    coords[a] = point[a] - 0.5;
                    extent[a] = resolution[a];
                }
            }
            interpolate(&velocity[d], &coords, &extent)
        })
        .collect()
}

/// Per-batch, per-component views of a staggered field
fn components(velocity: &StaggeredField, b: usize) -> Vec<ArrayViewD<'_, f32>> {
    (0..velocity.rank())
        .map(|d| velocity.component(d).index_axis_move(Axis(0), b))
        .collect()
}

/// Transport a centered field along `velocity` for `dt`.
///
/// Parameters
/// - `velocity` - The transporting velocity
/// - `field` - A `[batch, spatial.., channels]` field
/// - `dt` - The time step
/// - `dx` - The cell size
pub fn advect_centered(velocity: &StaggeredField, field: &ScalarField, dt: f32, dx: f32) -> ScalarField {
    let resolution = velocity.resolution();
    let rank = resolution.len();

    let mut out: ScalarField = ArrayD::zeros(field.raw_dim());
    let mut point = vec![0f32; rank];
    let mut coords = vec![0f32; rank];

    for b in 0..field.shape()[0] {
        let velocity_b = components(velocity, b);
        let field_b = field.index_axis(Axis(0), b);
        let channels: Vec<ArrayViewD<'_, f32>> = (0..field.shape()[rank + 1])
            .map(|c| field_b.index_axis(Axis(rank), c))
            .collect();

        for (idx, value) in out.index_axis_mut(Axis(0), b).indexed_iter_mut() {
            let idx = ndarray::Dimension::slice(&idx);
            for a in 0..rank {
                point[a] = idx[a] as f32 + 0.5;
            }
            let v = sample_velocity(&velocity_b, &resolution, &point);
            for a in 0..rank {
                coords[a] = point[a] - dt * v[a] / dx - 0.5;
            }
            *value = interpolate(&channels[idx[rank]], &coords, &resolution);
        }
    }

    out
}

/// Transport a staggered field along `velocity` for `dt`; with `field`
/// equal to `velocity` this is self-advection.
pub fn advect_staggered(
    velocity: &StaggeredField,
    field: &StaggeredField,
    dt: f32,
    dx: f32,
) -> StaggeredField {
    let resolution = velocity.resolution();
    let rank = resolution.len();

    let mut out: ArrayD<f32> = ArrayD::zeros(field.data().raw_dim());
    let mut point = vec![0f32; rank];
    let mut coords = vec![0f32; rank];
    let mut extent = vec![0usize; rank];

    for b in 0..field.batch_size() {
        let velocity_b = components(velocity, b);
        let field_b = components(field, b);

        for (idx, value) in out.index_axis_mut(Axis(0), b).indexed_iter_mut() {
            let idx = ndarray::Dimension::slice(&idx);
            let d = idx[rank];
            for a in 0..rank {
                point[a] = if a == d { idx[a] as f32 } else { idx[a] as f32 + 0.5 };
            }
            let v = sample_velocity(&velocity_b, &resolution, &point);
            for a in 0..rank {
                let traced = point[a] - dt * v[a] / dx;
                if a == d {
                    coords[a] = traced;
                    extent[a] = resolution[a] + 1;
                } else {
                    coords[a] = traced - 0.5;
                    extent[a] = resolution[a];
                }
            }
            *value = interpolate(&field_b[d], &coords, &extent);
        }
    }

    StaggeredField::new(out)
}

/// Transport any field along `velocity` for `dt`
pub fn advect(velocity: &StaggeredField, field: &Field, dt: f32, dx: f32) -> Field {
    match field {
        Field::Centered(values) => Field::Centered(advect_centered(velocity, values, dt, dx)),
        Field::Staggered(values) => Field::Staggered(advect_staggered(velocity, values, dt, dx)),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;
    use crate::sim::grid::Grid;

    #[test]
    fn test_zero_velocity_is_identity() {
        let grid = Grid::new(vec![5, 4], 1.);
        let velocity = StaggeredField::zeros(&grid, 1);
        let density = Array::from_shape_fn((1, 5, 4, 1), |(_, r, c, _)| (r * 4 + c) as f32).into_dyn();

        let advected = advect_centered(&velocity, &density, 0.7, 1.);

        assert_eq!(advected, density);
    }

    #[test]
    fn test_uniform_flow_shifts_by_one_cell() {
        let grid = Grid::new(vec![6], 0.5);
        let mut velocity = StaggeredField::zeros(&grid, 1);
        velocity.data_mut().fill(0.5);
        let density = Array::from_shape_vec((1, 6, 1), vec![0., 1., 2., 3., 4., 5.])
            .unwrap()
            .into_dyn();

        // 0.5 units/s for 1 s is one 0.5-wide cell
        let advected: Vec<f32> = advect_centered(&velocity, &density, 1., 0.5).iter().copied().collect();

        assert_eq!(advected, vec![0., 0., 1., 2., 3., 4.]);
    }

    #[test]
    fn test_uniform_velocity_self_advection_is_stationary() {
        let grid = Grid::new(vec![4, 4], 1.);
        let mut velocity = StaggeredField::zeros(&grid, 2);
        velocity.data_mut().fill(0.3);

        let advected = advect(&velocity, &Field::Staggered(velocity.clone()), 1., 1.);

        let Field::Staggered(advected) = advected else {
            panic!("layout changed");
        };
        assert!(advected.data().iter().all(|&v| (v - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_interpolation_is_linear() {
        let values = Array::from_shape_fn((3, 3), |(i, j)| (2 * i + j) as f32).into_dyn();
        let view = values.view();

        assert!((interpolate(&view, &[0.5, 0.5], &[3, 3]) - 1.5).abs() < 1e-6);
        assert!((interpolate(&view, &[1.25, 2.], &[3, 3]) - 4.5).abs() < 1e-6);
        // clamped outside
        assert_eq!(interpolate(&view, &[-3., 9.], &[3, 3]), 2.);
    }
}
