// Bounded outward extrapolation across the liquid surface

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::{
    ScalarField,
    sim::{
        field::{Field, StaggeredField},
        mask::create_surface_mask,
        numeric::{self, PadMode},
    },
};

/// Extrapolation reach used before the pressure solve
pub const PROJECTION_EXTRAPOLATION: usize = 2;

/// Extrapolation reach used to feed advection
pub const ADVECTION_EXTRAPOLATION: usize = 30;

/// Build a signed distance field for the grid, negative in liquid cells and
/// positive in empty cells, with the liquid surface at zero. Field values
/// are then carried outward into the empty cells from the nearest liquid.
///
/// This is a bounded relaxation rather than an exact fast-marching pass:
/// every sweep tries all `3^rank - 1` neighbour offsets against the
/// distance at the start of the sweep and keeps the best improvement per
/// cell. Liquid cells are never written. Cells more than `max_steps` away
/// from the surface hold no guaranteed value.
///
/// Parameters:
/// - `field` - Field to extrapolate; a staggered field is treated on its
///   face grid
/// - `mask` - Binary `[batch, spatial.., 1]` liquid mask
/// - `dx` - Grid cell width
/// - `max_steps` - Number of sweeps, i.e. how many cells to extrapolate
///
/// Returns:
/// - `(distance, extrapolated)` where `distance` has the shape of `mask`
pub fn extrapolate(
    field: &Field,
    mask: &ScalarField,
    dx: f32,
    max_steps: usize,
) -> (ScalarField, Field) {
    match field {
        Field::Centered(values) => {
            let (distance, values) = extrapolate_centered(values, mask, dx, max_steps);
            (distance, Field::Centered(values))
        }
        Field::Staggered(velocity) => {
            let (distance, velocity) = extrapolate_staggered(velocity, mask, dx, max_steps);
            (distance, Field::Staggered(velocity))
        }
    }
}

/// `extrapolate` for a `[batch, spatial.., channels]` field
pub fn extrapolate_centered(
    values: &ScalarField,
    mask: &ScalarField,
    dx: f32,
    max_steps: usize,
) -> (ScalarField, ScalarField) {
    relax(values.clone(), mask, dx, max_steps, false)
}

/// `extrapolate` for face velocities
pub fn extrapolate_staggered(
    velocity: &StaggeredField,
    mask: &ScalarField,
    dx: f32,
    max_steps: usize,
) -> (ScalarField, StaggeredField) {
    let rank = numeric::spatial_rank(mask);

    // the face grid has one extra layer on the upper side of every axis
    let mut widths = vec![(0, 0)];
    widths.extend(std::iter::repeat_n((0, 1), rank));
    widths.push((0, 0));
    let face_mask = numeric::pad(mask, &widths, PadMode::Constant(0.));

    let (distance, values) = relax(velocity.data().clone(), &face_mask, dx, max_steps, true);

    let mut shape = distance.shape().to_vec();
    for n in shape[1..=rank].iter_mut() {
        *n -= 1;
    }
    let trimmed = ArrayD::from_shape_fn(IxDyn(&shape), |idx| distance[&idx]);

    (trimmed, StaggeredField::new(values))
}

fn relax(
    mut values: ArrayD<f32>,
    mask: &ScalarField,
    dx: f32,
    max_steps: usize,
    staggered: bool,
) -> (ScalarField, ArrayD<f32>) {
    let rank = numeric::spatial_rank(mask);

    let sign = mask.mapv(|m| -(2. * m - 1.));
    let surface = create_surface_mask(mask);
    let far = 2. * (max_steps as f32 + 1.);
    let mut distance = Zip::from(&sign)
        .and(&surface)
        .map_collect(|&s, &surf| if surf >= 1. { 0. } else { far * s });

    let offsets = numeric::neighbor_offsets(rank);

    // Face values on the lower side of a liquid cell are already valid, so
    // a first pass along the positive axes carries them before the full sweep.
    // The component along the shift axis is left alone.
    if staggered {
        let axis_offsets: Vec<Vec<isize>> = offsets
            .iter()
            .filter(|o| o.iter().all(|&d| d >= 0) && o.iter().filter(|&&d| d == 1).count() == 1)
            .cloned()
            .collect();

        (values, distance) = sweep(&values, &distance, &sign, &axis_offsets, dx, |offset, c| {
            offset[c] == 1
        });
    }

    for _ in 0..max_steps {
        (values, distance) = sweep(&values, &distance, &sign, &offsets, dx, |_, _| false);
    }

    (distance, values)
}

/// One relaxation sweep. All offsets read the starting `values` and
/// `distance`; a cell takes the shifted sample whose candidate distance is
/// smallest in magnitude, provided it beats the current one. Ties go to the
/// earlier offset.
fn sweep(
    values: &ArrayD<f32>,
    distance: &ArrayD<f32>,
    sign: &ArrayD<f32>,
    offsets: &[Vec<isize>],
    dx: f32,
    keep_channel: impl Fn(&[isize], usize) -> bool,
) -> (ArrayD<f32>, ArrayD<f32>) {
    let last = Axis(values.ndim() - 1);
    let mut next_values = values.clone();
    let mut next_distance = distance.clone();

    for offset in offsets {
        let shifted_values = numeric::shift(values, offset);
        let shifted_distance = numeric::shift(distance, offset);
        let step = dx * (offset.iter().map(|d| (d * d) as f32).sum::<f32>()).sqrt();

        Zip::from(next_distance.index_axis_mut(last, 0))
            .and(shifted_distance.index_axis(last, 0))
            .and(sign.index_axis(last, 0))
            .and(next_values.lanes_mut(last))
            .and(shifted_values.lanes(last))
            .for_each(|best, &shifted, &s, mut lane, source| {
                let candidate = shifted + step * s;
                if s >= 0. && candidate.abs() < best.abs() {
                    *best = candidate;
                    for (c, (v, &src)) in lane.iter_mut().zip(source.iter()).enumerate() {
                        if !keep_channel(offset.as_slice(), c) {
                            *v = src;
                        }
                    }
                }
            });
    }

    (next_values, next_distance)
}
