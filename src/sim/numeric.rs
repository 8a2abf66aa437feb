// Numeric approximations and whole-array operations

use ndarray::{ArrayD, Axis, Dimension, IxDyn};

use crate::ScalarField;

/// How values outside an array are filled in when padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadMode {
    /// Fill with a constant value
    Constant(f32),

    /// Mirror the array, repeating the edge value first
    Symmetric,
}

/// Number of spatial axes in a `[batch, spatial.., channels]` array
pub fn spatial_rank(field: &ArrayD<f32>) -> usize {
    field.ndim() - 2
}

/// Largest absolute value in the array, `0` if empty
pub fn max_abs(field: &ArrayD<f32>) -> f32 {
    field.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
}

/// Pad every axis of an array.
///
/// Parameters:
/// - `field` - The array to pad
/// - `widths` - `(before, after)` padding per axis
/// - `mode` - How to fill the new entries
///
/// Returns:
/// - The padded array
pub fn pad(field: &ArrayD<f32>, widths: &[(usize, usize)], mode: PadMode) -> ArrayD<f32> {
    assert_eq!(widths.len(), field.ndim(), "one padding pair per axis");

    let source_shape = field.shape().to_vec();
    let shape: Vec<usize> = source_shape
        .iter()
        .zip(widths)
        .map(|(n, (before, after))| n + before + after)
        .collect();

    let mut source = vec![0usize; field.ndim()];
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        for (axis, &i) in idx.slice().iter().enumerate() {
            let n = source_shape[axis] as isize;
            let j = i as isize - widths[axis].0 as isize;

            if (0..n).contains(&j) {
                source[axis] = j as usize;
                continue;
            }

            match mode {
                PadMode::Constant(value) => return value,
                PadMode::Symmetric => {
                    let mirrored = if j < 0 { -j - 1 } else { 2 * n - j - 1 };
                    source[axis] = mirrored.clamp(0, n - 1) as usize;
                }
            }
        }
        field[source.as_slice()]
    })
}

/// Shift a `[batch, spatial.., channels]` array by one step along `offset`,
/// such that `out[x] = field[x - offset]`. Samples that would come from
/// outside the array repeat the edge value (a width-one symmetric pad).
///
/// Parameters:
/// - `field` - The array to shift
/// - `offset` - The per-spatial-axis shift, each in `{-1, 0, 1}`
///
/// Returns:
/// - The shifted array, same shape as `field`
pub fn shift(field: &ArrayD<f32>, offset: &[isize]) -> ArrayD<f32> {
    debug_assert_eq!(offset.len(), spatial_rank(field));

    let shape = field.shape().to_vec();
    let mut source = vec![0usize; field.ndim()];
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        let idx = idx.slice();
        source.copy_from_slice(idx);
        for (a, &d) in offset.iter().enumerate() {
            let n = shape[a + 1] as isize;
            source[a + 1] = (idx[a + 1] as isize - d).clamp(0, n - 1) as usize;
        }
        field[source.as_slice()]
    })
}

/// All nonzero offsets in `{-1, 0, 1}^rank`, diagonals included, in
/// lexicographic order.
pub fn neighbor_offsets(rank: usize) -> Vec<Vec<isize>> {
    let mut offsets: Vec<Vec<isize>> = vec![vec![]];
    for _ in 0..rank {
        offsets = offsets
            .into_iter()
            .flat_map(|prefix| {
                [-1, 0, 1].into_iter().map(move |d| {
                    let mut next = prefix.clone();
                    next.push(d);
                    next
                })
            })
            .collect();
    }
    offsets.retain(|o| o.iter().any(|&d| d != 0));
    offsets
}

/// Compute the finite-difference gradient of an array along one axis.
/// Uses a central finite difference for interior nodes and a first-order
/// forward/backward (depends on side) finite difference for edge nodes.
///
/// Parameters:
/// - `field` - The array to take the gradient of
/// - `axis` - The array axis to differentiate along
/// - `dx` - The size of the elements along that axis
///
/// Returns:
/// - An array with the finite difference of each element
pub fn gradient_axis(field: &ArrayD<f32>, axis: usize, dx: f32) -> ArrayD<f32> {
    let mut df: ArrayD<f32> = ArrayD::zeros(field.raw_dim());
    let n = field.shape()[axis];
    if n < 2 {
        return df;
    }

    for (mut out, lane) in df
        .lanes_mut(Axis(axis))
        .into_iter()
        .zip(field.lanes(Axis(axis)))
    {
        // set interior nodes
        for i in 1..(n - 1) {
            out[i] = (lane[i + 1] - lane[i - 1]) / (2.0 * dx);
        }

        // set edge nodes
        out[0] = (lane[1] - lane[0]) / dx;
        out[n - 1] = (lane[n - 1] - lane[n - 2]) / dx;
    }

    df
}

/// Compute the divergence of a centered vector field F, i.e. ∇⋅F, with
/// central differences.
///
/// Parameters:
/// - `field` - A `[batch, spatial.., rank]` field; channel `d` is the
///   component along spatial axis `d`
/// - `dx` - The cell size
///
/// Returns:
///     A `[batch, spatial.., 1]` field of the divergence.
pub fn central_divergence(field: &ArrayD<f32>, dx: f32) -> ScalarField {
    let last = Axis(field.ndim() - 1);
    let mut div: ArrayD<f32> = field.index_axis(last, 0).to_owned();
    div.fill(0.);

    for d in 0..spatial_rank(field) {
        let component = field.index_axis(last, d).to_owned();
        div += &gradient_axis(&component, d + 1, dx);
    }

    div.insert_axis(last)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, array};

    use super::*;

    #[test]
    fn test_divergence() {
        let field_x = array![
            [1., 5., 2., 1., 6.],
            [5., 4., 3., 0., 2.],
            [2., 8., 2., 9., 8.],
            [9., 2., 5., 2., 3.],
            [5., 2., 2., 1., 7.],
        ];

        let field_y = array![
            [7., 0., 3., 8., 1.],
            [4., 2., 9., 6., 0.],
            [5., 1., 4., 7., 3.],
            [2., 8., 0., 5., 9.],
            [6., 3., 7., 2., 1.],
        ];

        // axis 0 runs along rows (y), axis 1 along columns (x)
        let field = Array::from_shape_fn((1, 5, 5, 2), |(_, r, c, ch)| {
            if ch == 0 { field_y[[r, c]] } else { field_x[[r, c]] }
        })
        .into_dyn();

        let expected_div = array![
            [2., 5., 8., 0., 8.],
            [-4., -1., -3., -2., 6.],
            [10., 6., -8., 5., 7.],
            [-13., -2., 3., -7., 0.],
            [2., -13., 13., -1., -4.],
        ];

        let actual_div = central_divergence(&field, 0.5);

        assert_eq!(actual_div.shape(), &[1, 5, 5, 1]);
        for ((r, c), expected) in expected_div.indexed_iter() {
            assert_eq!(actual_div[[0, r, c, 0]], *expected, "at ({r}, {c})");
        }
    }

    #[test]
    fn test_symmetric_pad_repeats_edges() {
        let field = array![[[1.], [2.], [3.]]].into_dyn();

        let padded = pad(&field, &[(0, 0), (2, 1), (0, 0)], PadMode::Symmetric);
        let values: Vec<f32> = padded.iter().copied().collect();
        assert_eq!(values, vec![2., 1., 1., 2., 3., 3.]);

        let padded = pad(&field, &[(0, 0), (0, 1), (0, 0)], PadMode::Constant(0.));
        let values: Vec<f32> = padded.iter().copied().collect();
        assert_eq!(values, vec![1., 2., 3., 0.]);
    }

    #[test]
    fn test_shift_clamps_at_edges() {
        let field = array![[[1.], [2.], [3.]]].into_dyn();

        let up: Vec<f32> = shift(&field, &[1]).iter().copied().collect();
        let down: Vec<f32> = shift(&field, &[-1]).iter().copied().collect();

        assert_eq!(up, vec![1., 1., 2.]);
        assert_eq!(down, vec![2., 3., 3.]);
    }

    #[test]
    fn test_neighbor_offsets() {
        assert_eq!(neighbor_offsets(1), vec![vec![-1], vec![1]]);

        let offsets = neighbor_offsets(2);
        assert_eq!(offsets.len(), 8);
        assert!(!offsets.contains(&vec![0, 0]));
        assert_eq!(neighbor_offsets(3).len(), 26);
    }
}
