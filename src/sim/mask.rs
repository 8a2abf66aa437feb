// Occupancy masks derived from continuous fields

use ndarray::{ArrayD, Zip};

use crate::sim::numeric;

/// Default relative threshold for `create_binary_mask`
pub const DEFAULT_MASK_THRESHOLD: f32 = 1e-5;

/// Build a binary mask with the same shape as `field`. Wherever `|field|`
/// exceeds `threshold` times the largest magnitude in the field the mask
/// holds `1`, elsewhere `0`. An all-zero field yields an all-zero mask.
///
/// Parameters:
/// - `field` - The field to threshold (any layout)
/// - `threshold` - Threshold relative to the maximum, between 0 and 1
///
/// Returns:
/// - The binary mask
pub fn create_binary_mask(field: &ArrayD<f32>, threshold: f32) -> ArrayD<f32> {
    let f_max = numeric::max_abs(field);
    if f_max == 0. {
        return ArrayD::zeros(field.raw_dim());
    }

    // `+ 0.` folds the -0.0 that ceil produces for small negatives
    field.mapv(|f| ((f.abs() / f_max - threshold).ceil().clamp(0., 1.)) + 0.)
}

/// Mark occupied cells that touch an empty cell along any axis (the inner
/// contour of the occupied region). The array edges are padded with their
/// own values so walls do not read as a surface.
///
/// Parameters:
/// - `mask` - A binary `[batch, spatial.., channels]` occupancy mask
///
/// Returns:
/// - The binary surface mask, same shape as `mask`
pub fn create_surface_mask(mask: &ArrayD<f32>) -> ArrayD<f32> {
    let rank = numeric::spatial_rank(mask);
    let mut surface: ArrayD<f32> = ArrayD::zeros(mask.raw_dim());

    for d in 0..rank {
        for step in [-1isize, 1] {
            // out[x] = mask[x + step * e_d]
            let mut offset = vec![0isize; rank];
            offset[d] = -step;
            let neighbor = numeric::shift(mask, &offset);

            Zip::from(&mut surface)
                .and(mask)
                .and(&neighbor)
                .for_each(|s, &center, &n| *s = s.max(center.max(n) - n));
        }
    }

    surface
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, IxDyn};
    use rand::Rng;

    use super::*;

    #[test]
    fn test_binary_mask_is_exactly_binary() {
        let mut rng = rand::rng();

        for _ in 0..20 {
            let field = ArrayD::from_shape_fn(IxDyn(&[2, 6, 5, 1]), |_| {
                rng.random_range(-3.0f32..3.0)
            });

            let mask = create_binary_mask(&field, 0.5);

            for (m, f) in mask.iter().zip(field.iter()) {
                assert!(m.to_bits() == 0f32.to_bits() || *m == 1.);
                let expected = if f.abs() / numeric::max_abs(&field) > 0.5 { 1. } else { 0. };
                assert_eq!(*m, expected);
            }
        }
    }

    #[test]
    fn test_binary_mask_of_zero_field() {
        let field: ArrayD<f32> = ArrayD::zeros(IxDyn(&[1, 4, 4, 1]));

        let mask = create_binary_mask(&field, DEFAULT_MASK_THRESHOLD);

        assert!(mask.iter().all(|m| *m == 0. && !m.is_nan()));
    }

    #[test]
    fn test_binary_mask_default_threshold_keeps_small_values() {
        let field = Array::from_shape_vec((1, 4, 1), vec![0., 1e-3, -2., 0.])
            .unwrap()
            .into_dyn();

        let mask: Vec<f32> = create_binary_mask(&field, DEFAULT_MASK_THRESHOLD)
            .iter()
            .copied()
            .collect();

        assert_eq!(mask, vec![0., 1., 1., 0.]);
    }

    #[test]
    fn test_surface_mask_checkerboard() {
        let mask = Array::from_shape_fn((1, 4, 4, 1), |(_, r, c, _)| ((r + c) % 2) as f32).into_dyn();

        let surface = create_surface_mask(&mask);

        // every occupied cell touches an empty one
        assert_eq!(surface, mask);
    }

    #[test]
    fn test_surface_mask_block() {
        // 3x3 block of liquid in the middle of a 5x5 grid
        let mask = Array::from_shape_fn((1, 5, 5, 1), |(_, r, c, _)| {
            ((1..4).contains(&r) && (1..4).contains(&c)) as u8 as f32
        })
        .into_dyn();

        let surface = create_surface_mask(&mask);

        for r in 0..5 {
            for c in 0..5 {
                let expected = if r == 2 && c == 2 { 0. } else { mask[[0, r, c, 0]] };
                assert_eq!(surface[[0, r, c, 0]], expected, "at ({r}, {c})");
            }
        }
    }

    #[test]
    fn test_surface_mask_walls_are_not_surface() {
        let mask = Array::from_shape_vec((1, 5, 1), vec![1., 1., 1., 0., 0.])
            .unwrap()
            .into_dyn();

        let surface: Vec<f32> = create_surface_mask(&mask).iter().copied().collect();

        assert_eq!(surface, vec![0., 0., 1., 0., 0.]);
    }

    #[test]
    fn test_surface_mask_rotation_invariant() {
        let mut rng = rand::rng();
        let half = Array::from_shape_fn((3, 6), |_| rng.random_bool(0.5) as u8 as f32);

        // point-symmetric pattern: the lower half is the upper half rotated by 180°
        let mask = Array::from_shape_fn((1, 6, 6, 1), |(_, r, c, _)| {
            if r < 3 { half[[r, c]] } else { half[[5 - r, 5 - c]] }
        })
        .into_dyn();

        let surface = create_surface_mask(&mask);

        for r in 0..6 {
            for c in 0..6 {
                assert_eq!(surface[[0, r, c, 0]], surface[[0, 5 - r, 5 - c, 0]]);
            }
        }
    }
}
