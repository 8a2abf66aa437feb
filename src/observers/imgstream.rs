use std::{error::Error, fs, path::Path, sync::mpsc};

use image::{GrayImage, Luma};
use ndarray::{Array2, Axis, Ix2};
use tracing::warn;

use crate::ScalarField;

#[derive(Clone)]
pub struct DisplayPacket {
    /// Density of the first batch entry, rows along the vertical axis
    pub density: Array2<f32>,
    pub i: usize,
}

impl DisplayPacket {
    /// Take the first batch entry of a 2-D density field; `None` for other ranks
    pub fn from_density(density: &ScalarField, i: usize) -> Option<Self> {
        if density.ndim() != 4 {
            return None;
        }

        let plane = density
            .index_axis(Axis(0), 0)
            .index_axis_move(Axis(2), 0)
            .into_dimensionality::<Ix2>()
            .ok()?;

        Some(DisplayPacket {
            density: plane.to_owned(),
            i,
        })
    }
}

/// Write a density plane as a grayscale PNG, full liquid white. The
/// vertical axis points up in the image.
pub fn image_save(bitmap: &Array2<f32>, filename: &str, frames_dir: &Path) -> Result<(), Box<dyn Error>> {
    let (rows, cols) = bitmap.dim();

    let filename = frames_dir.join(filename);

    let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let pixel_mag = bitmap[[rows - 1 - y as usize, x as usize]].clamp(0., 1.);
        Luma([(254.0 * pixel_mag).floor() as u8])
    });
    image.save(filename)?;

    Ok(())
}

/// Save every inbound packet until the sender hangs up
pub fn image_io_loop(
    inbound_bitmaps: mpsc::Receiver<DisplayPacket>,
    frames_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    if frames_dir.exists() {
        fs::remove_dir_all(frames_dir)?;
    }
    fs::create_dir_all(frames_dir)?;

    for inbound in inbound_bitmaps {
        image_save(&inbound.density, format!("{}.png", inbound.i).as_str(), frames_dir)
            .inspect_err(|err| warn!("Image save failed: {:?}", err))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn test_packet_only_for_2d() {
        let density: ScalarField = ArrayD::ones(IxDyn(&[2, 3, 4, 1]));
        let packet = DisplayPacket::from_density(&density, 7).unwrap();
        assert_eq!(packet.density.dim(), (3, 4));
        assert_eq!(packet.i, 7);

        let line: ScalarField = ArrayD::ones(IxDyn(&[1, 5, 1]));
        assert!(DisplayPacket::from_density(&line, 0).is_none());
    }
}
