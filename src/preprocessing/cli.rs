use std::{
    error::Error,
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
};

use clap::Parser;
use tracing::{error, info};

use crate::{
    preprocessing::{FrameSettings, GeometryInput, SimulationInput},
    sim::{
        grid::Boundary,
        liquid::{EARTH_GRAVITY, Gravity, StepSettings},
        poisson::SparseCg,
    },
};

// Raw, CLI input
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    #[arg(long, help = "An input file with pre-loaded scene parameters.")]
    input_json: Option<PathBuf>,

    #[arg(long, help = "Optional path to save the resolved input file to.")]
    input_json_savepath: Option<PathBuf>,

    #[arg(
        long,
        help = "An optional directory where density frames (2-D only) should be saved."
    )]
    frames_dir: Option<PathBuf>,

    #[arg(long, help = "Cells along the vertical axis.", default_value = "32")]
    ny: usize,

    #[arg(long, help = "Cells along the horizontal axis.", default_value = "32")]
    nx: usize,

    #[arg(long, help = "Cell size in m.", default_value = "0.1")]
    dx: f32,

    #[arg(long, help = "Time step in s.", default_value = "0.02")]
    dt: f32,

    #[arg(short, long, help = "Number of steps to run.", default_value = "100")]
    steps: usize,

    #[arg(long, help = "Gravity along the vertical axis in m/s².", default_value_t = EARTH_GRAVITY)]
    gravity: f32,

    #[arg(long, help = "Let liquid leave through the walls.")]
    open: bool,
}

impl CliArgs {
    /// Resolve the scene: the input file if given, otherwise a dam break
    /// built from the other arguments
    pub fn create_input(&self) -> Result<SimulationInput, Box<dyn Error>> {
        let mut input = match &self.input_json {
            Some(input_filepath) => {
                info!("Using input file {}", input_filepath.display());

                let input_file = File::open(input_filepath)
                    .inspect_err(|err| error!("Failed to open input file: {:?}", err))?;
                let reader = BufReader::new(input_file);
                serde_json::from_reader(reader)
                    .inspect_err(|err| error!("Failed to deserialize input file: {:?}", err))?
            }
            None => self.dam_break(),
        };

        if let Some(frames_dir) = &self.frames_dir {
            input.frames = Some(FrameSettings {
                frames_dir: frames_dir.clone(),
            });
        }

        if let Some(savepath) = &self.input_json_savepath {
            let writer = BufWriter::new(File::create(savepath)?);
            serde_json::to_writer_pretty(writer, &input)?;
            info!("Saved input file to {}", savepath.display());
        }

        Ok(input)
    }

    /// A column of liquid in the lower-left corner of the box
    fn dam_break(&self) -> SimulationInput {
        let height = self.ny as f32 * self.dx;
        let width = self.nx as f32 * self.dx;

        SimulationInput {
            resolution: vec![self.ny, self.nx],
            dx: self.dx,
            boundary: if self.open {
                Boundary::Open
            } else {
                Boundary::Closed
            },
            gravity: Gravity::Scalar(self.gravity),
            dt: self.dt,
            steps: self.steps,
            batch_size: 1,
            liquid: vec![GeometryInput::Box {
                lower: vec![0., 0.],
                upper: vec![0.6 * height, 0.3 * width],
            }],
            obstacles: vec![],
            inflows: vec![],
            solver: SparseCg::default(),
            step: StepSettings::default(),
            frames: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scene() {
        let args = CliArgs::parse_from(["gridliquid", "--nx", "10", "--ny", "8", "--steps", "3"]);

        let input = args.create_input().unwrap();

        assert_eq!(input.resolution, vec![8, 10]);
        assert_eq!(input.steps, 3);
        assert_eq!(input.gravity, Gravity::Scalar(EARTH_GRAVITY));
        assert!(input.frames.is_none());
        assert!(input.initial_state().unwrap().density().sum() > 0.);
    }
}
