/// Task runner for the solver thread

use std::{
    error::Error,
    sync::mpsc,
    thread::{self, JoinHandle},
};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::{
    observers::imgstream::{self, DisplayPacket},
    preprocessing::SimulationInput,
    sim::liquid::LiquidPhysics,
};

#[derive(Debug, Clone, Default)]
pub struct SimulationOutput {
    pub ages: Vec<f32>,       // maps step->simulated time
    pub iterations: Vec<u64>, // pressure solver iterations per step
    pub mass: Vec<f32>,       // total liquid per step, all batch entries
}

/// Step the scene described by `input`, streaming frames when configured
pub fn run(input: &SimulationInput) -> Result<SimulationOutput, Box<dyn Error>> {
    let physics = LiquidPhysics::new(Box::new(input.solver)).with_settings(input.step);
    let obstacles = input.obstacles();
    let inflows = input.inflows();
    let mut state = input.initial_state()?;

    let bar = ProgressBar::new(input.steps as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "[Elapsed: {elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (Remaining: {eta_precise})",
        )?
        .progress_chars("##-"),
    );

    // spawn image io thread
    let (sender, io_thread) = match &input.frames {
        Some(settings) if input.resolution.len() == 2 => {
            let (sender, receiver) = mpsc::channel();
            let frames_dir = settings.frames_dir.clone();
            let handle = thread::spawn(move || {
                if let Err(err) = imgstream::image_io_loop(receiver, &frames_dir) {
                    warn!("Image io thread stopped: {}", err);
                }
            });
            (Some(sender), Some(handle))
        }
        Some(_) => {
            warn!("Frames are only written for 2-D scenes");
            (None, None)
        }
        None => (None, None),
    };

    let mut output = SimulationOutput::default();
    for i in 0..input.steps {
        let outcome = physics.step(&state, input.dt, &obstacles, &inflows)?;
        state = outcome.state;

        if let Some(sender) = &sender {
            if let Some(packet) = DisplayPacket::from_density(state.density(), i) {
                // a closed receiver already logged its own failure
                let _ = sender.send(packet);
            }
        }

        output.ages.push(state.age());
        output
            .iterations
            .push(outcome.diagnostics.last_pressure_iterations.unwrap_or(0));
        output.mass.push(state.density().sum());
        bar.inc(1);
    }
    bar.finish();

    drop(sender);
    if let Some(handle) = io_thread {
        if handle.join().is_err() {
            warn!("Image io thread panicked");
        }
    }

    Ok(output)
}

/// Spawns the simulation thread and starts the corresponding task
pub fn spawn_sim_thread(input: SimulationInput) -> JoinHandle<Result<SimulationOutput, String>> {
    thread::spawn(move || run(&input).map_err(|err| err.to_string()))
}
