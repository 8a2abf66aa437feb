use std::process::ExitCode;

use clap::Parser;
use gridliquid::{preprocessing::cli::CliArgs, sim::task};
use tracing::{error, info};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = CliArgs::parse();
    let input = match args.create_input() {
        Ok(input) => input,
        Err(err) => {
            error!("Failed to load simulation input: {}", err);
            return ExitCode::FAILURE;
        }
    };

    input.log();

    let handle = task::spawn_sim_thread(input);
    let output = match handle.join() {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            error!("Simulation failed: {}", err);
            return ExitCode::FAILURE;
        }
        Err(_) => {
            error!("Simulation thread panicked");
            return ExitCode::FAILURE;
        }
    };

    let total_iterations: u64 = output.iterations.iter().sum();
    info!(
        "Finished {} steps at t = {} s ({} pressure iterations, final mass {})",
        output.ages.len(),
        output.ages.last().copied().unwrap_or(0.),
        total_iterations,
        output.mass.last().copied().unwrap_or(0.),
    );

    ExitCode::SUCCESS
}
