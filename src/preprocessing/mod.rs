use std::{path::PathBuf, sync::Arc};

use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    LiquidResult, ScalarField,
    sim::{
        domain::{BoxGeometry, Geometry, Inflow, Obstacle, SphereGeometry},
        grid::{Boundary, Domain, Grid},
        liquid::{Gravity, Initializer, LiquidState, StepSettings},
        poisson::SparseCg,
    },
};

pub mod cli;

/// A serialisable region of space
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum GeometryInput {
    Box { lower: Vec<f32>, upper: Vec<f32> },
    Sphere { center: Vec<f32>, radius: f32 },
}

impl GeometryInput {
    pub fn build(&self) -> Arc<dyn Geometry> {
        match self {
            GeometryInput::Box { lower, upper } => {
                Arc::new(BoxGeometry::new(lower.clone(), upper.clone()))
            }
            GeometryInput::Sphere { center, radius } => {
                Arc::new(SphereGeometry::new(center.clone(), *radius))
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObstacleInput {
    pub geometry: GeometryInput,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec<f32>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InflowInput {
    pub geometry: GeometryInput,
    pub rate: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FrameSettings {
    pub frames_dir: PathBuf,
}

fn default_batch_size() -> usize {
    1
}

/// Everything needed to run a liquid scene
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SimulationInput {
    pub resolution: Vec<usize>,
    pub dx: f32,

    #[serde(default)]
    pub boundary: Boundary,

    #[serde(default)]
    pub gravity: Gravity,
    pub dt: f32,
    pub steps: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Regions filled with liquid at the start
    pub liquid: Vec<GeometryInput>,

    #[serde(default)]
    pub obstacles: Vec<ObstacleInput>,

    #[serde(default)]
    pub inflows: Vec<InflowInput>,

    #[serde(default)]
    pub solver: SparseCg,

    #[serde(default)]
    pub step: StepSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<FrameSettings>,
}

impl SimulationInput {
    pub fn domain(&self) -> Domain {
        Domain::new(Grid::new(self.resolution.clone(), self.dx), self.boundary)
    }

    pub fn obstacles(&self) -> Vec<Arc<Obstacle>> {
        self.obstacles
            .iter()
            .map(|o| {
                Arc::new(Obstacle {
                    geometry: o.geometry.build(),
                    velocity: o.velocity.clone(),
                })
            })
            .collect()
    }

    pub fn inflows(&self) -> Vec<Inflow> {
        self.inflows
            .iter()
            .map(|i| Inflow::new(i.geometry.build(), i.rate))
            .collect()
    }

    /// The starting state: unit density inside the liquid regions, at rest
    pub fn initial_state(&self) -> LiquidResult<LiquidState> {
        let domain = self.domain();
        let mut density: ScalarField = ndarray::ArrayD::zeros(ndarray::IxDyn(
            &domain.grid.shape(self.batch_size, 1),
        ));
        for region in &self.liquid {
            let values = region.build().values_at_centers(&domain.grid, self.batch_size);
            Zip::from(&mut density)
                .and(&values)
                .for_each(|d, &v| *d = d.max(v));
        }

        LiquidState::new(
            domain,
            density,
            Initializer::Constant(0.),
            self.gravity.clone(),
            self.batch_size,
        )
    }

    pub fn log(&self) {
        info!(
            "Simulation is shown below:\n\n\
        \t resolution: {:?}\n\
        \t cell size:  {} m\n\
        \t boundary:   {:?}\n\
        \t gravity:    {:?}\n\
        \t time step:  {} s x {}\n\
        \t batch:      {}\n\
        \t obstacles:  {}\n\
        \t inflows:    {}\n\n\
        ",
            self.resolution,
            self.dx,
            self.boundary,
            self.gravity,
            self.dt,
            self.steps,
            self.batch_size,
            self.obstacles.len(),
            self.inflows.len(),
        );

        if let Ok(solver_str) = serde_json::to_string_pretty(&self.solver) {
            info!("Solver parameters are:\n\n{}", solver_str);
        }
    }
}
