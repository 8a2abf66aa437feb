// Regular grid geometry

use serde::{Deserialize, Serialize};

/// Uniform Cartesian grid with cubic cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Number of cells along each spatial axis
    resolution: Vec<usize>,

    /// Edge length of each cell
    dx: f32,
}

impl Grid {
    pub fn new(resolution: Vec<usize>, dx: f32) -> Self {
        Grid { resolution, dx }
    }

    pub fn rank(&self) -> usize {
        self.resolution.len()
    }

    pub fn resolution(&self) -> &[usize] {
        &self.resolution
    }

    pub fn dx(&self) -> f32 {
        self.dx
    }

    pub fn cell_count(&self) -> usize {
        self.resolution.iter().product()
    }

    /// Shape of a centered field: `[batch, n_0, .., n_{r-1}, channels]`
    pub fn shape(&self, batch: usize, channels: usize) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.rank() + 2);
        shape.push(batch);
        shape.extend_from_slice(&self.resolution);
        shape.push(channels);
        shape
    }

    /// Shape of a staggered field: `[batch, n_0 + 1, .., n_{r-1} + 1, rank]`
    pub fn staggered_shape(&self, batch: usize) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.rank() + 2);
        shape.push(batch);
        shape.extend(self.resolution.iter().map(|n| n + 1));
        shape.push(self.rank());
        shape
    }

    /// Physical position of the centre of the cell at `index`
    pub fn cell_center(&self, index: &[usize]) -> Vec<f32> {
        index.iter().map(|&i| (i as f32 + 0.5) * self.dx).collect()
    }
}

/// Whether the walls of the box let liquid through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Solid walls: no flow through, zero pressure derivative
    #[default]
    Closed,

    /// Open walls: free flow, zero pressure outside
    Open,
}

/// The simulated box: a grid plus the behaviour of its walls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub grid: Grid,
    pub boundary: Boundary,
}

impl Domain {
    pub fn new(grid: Grid, boundary: Boundary) -> Self {
        Domain { grid, boundary }
    }
}
