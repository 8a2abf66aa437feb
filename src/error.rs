// Error types for the liquid solver

use thiserror::Error;

pub type LiquidResult<T> = Result<T, LiquidError>;

#[derive(Error, Debug)]
pub enum LiquidError {
    /// An initializer or replacement field does not match the grid
    #[error("shape mismatch for {field}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        field: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// The pressure solve was handed something that is neither a velocity
    /// nor a rank-consistent centered vector field
    #[error("cannot solve pressure for a field of shape {shape:?} on a rank-{rank} grid")]
    InvalidFieldShape { shape: Vec<usize>, rank: usize },

    /// A state needs at least one batch entry and at least one cell per axis
    #[error("cannot simulate {batch_size} batch entries on a grid of resolution {resolution:?}")]
    EmptyDomain {
        resolution: Vec<usize>,
        batch_size: usize,
    },

    #[error("gravity has {found} components but the grid has rank {rank}")]
    GravityRank { rank: usize, found: usize },

    #[error("pressure solve failed: {0}")]
    Solver(String),
}
