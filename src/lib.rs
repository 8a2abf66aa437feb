// Grid-based free-surface liquid simulation

extern crate nalgebra as na;

pub mod error;
pub mod observers;
pub mod preprocessing;
pub mod sim;

/// Centered samples laid out as `[batch, n_0, .., n_{r-1}, channels]`
pub type ScalarField = ndarray::ArrayD<f32>;

pub use error::{LiquidError, LiquidResult};
