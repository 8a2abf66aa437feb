// Liquid simulation core

pub mod advection;
pub mod domain;
pub mod extrapolate;
pub mod field;
pub mod grid;
pub mod liquid;
pub mod mask;
pub mod numeric;
pub mod poisson;
pub mod projection;
pub mod task;
