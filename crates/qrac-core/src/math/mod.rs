//! Mathematical utilities
//!
//! Euler-angle rotation utilities and fixed-step explicit Runge-Kutta
//! integrators.

pub mod integrator;
pub mod rotation;

pub use integrator::*;
pub use rotation::*;
