//! # QRAC Core
//!
//! Quadrotor dynamics, plant integration and closed-loop simulation.
//!
//! ## Modules
//!
//! - [`math`]: Mathematical utilities (Euler-angle rotations, ERK integrators)
//! - [`dynamics`]: Dynamics models (12-state quadrotor)
//! - [`control`]: Controller interface and setpoint generators
//! - [`simulation`]: Plant integrator and threaded closed-loop simulator
//! - [`artifacts`]: Generated solver artifacts with scoped cleanup

pub mod artifacts;
pub mod control;
pub mod dynamics;
pub mod math;
pub mod simulation;

pub use control::Controller;
pub use dynamics::{Dynamics, Quadrotor, QuadrotorParams};
pub use simulation::{ClosedLoopSim, IntegratorPlant, Plant};

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;
