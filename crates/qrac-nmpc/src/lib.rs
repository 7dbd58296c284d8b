//! QRAC NMPC
//!
//! Real-time nonlinear model predictive control for quadrotors.
//!
//! # Architecture
//!
//! Every control period the controller solves a finite-horizon Optimal
//! Control Problem (OCP):
//!
//! ```text
//! minimize    J = Σ_{k<N} ‖x_k − x_set,k‖²_Q + ‖u_k − u_min‖²_R
//! subject to  x₀ = x̂
//!             x_{k+1} = Φ_ERK(x_k, u_k, dt)   (quadrotor dynamics)
//!             u_min ≤ u_k ≤ u_max
//!             0 ≤ ψ_k ≤ 2π                      k = 1..N
//! ```
//!
//! and applies the first control of the solution.
//!
//! # Components
//!
//! - [`config`]: Controller configuration and TOML loading
//! - [`ocp`]: OCP problem definition
//! - [`solver`]: Solver backend interface and status codes
//! - [`sqp`]: Embedded Gauss-Newton SQP backend
//! - [`controller`]: Receding-horizon controller
//! - [`trajectory`]: Predicted trajectory of a solve

pub mod config;
pub mod controller;
pub mod ocp;
pub mod solver;
pub mod sqp;
pub mod trajectory;

// acados FFI bindings (only when feature is enabled)
#[cfg(feature = "acados")]
pub mod acados_ffi;

// Re-exports
pub use config::{ConfigError, NmpcConfig, SolverOptions};
pub use controller::{Nmpc, NmpcBuilder, NmpcError};
pub use ocp::OcpDefinition;
pub use solver::{Field, OcpBackend, SolveStatistics, SolverError, SolverStatus};
pub use sqp::SqpSolver;
pub use trajectory::PredictedTrajectory;

#[cfg(feature = "acados")]
pub use solver::AcadosSolver;
