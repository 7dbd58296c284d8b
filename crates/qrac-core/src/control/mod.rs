//! Control interfaces
//!
//! - [`Controller`]: anything that maps (state, setpoint) to a control
//!   input at a fixed cadence. The NMPC in `qrac-nmpc` is one.
//! - [`trajectory`]: setpoint generators and horizon sampling.

pub mod trajectory;

pub use trajectory::*;

use nalgebra::DVector;

/// Feedback controller driven by the closed-loop simulator
///
/// The setpoint handed to [`Controller::get_input`] is a flat vector of
/// [`Controller::n_set`] entries. For a receding-horizon controller this is
/// `num_nodes · nx` (node `k` occupies `[k·nx, (k+1)·nx)`); a static
/// controller reports `n_set() == nx()`.
pub trait Controller: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Control period [s]
    fn dt(&self) -> f64;

    /// State dimension
    fn nx(&self) -> usize;

    /// Control dimension
    fn nu(&self) -> usize;

    /// Setpoint vector length
    fn n_set(&self) -> usize;

    /// Compute the control to apply at state `x`
    fn get_input(&mut self, x: &DVector<f64>, x_set: &DVector<f64>) -> Result<DVector<f64>, Self::Error>;
}
