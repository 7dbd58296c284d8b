//! Dynamics models
//!
//! A dynamics model is the shared descriptor consumed by both the NMPC
//! backend (shooting discretization) and the plant integrator.

pub mod quadrotor;

pub use quadrotor::*;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Model validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Parameter {name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },
    #[error("Parameter {name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("Rotor vector {name} must have exactly 4 entries, got {got}")]
    RotorLength { name: &'static str, got: usize },
    #[error("Invalid model name {0:?}: expected a non-empty identifier")]
    InvalidName(String),
    #[error("Invalid {what} dimension: expected {expected}, got {got}")]
    DimensionMismatch { what: &'static str, expected: usize, got: usize },
}

/// Continuous-time dynamics ẋ = f(x, u)
pub trait Dynamics: Send + Sync {
    /// Identifier used to name generated artifacts
    fn name(&self) -> &str;

    /// State dimension
    fn nx(&self) -> usize;

    /// Control dimension
    fn nu(&self) -> usize;

    /// Human-readable state component names, `nx` entries
    fn state_labels(&self) -> &[&'static str];

    /// Human-readable control component names, `nu` entries
    fn control_labels(&self) -> &[&'static str];

    /// Evaluate ẋ = f(x, u)
    fn derivative(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, ModelError>;

    /// Jacobians ∂f/∂x (nx×nx) and ∂f/∂u (nx×nu)
    ///
    /// Central differences unless the model provides them in closed form.
    fn jacobian(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
        finite_difference_jacobian(self, x, u)
    }
}

/// Relative perturbation for [`finite_difference_jacobian`]
const FD_STEP: f64 = 1e-6;

/// Central-difference Jacobians of `model` at `(x, u)`
pub fn finite_difference_jacobian<D: Dynamics + ?Sized>(
    model: &D,
    x: &DVector<f64>,
    u: &DVector<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
    let mut jx = DMatrix::zeros(x.len(), x.len());
    let mut ju = DMatrix::zeros(x.len(), u.len());

    for j in 0..x.len() {
        let h = FD_STEP * (1.0 + x[j].abs());
        let mut xp = x.clone();
        let mut xm = x.clone();
        xp[j] += h;
        xm[j] -= h;
        let column = (model.derivative(&xp, u)? - model.derivative(&xm, u)?) / (2.0 * h);
        jx.set_column(j, &column);
    }
    for j in 0..u.len() {
        let h = FD_STEP * (1.0 + u[j].abs());
        let mut up = u.clone();
        let mut um = u.clone();
        up[j] += h;
        um[j] -= h;
        let column = (model.derivative(x, &up)? - model.derivative(x, &um)?) / (2.0 * h);
        ju.set_column(j, &column);
    }
    Ok((jx, ju))
}
