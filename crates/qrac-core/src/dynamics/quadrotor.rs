//! Quadrotor dynamics
//!
//! Rigid-body quadrotor with Euler-angle attitude, linear drag and
//! per-rotor thrust inputs:
//!
//! ṗ = v
//! [φ̇ θ̇ ψ̇]ᵀ = W(φ, θ)⁻¹ ω
//! v̇ = (R(φ, θ, ψ)·[0, 0, Σuᵢ]ᵀ − A·v) / m + [0, 0, −g]ᵀ
//! ω̇ = J⁻¹ (B·u − ω × Jω)
//!
//! where:
//! - p: position (world frame, z-up)
//! - v: velocity (world frame)
//! - ω = [p, q, r]: body angular rates
//! - A = diag(Ax, Ay, Az): linear drag coefficients
//! - J = diag(Ixx, Iyy, Izz): inertia
//! - B: 3×4 rotor mixing matrix built from the rotor arms and torque
//!   coefficients, `B = [by; −bx; [−k₀, k₁, −k₂, k₃]]`
//!
//! State order: `[x, y, z, φ, θ, ψ, ẋ, ẏ, ż, p, q, r]`.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, SVector, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::math::{euler_rate_matrix_inv, euler_rates, rotation_zyx, skew};
use crate::GRAVITY;

use super::{Dynamics, ModelError};

/// Quadrotor state vector (12)
pub type QuadrotorState = SVector<f64, 12>;

/// Rotor thrust vector (4)
pub type QuadrotorInput = Vector4<f64>;

/// Quadrotor physical parameters
///
/// Rotor vectors are kept as plain `Vec`s so that parameter files can be
/// deserialized as-is; their length is checked by [`Quadrotor::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrotorParams {
    /// Mass [kg]
    pub mass: f64,
    /// Principal moment of inertia about body x [kg·m²]
    pub ixx: f64,
    /// Principal moment of inertia about body y [kg·m²]
    pub iyy: f64,
    /// Principal moment of inertia about body z [kg·m²]
    pub izz: f64,
    /// Linear drag coefficient along world x [kg/s]
    pub ax: f64,
    /// Linear drag coefficient along world y [kg/s]
    pub ay: f64,
    /// Linear drag coefficient along world z [kg/s]
    pub az: f64,
    /// Rotor x offsets [m]
    pub bx: Vec<f64>,
    /// Rotor y offsets [m]
    pub by: Vec<f64>,
    /// Rotor torque coefficients [m]
    pub k: Vec<f64>,
    /// Model name, also used as prefix for solver artifacts
    pub name: String,
}

impl QuadrotorParams {
    /// Crazyflie 2.x parameters with the given drag coefficients
    pub fn crazyflie(ax: f64, ay: f64, az: f64) -> Self {
        Self {
            mass: 0.028,
            ixx: 3.144988e-5,
            iyy: 3.151127e-5,
            izz: 7.058874e-5,
            ax,
            ay,
            az,
            bx: vec![0.0283, 0.0283, -0.0283, -0.0283],
            by: vec![0.0283, -0.0283, -0.0283, 0.0283],
            k: vec![0.005964552; 4],
            name: DEFAULT_MODEL_NAME.to_string(),
        }
    }

    /// Total thrust needed to hover [N]
    pub fn hover_thrust(&self) -> f64 {
        self.mass * GRAVITY
    }
}

impl Default for QuadrotorParams {
    fn default() -> Self {
        Self::crazyflie(0.0, 0.0, 0.0)
    }
}

/// Name used when none is given
pub const DEFAULT_MODEL_NAME: &str = "Nonlinear_Quadrotor";

const STATE_LABELS: [&str; 12] = [
    "x", "y", "z", "phi", "theta", "psi", "x_d", "y_d", "z_d", "p", "q", "r",
];

const CONTROL_LABELS: [&str; 4] = ["u1", "u2", "u3", "u4"];

/// Validated quadrotor model
///
/// Immutable after construction. Share it between the controller and the
/// plant through an `Arc`.
#[derive(Debug, Clone)]
pub struct Quadrotor {
    params: QuadrotorParams,
    inertia: Matrix3<f64>,
    inertia_inv: Matrix3<f64>,
    drag: Vector3<f64>,
    mixer: SMatrix<f64, 3, 4>,
}

impl Quadrotor {
    /// State dimension
    pub const NX: usize = 12;
    /// Control dimension
    pub const NU: usize = 4;
    /// Index of the yaw angle in the state vector
    pub const YAW_INDEX: usize = 5;

    /// Validate parameters and build the model
    pub fn new(params: QuadrotorParams) -> Result<Self, ModelError> {
        let scalars = [
            ("mass", params.mass),
            ("Ixx", params.ixx),
            ("Iyy", params.iyy),
            ("Izz", params.izz),
            ("Ax", params.ax),
            ("Ay", params.ay),
            ("Az", params.az),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(ModelError::NonFinite { name, value });
            }
        }
        for (name, value) in &scalars[..4] {
            if *value <= 0.0 {
                return Err(ModelError::NonPositive { name, value: *value });
            }
        }

        let bx = rotor_vector("bx", &params.bx)?;
        let by = rotor_vector("by", &params.by)?;
        let k = rotor_vector("k", &params.k)?;
        validate_name(&params.name)?;

        let mixer = SMatrix::<f64, 3, 4>::from_rows(&[
            by.transpose(),
            -bx.transpose(),
            Vector4::new(-k[0], k[1], -k[2], k[3]).transpose(),
        ]);

        let inertia_diag = Vector3::new(params.ixx, params.iyy, params.izz);

        Ok(Self {
            inertia: Matrix3::from_diagonal(&inertia_diag),
            inertia_inv: Matrix3::from_diagonal(&inertia_diag.map(|i| 1.0 / i)),
            drag: Vector3::new(params.ax, params.ay, params.az),
            mixer,
            params,
        })
    }

    /// Crazyflie model with the given drag coefficients
    pub fn crazyflie(ax: f64, ay: f64, az: f64) -> Result<Self, ModelError> {
        Self::new(QuadrotorParams::crazyflie(ax, ay, az))
    }

    pub fn params(&self) -> &QuadrotorParams {
        &self.params
    }

    /// Rotor mixing matrix B (3×4)
    pub fn mixer(&self) -> &SMatrix<f64, 3, 4> {
        &self.mixer
    }

    /// Per-rotor thrust that balances gravity at level attitude
    pub fn hover_input(&self) -> QuadrotorInput {
        QuadrotorInput::repeat(self.params.hover_thrust() / Self::NU as f64)
    }

    /// Compute the full state derivative
    pub fn state_derivative(&self, x: &QuadrotorState, u: &QuadrotorInput) -> QuadrotorState {
        let (phi, theta, psi) = (x[3], x[4], x[5]);
        let v = x.fixed_rows::<3>(6).into_owned();
        let omega = x.fixed_rows::<3>(9).into_owned();

        let angle_rates = euler_rates(phi, theta, &omega);

        let thrust = Vector3::new(0.0, 0.0, u.sum());
        let acceleration = (rotation_zyx(phi, theta, psi) * thrust - self.drag.component_mul(&v))
            / self.params.mass
            + Vector3::new(0.0, 0.0, -GRAVITY);

        // ω̇ = J⁻¹ (B u − ω × Jω)
        let gyro = skew(&omega) * (self.inertia * omega);
        let angular_acceleration = self.inertia_inv * (self.mixer * u - gyro);

        let mut xdot = QuadrotorState::zeros();
        xdot.fixed_rows_mut::<3>(0).copy_from(&v);
        xdot.fixed_rows_mut::<3>(3).copy_from(&angle_rates);
        xdot.fixed_rows_mut::<3>(6).copy_from(&acceleration);
        xdot.fixed_rows_mut::<3>(9).copy_from(&angular_acceleration);
        xdot
    }

    /// Closed-form Jacobians ∂ẋ/∂x and ∂ẋ/∂u
    pub fn state_jacobian(
        &self,
        x: &QuadrotorState,
        u: &QuadrotorInput,
    ) -> (SMatrix<f64, 12, 12>, SMatrix<f64, 12, 4>) {
        let (phi, theta) = (x[3], x[4]);
        let (sp, cp) = phi.sin_cos();
        let (st, ct) = theta.sin_cos();
        let (ss, cs) = x[5].sin_cos();
        let omega = x.fixed_rows::<3>(9).into_owned();
        let (q, r) = (omega.y, omega.z);
        let mass = self.params.mass;

        let mut a = SMatrix::<f64, 12, 12>::zeros();
        let mut b = SMatrix::<f64, 12, 4>::zeros();

        // ṗ = v
        a.fixed_view_mut::<3, 3>(0, 6).fill_with_identity();

        // Euler rates W⁻¹ω
        let qr_sin = sp * q + cp * r;
        let qr_cos = cp * q - sp * r;
        a[(3, 3)] = qr_cos * st / ct;
        a[(3, 4)] = qr_sin / (ct * ct);
        a[(4, 3)] = -qr_sin;
        a[(5, 3)] = qr_cos / ct;
        a[(5, 4)] = qr_sin * st / (ct * ct);
        a.fixed_view_mut::<3, 3>(3, 9).copy_from(&euler_rate_matrix_inv(phi, theta));

        // Thrust along the body z-axis R·e₃
        let k = u.sum() / mass;
        a[(6, 3)] = k * (ss * cp - cs * st * sp);
        a[(7, 3)] = -k * (ss * st * sp + cs * cp);
        a[(8, 3)] = -k * ct * sp;
        a[(6, 4)] = k * cs * ct * cp;
        a[(7, 4)] = k * ss * ct * cp;
        a[(8, 4)] = -k * st * cp;
        a[(6, 5)] = k * (cs * sp - ss * st * cp);
        a[(7, 5)] = k * (ss * sp + cs * st * cp);
        for i in 0..3 {
            a[(6 + i, 6 + i)] = -self.drag[i] / mass;
        }
        let z_body = Vector3::new(cs * st * cp + ss * sp, ss * st * cp - cs * sp, ct * cp) / mass;
        for j in 0..Self::NU {
            b.fixed_view_mut::<3, 1>(6, j).copy_from(&z_body);
        }

        // ∂(ω × Jω)/∂ω = [ω]× J − [Jω]×
        let gyro = skew(&omega) * self.inertia - skew(&(self.inertia * omega));
        a.fixed_view_mut::<3, 3>(9, 9).copy_from(&(-self.inertia_inv * gyro));
        b.fixed_view_mut::<3, 4>(9, 0).copy_from(&(self.inertia_inv * self.mixer));

        (a, b)
    }

    fn check_dimensions(x: &DVector<f64>, u: &DVector<f64>) -> Result<(), ModelError> {
        if x.len() != Self::NX {
            return Err(ModelError::DimensionMismatch { what: "state", expected: Self::NX, got: x.len() });
        }
        if u.len() != Self::NU {
            return Err(ModelError::DimensionMismatch { what: "control", expected: Self::NU, got: u.len() });
        }
        Ok(())
    }
}

impl Dynamics for Quadrotor {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn nx(&self) -> usize {
        Self::NX
    }

    fn nu(&self) -> usize {
        Self::NU
    }

    fn state_labels(&self) -> &[&'static str] {
        &STATE_LABELS
    }

    fn control_labels(&self) -> &[&'static str] {
        &CONTROL_LABELS
    }

    fn derivative(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, ModelError> {
        Self::check_dimensions(x, u)?;

        let xs = QuadrotorState::from_column_slice(x.as_slice());
        let us = QuadrotorInput::from_column_slice(u.as_slice());
        let xdot = self.state_derivative(&xs, &us);
        Ok(DVector::from_column_slice(xdot.as_slice()))
    }

    fn jacobian(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
        Self::check_dimensions(x, u)?;

        let xs = QuadrotorState::from_column_slice(x.as_slice());
        let us = QuadrotorInput::from_column_slice(u.as_slice());
        let (a, b) = self.state_jacobian(&xs, &us);
        Ok((
            DMatrix::from_column_slice(Self::NX, Self::NX, a.as_slice()),
            DMatrix::from_column_slice(Self::NX, Self::NU, b.as_slice()),
        ))
    }
}

fn rotor_vector(name: &'static str, values: &[f64]) -> Result<Vector4<f64>, ModelError> {
    if values.len() != Quadrotor::NU {
        return Err(ModelError::RotorLength { name, got: values.len() });
    }
    if let Some(value) = values.iter().copied().find(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite { name, value });
    }
    Ok(Vector4::from_column_slice(values))
}

fn validate_name(name: &str) -> Result<(), ModelError> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn crazyflie() -> Quadrotor {
        Quadrotor::crazyflie(0.0, 0.0, 0.0).unwrap()
    }

    #[test]
    fn test_crazyflie_defaults() {
        let model = crazyflie();
        assert_eq!(model.name(), "Nonlinear_Quadrotor");
        assert_eq!(model.nx(), 12);
        assert_eq!(model.nu(), 4);
        assert_relative_eq!(model.params().mass, 0.028);
        assert_eq!(model.state_labels()[Quadrotor::YAW_INDEX], "psi");
    }

    #[test]
    fn test_derivative_dimensions() {
        let model = crazyflie();
        let x = DVector::zeros(12);
        let u = DVector::zeros(4);

        let xdot = model.derivative(&x, &u).unwrap();
        assert_eq!(xdot.len(), 12);

        assert_eq!(
            model.derivative(&DVector::zeros(11), &u),
            Err(ModelError::DimensionMismatch { what: "state", expected: 12, got: 11 })
        );
        assert_eq!(
            model.derivative(&x, &DVector::zeros(3)),
            Err(ModelError::DimensionMismatch { what: "control", expected: 4, got: 3 })
        );
    }

    #[test]
    fn test_free_fall() {
        let model = crazyflie();
        let xdot = model.state_derivative(&QuadrotorState::zeros(), &QuadrotorInput::zeros());

        assert_relative_eq!(xdot[8], -GRAVITY, epsilon = 1e-12);
        assert_relative_eq!(xdot.fixed_rows::<3>(9).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hover_equilibrium() {
        let model = crazyflie();
        let mut x = QuadrotorState::zeros();
        x[2] = 1.0;
        x[5] = 0.8; // yaw does not affect hover

        let xdot = model.state_derivative(&x, &model.hover_input());

        assert_relative_eq!(xdot.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_drag() {
        let model = Quadrotor::crazyflie(0.01, 0.02, 0.03).unwrap();
        let mut x = QuadrotorState::zeros();
        x[6] = 1.0;
        x[7] = -1.0;

        let xdot = model.state_derivative(&x, &model.hover_input());

        assert_relative_eq!(xdot[0], 1.0);
        assert_relative_eq!(xdot[6], -0.01 / 0.028, epsilon = 1e-12);
        assert_relative_eq!(xdot[7], 0.02 / 0.028, epsilon = 1e-12);
    }

    #[test]
    fn test_mixer_torques() {
        let model = crazyflie();
        let hover = model.hover_input();

        // More thrust on rotors 1 and 4 (positive y arm) rolls positive
        let u = hover + QuadrotorInput::new(1e-3, 0.0, 0.0, 1e-3);
        let xdot = model.state_derivative(&QuadrotorState::zeros(), &u);
        assert!(xdot[9] > 0.0);
        assert_relative_eq!(xdot[10], 0.0, epsilon = 1e-9);

        // Rotors 2 and 4 spin the body about +z
        let u = hover + QuadrotorInput::new(0.0, 1e-3, 0.0, 1e-3);
        let xdot = model.state_derivative(&QuadrotorState::zeros(), &u);
        assert!(xdot[11] > 0.0);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let model = Quadrotor::crazyflie(0.01, 0.02, 0.03).unwrap();
        let x = DVector::from_column_slice(&[
            0.5, -1.0, 2.0, 0.3, -0.2, 1.1, 0.4, -0.6, 0.2, 1.5, -2.0, 0.7,
        ]);
        let u = DVector::from_column_slice(&[0.05, 0.08, 0.06, 0.09]);

        let (a, b) = model.jacobian(&x, &u).unwrap();
        let (a_fd, b_fd) = crate::dynamics::finite_difference_jacobian(&model, &x, &u).unwrap();

        assert_relative_eq!(a, a_fd, epsilon = 1e-4, max_relative = 1e-5);
        assert_relative_eq!(b, b_fd, epsilon = 1e-4, max_relative = 1e-5);

        assert!(matches!(
            model.jacobian(&x, &DVector::zeros(2)),
            Err(ModelError::DimensionMismatch { what: "control", .. })
        ));
    }

    #[test]
    fn test_rotor_vector_length_enforced() {
        let mut params = QuadrotorParams::crazyflie(0.0, 0.0, 0.0);
        params.bx = vec![0.0283; 3];

        assert_eq!(
            Quadrotor::new(params).unwrap_err(),
            ModelError::RotorLength { name: "bx", got: 3 }
        );

        let mut params = QuadrotorParams::default();
        params.k = vec![0.0; 5];
        assert!(matches!(Quadrotor::new(params), Err(ModelError::RotorLength { name: "k", got: 5 })));
    }

    #[test]
    fn test_non_finite_parameters_rejected() {
        assert!(matches!(
            Quadrotor::crazyflie(f64::NAN, 0.0, 0.0),
            Err(ModelError::NonFinite { name: "Ax", .. })
        ));

        let mut params = QuadrotorParams::default();
        params.mass = 0.0;
        assert!(matches!(Quadrotor::new(params), Err(ModelError::NonPositive { name: "mass", .. })));

        let mut params = QuadrotorParams::default();
        params.by[2] = f64::INFINITY;
        assert!(matches!(Quadrotor::new(params), Err(ModelError::NonFinite { name: "by", .. })));
    }

    #[test]
    fn test_model_name_validation() {
        for bad in ["", "9lives", "has space", "dash-name"] {
            let mut params = QuadrotorParams::default();
            params.name = bad.to_string();
            assert_eq!(Quadrotor::new(params).unwrap_err(), ModelError::InvalidName(bad.to_string()));
        }

        let mut params = QuadrotorParams::default();
        params.name = "cf_2".to_string();
        assert_eq!(Quadrotor::new(params).unwrap().name(), "cf_2");
    }
}
