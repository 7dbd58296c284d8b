//! SO(3) rotation utilities
//!
//! Euler-angle (roll φ, pitch θ, yaw ψ) kinematics used by the
//! quadrotor model. The body-to-world rotation is the ZYX product
//!
//! ```text
//! R = Rz(ψ) · Ry(θ) · Rx(φ)
//! ```

use nalgebra::{Matrix3, Vector3};

/// Skew-symmetric matrix from vector (hat operator)
///
/// For v = [x, y, z]^T:
/// ```text
/// [v]× = [ 0  -z   y]
///        [ z   0  -x]
///        [-y   x   0]
/// ```
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Elementary rotation about the x-axis
pub fn rot_x(phi: f64) -> Matrix3<f64> {
    let (s, c) = phi.sin_cos();
    Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, c, -s,
        0.0, s, c,
    )
}

/// Elementary rotation about the y-axis
pub fn rot_y(theta: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(
        c, 0.0, s,
        0.0, 1.0, 0.0,
        -s, 0.0, c,
    )
}

/// Elementary rotation about the z-axis
pub fn rot_z(psi: f64) -> Matrix3<f64> {
    let (s, c) = psi.sin_cos();
    Matrix3::new(
        c, -s, 0.0,
        s, c, 0.0,
        0.0, 0.0, 1.0,
    )
}

/// Body-to-world rotation from roll, pitch, yaw
pub fn rotation_zyx(phi: f64, theta: f64, psi: f64) -> Matrix3<f64> {
    rot_z(psi) * rot_y(theta) * rot_x(phi)
}

/// Map from Euler-angle rates to body angular velocity
///
/// ω_B = W(φ, θ) · [φ̇, θ̇, ψ̇]^T with
/// ```text
/// W = [1    0        -sinθ    ]
///     [0    cosφ   cosθ·sinφ  ]
///     [0   -sinφ   cosθ·cosφ  ]
/// ```
pub fn euler_rate_matrix(phi: f64, theta: f64) -> Matrix3<f64> {
    let (sp, cp) = phi.sin_cos();
    let (st, ct) = theta.sin_cos();
    Matrix3::new(
        1.0, 0.0, -st,
        0.0, cp, ct * sp,
        0.0, -sp, ct * cp,
    )
}

/// Closed-form inverse of [`euler_rate_matrix`]
///
/// Singular at θ = ±π/2.
pub fn euler_rate_matrix_inv(phi: f64, theta: f64) -> Matrix3<f64> {
    let (sp, cp) = phi.sin_cos();
    let (st, ct) = theta.sin_cos();
    let tt = st / ct;

    Matrix3::new(
        1.0, sp * tt, cp * tt,
        0.0, cp, -sp,
        0.0, sp / ct, cp / ct,
    )
}

/// Euler-angle rates from body angular velocity
pub fn euler_rates(phi: f64, theta: f64, omega: &Vector3<f64>) -> Vector3<f64> {
    euler_rate_matrix_inv(phi, theta) * omega
}
