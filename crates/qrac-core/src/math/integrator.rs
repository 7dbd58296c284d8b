//! Numerical integration methods
//!
//! Fixed-step explicit Runge-Kutta schemes used by the plant integrator
//! and by the shooting discretization inside the NMPC backend.
//!
//! The tableaus match the ERK family used by acados for `num_stages`
//! between 1 and 4:
//!
//! ```text
//! 1: forward Euler
//! 2: explicit midpoint
//! 3: Kutta's third-order method
//! 4: classic RK4
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integrator construction errors
#[derive(Debug, Error, PartialEq)]
pub enum IntegratorError {
    #[error("Unsupported number of ERK stages: {0} (expected 1..=4)")]
    UnsupportedStages(usize),
}

/// Explicit Runge-Kutta scheme with a fixed Butcher tableau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitRk {
    /// Number of stages
    stages: usize,
    /// Strictly lower-triangular coupling coefficients, row-major
    a: Vec<Vec<f64>>,
    /// Output weights
    b: Vec<f64>,
    /// Stage times (fraction of the step)
    c: Vec<f64>,
}

impl ExplicitRk {
    /// Build the tableau for the given number of stages
    pub fn new(stages: usize) -> Result<Self, IntegratorError> {
        let (a, b, c) = match stages {
            1 => (vec![vec![]], vec![1.0], vec![0.0]),
            2 => (
                vec![vec![], vec![0.5]],
                vec![0.0, 1.0],
                vec![0.0, 0.5],
            ),
            3 => (
                vec![vec![], vec![0.5], vec![-1.0, 2.0]],
                vec![1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
                vec![0.0, 0.5, 1.0],
            ),
            4 => (
                vec![vec![], vec![0.5], vec![0.0, 0.5], vec![0.0, 0.0, 1.0]],
                vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
                vec![0.0, 0.5, 0.5, 1.0],
            ),
            n => return Err(IntegratorError::UnsupportedStages(n)),
        };

        Ok(Self { stages, a, b, c })
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Advance dx/dt = f(t, x) by one step of length `dt`
    ///
    /// # Arguments
    /// * `x` - Current state
    /// * `t` - Current time
    /// * `dt` - Step length
    /// * `f` - Derivative function f(t, x) -> dx/dt
    pub fn try_step<F, E>(&self, x: &DVector<f64>, t: f64, dt: f64, f: F) -> Result<DVector<f64>, E>
    where
        F: Fn(f64, &DVector<f64>) -> Result<DVector<f64>, E>,
    {
        let mut k: Vec<DVector<f64>> = Vec::with_capacity(self.stages);

        for i in 0..self.stages {
            let mut xi = x.clone();
            for (j, a_ij) in self.a[i].iter().enumerate() {
                if *a_ij != 0.0 {
                    xi.axpy(dt * a_ij, &k[j], 1.0);
                }
            }
            k.push(f(t + self.c[i] * dt, &xi)?);
        }

        let mut x_next = x.clone();
        for (ki, bi) in k.iter().zip(self.b.iter()) {
            if *bi != 0.0 {
                x_next.axpy(dt * bi, ki, 1.0);
            }
        }
        Ok(x_next)
    }

    /// One step together with its sensitivities
    ///
    /// `f(t, x)` returns ẋ with the Jacobians ∂f/∂x (nx×nx) and ∂f/∂p
    /// (nx×np) of a parameter held constant over the step. The stage
    /// Jacobians are chained through the tableau, so the result is the exact
    /// derivative of the discrete map:
    ///
    /// ```text
    /// G_i = [I 0] + dt Σ_j a_ij dK_j,   dK_i = ∂f/∂x(X_i) G_i + [0 ∂f/∂p(X_i)]
    /// [∂x⁺/∂x  ∂x⁺/∂p] = [I 0] + dt Σ_i b_i dK_i
    /// ```
    pub fn try_step_sensitivities<F, E>(
        &self,
        x: &DVector<f64>,
        t: f64,
        dt: f64,
        np: usize,
        f: F,
    ) -> Result<(DVector<f64>, DMatrix<f64>, DMatrix<f64>), E>
    where
        F: Fn(f64, &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>, DMatrix<f64>), E>,
    {
        let nx = x.len();
        let seed = DMatrix::<f64>::identity(nx, nx + np);
        let mut k: Vec<DVector<f64>> = Vec::with_capacity(self.stages);
        let mut dk: Vec<DMatrix<f64>> = Vec::with_capacity(self.stages);

        for i in 0..self.stages {
            let mut xi = x.clone();
            let mut gi = seed.clone();
            for (j, a_ij) in self.a[i].iter().enumerate() {
                if *a_ij != 0.0 {
                    xi.axpy(dt * a_ij, &k[j], 1.0);
                    gi += &dk[j] * (dt * a_ij);
                }
            }

            let (ki, jx, jp) = f(t + self.c[i] * dt, &xi)?;
            let mut dki = jx * gi;
            {
                let mut param_cols = dki.columns_mut(nx, np);
                param_cols += jp;
            }
            k.push(ki);
            dk.push(dki);
        }

        let mut x_next = x.clone();
        let mut g = seed;
        for ((ki, dki), bi) in k.iter().zip(dk.iter()).zip(self.b.iter()) {
            if *bi != 0.0 {
                x_next.axpy(dt * bi, ki, 1.0);
                g += dki * (dt * bi);
            }
        }

        let a = g.columns(0, nx).into_owned();
        let b = g.columns(nx, np).into_owned();
        Ok((x_next, a, b))
    }

    /// Apply `num_steps` consecutive steps of length `dt`
    pub fn try_integrate<F, E>(
        &self,
        x: &DVector<f64>,
        t: f64,
        dt: f64,
        num_steps: usize,
        f: F,
    ) -> Result<DVector<f64>, E>
    where
        F: Fn(f64, &DVector<f64>) -> Result<DVector<f64>, E>,
    {
        let mut state = x.clone();
        let mut time = t;
        for _ in 0..num_steps {
            state = self.try_step(&state, time, dt, &f)?;
            time += dt;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::convert::Infallible;
    use std::f64::consts::PI;

    fn rk(stages: usize) -> ExplicitRk {
        ExplicitRk::new(stages).unwrap()
    }

    /// Integrate an infallible right-hand side
    fn integrate<F>(rk: &ExplicitRk, x0: &DVector<f64>, dt: f64, steps: usize, f: F) -> DVector<f64>
    where
        F: Fn(f64, &DVector<f64>) -> DVector<f64>,
    {
        rk.try_integrate(x0, 0.0, dt, steps, |t, x| Ok::<_, Infallible>(f(t, x)))
            .unwrap()
    }

    #[test]
    fn test_rk4_exponential_decay() {
        // dx/dt = -x, x(0) = 1 -> x(1) = e^-1
        let x0 = DVector::from_vec(vec![1.0]);

        let x = integrate(&rk(4), &x0, 0.01, 100, |_t, x| -x.clone());

        assert_relative_eq!(x[0], (-1.0_f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_rk4_harmonic_oscillator() {
        // x'' = -x with x(0) = 1, v(0) = 0 -> x(t) = cos(t)
        let x0 = DVector::from_vec(vec![1.0, 0.0]);
        let dt = 0.001;
        let steps = (PI / 2.0 / dt) as usize;

        let x = integrate(&rk(4), &x0, dt, steps, |_t, s| DVector::from_vec(vec![s[1], -s[0]]));

        assert_relative_eq!(x[0], 0.0, epsilon = 1e-3);
        assert_relative_eq!(x[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_euler_linear() {
        let x0 = DVector::from_vec(vec![0.0]);

        let x = rk(1)
            .try_step(&x0, 0.0, 0.1, |_t, _x| Ok::<_, Infallible>(DVector::from_vec(vec![2.0])))
            .unwrap();

        assert_relative_eq!(x[0], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_time_dependent_rhs() {
        // dx/dt = t integrates exactly with the midpoint rule
        let x0 = DVector::from_vec(vec![0.0]);

        let x = integrate(&rk(2), &x0, 0.1, 10, |t, _x| DVector::from_vec(vec![t]));

        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_order_improves_accuracy() {
        let x0 = DVector::from_vec(vec![1.0]);
        let exact = (-1.0_f64).exp();

        let errors: Vec<f64> = (1..=4)
            .map(|stages| {
                let x = integrate(&rk(stages), &x0, 0.1, 10, |_t, x| -x.clone());
                (x[0] - exact).abs()
            })
            .collect();

        for pair in errors.windows(2) {
            assert!(pair[1] < pair[0], "errors should shrink with order: {:?}", errors);
        }
    }

    #[test]
    fn test_try_integrate_propagates_error() {
        let x0 = DVector::from_vec(vec![1.0]);

        let result = rk(4).try_integrate(&x0, 0.0, 0.1, 5, |t, x| {
            if t > 0.25 {
                Err("blow-up")
            } else {
                Ok(x.clone())
            }
        });
        assert_eq!(result, Err("blow-up"));

        let ok: Result<_, &str> = rk(4).try_integrate(&x0, 0.0, 0.1, 5, |_t, x| Ok(-x.clone()));
        assert_relative_eq!(ok.unwrap()[0], (-0.5_f64).exp(), epsilon = 1e-7);
    }

    /// Damped pendulum driven by a torque p: θ̇ = ω, ω̇ = −sin θ − 0.1 ω + p
    fn pendulum(x: &DVector<f64>, p: f64) -> DVector<f64> {
        DVector::from_vec(vec![x[1], -x[0].sin() - 0.1 * x[1] + p])
    }

    fn pendulum_with_jacobians(x: &DVector<f64>, p: f64) -> (DVector<f64>, DMatrix<f64>, DMatrix<f64>) {
        let jx = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -x[0].cos(), -0.1]);
        let jp = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        (pendulum(x, p), jx, jp)
    }

    #[test]
    fn test_step_sensitivities_match_finite_differences() {
        let x0 = DVector::from_vec(vec![0.7, -0.3]);
        let p = 0.2;
        let dt = 0.05;
        let h = 1e-6;

        for stages in 1..=4 {
            let scheme = rk(stages);
            let step = |x: &DVector<f64>, p: f64| {
                scheme
                    .try_step(x, 0.0, dt, |_t, x| Ok::<_, Infallible>(pendulum(x, p)))
                    .unwrap()
            };

            let (x_next, a, b) = scheme
                .try_step_sensitivities(&x0, 0.0, dt, 1, |_t, x| {
                    Ok::<_, Infallible>(pendulum_with_jacobians(x, p))
                })
                .unwrap();

            assert_relative_eq!(x_next, step(&x0, p), epsilon = 1e-14);

            for j in 0..2 {
                let mut xp = x0.clone();
                let mut xm = x0.clone();
                xp[j] += h;
                xm[j] -= h;
                let column = (step(&xp, p) - step(&xm, p)) / (2.0 * h);
                assert_relative_eq!(a.column(j).into_owned(), column, epsilon = 1e-8);
            }
            let column = (step(&x0, p + h) - step(&x0, p - h)) / (2.0 * h);
            assert_relative_eq!(b.column(0).into_owned(), column, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_sensitivities_of_linear_system() {
        // ẋ = -2x + p: Euler gives x⁺ = (1 − 2dt) x + dt p
        let x0 = DVector::from_vec(vec![1.0]);
        let (x_next, a, b) = rk(1)
            .try_step_sensitivities(&x0, 0.0, 0.1, 1, |_t, x| {
                Ok::<_, Infallible>((
                    DVector::from_vec(vec![-2.0 * x[0] + 0.5]),
                    DMatrix::from_element(1, 1, -2.0),
                    DMatrix::from_element(1, 1, 1.0),
                ))
            })
            .unwrap();

        assert_relative_eq!(x_next[0], 0.85, epsilon = 1e-12);
        assert_relative_eq!(a[(0, 0)], 0.8, epsilon = 1e-12);
        assert_relative_eq!(b[(0, 0)], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_unsupported_stages() {
        assert_eq!(ExplicitRk::new(0), Err(IntegratorError::UnsupportedStages(0)));
        assert_eq!(ExplicitRk::new(5), Err(IntegratorError::UnsupportedStages(5)));
        assert_eq!(ExplicitRk::new(4).unwrap().stages(), 4);
    }
}
