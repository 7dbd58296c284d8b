//! Optimal Control Problem (OCP) Definition
//!
//! Multiple-shooting OCP for a [`Dynamics`] model, in the acados
//! `LINEAR_LS` layout:
//!
//! ```text
//! minimize    Σ_{k<N} ‖Vx x_k + Vu u_k − yref_k‖²_W  +  ‖Vx_e x_N − yref_e‖²_{W_e}
//! subject to  x_0 = x̂                    (lbx_0 = ubx_0 = x̂)
//!             x_{k+1} = Φ_ERK(x_k, u_k, dt)
//!             lbu ≤ u_k ≤ ubu             k = 0..N-1
//!             lbx ≤ x_k[idxbx] ≤ ubx      k = 1..N
//! ```
//!
//! with `W = diag(Q, R)`, `Vx = [I; 0]`, `Vu = [0; I]` and the yaw angle as
//! the only bounded state. There is no terminal cost (`ny_e = 0`).
//!
//! The definition is fixed after construction; between solves only the
//! initial-state bounds and the stage references change. It is written as
//! `ocp.json` next to the solver artifacts.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use qrac_core::dynamics::{Dynamics, Quadrotor};

use crate::config::SolverOptions;
use crate::controller::NmpcError;
use crate::solver::{Field, SolverError};

/// OCP dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcpDims {
    /// Number of shooting intervals
    pub n: usize,
    pub nx: usize,
    pub nu: usize,
    /// Stage cost output dimension (nx + nu)
    pub ny: usize,
    /// Terminal cost output dimension
    pub ny_e: usize,
    /// Bounded states at stage 0
    pub nbx_0: usize,
    /// Bounded states at stages 1..N-1
    pub nbx: usize,
    /// Bounded states at stage N
    pub nbx_e: usize,
    /// Bounded controls
    pub nbu: usize,
}

/// Linear least-squares cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearLsCost {
    /// Stage weight, ny × ny
    pub w: DMatrix<f64>,
    /// State selection, ny × nx
    pub vx: DMatrix<f64>,
    /// Control selection, ny × nu
    pub vu: DMatrix<f64>,
    /// Initial stage reference (overwritten each solve)
    pub yref: DVector<f64>,
    /// Terminal weight, ny_e × ny_e
    pub w_e: DMatrix<f64>,
    /// Terminal state selection, ny_e × nx
    pub vx_e: DMatrix<f64>,
    pub yref_e: DVector<f64>,
}

/// Box constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcpConstraints {
    /// Initial state placeholder (overwritten each solve)
    pub x0: DVector<f64>,
    pub idxbu: Vec<usize>,
    pub lbu: DVector<f64>,
    pub ubu: DVector<f64>,
    pub idxbx: Vec<usize>,
    pub lbx: DVector<f64>,
    pub ubx: DVector<f64>,
    pub idxbx_e: Vec<usize>,
    pub lbx_e: DVector<f64>,
    pub ubx_e: DVector<f64>,
}

/// Solver settings recorded with the problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcpSolverSettings {
    pub nlp_solver_type: String,
    pub hessian_approx: String,
    pub integrator_type: String,
    pub sim_method_num_stages: usize,
    pub sim_method_num_steps: usize,
    pub nlp_solver_max_iter: usize,
    pub qp_solver_iter_max: u32,
    pub nlp_solver_tol_stat: f64,
    pub qp_solver_warm_start: bool,
    /// Total horizon time tf = N·dt [s]
    pub tf: f64,
}

/// Complete OCP definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcpDefinition {
    pub model_name: String,
    pub state_labels: Vec<String>,
    pub control_labels: Vec<String>,
    pub dims: OcpDims,
    pub cost: LinearLsCost,
    pub constraints: OcpConstraints,
    pub solver_options: OcpSolverSettings,
    /// Shooting interval length [s]
    pub time_step: f64,
}

impl OcpDefinition {
    /// Build and validate the tracking OCP for `model`
    ///
    /// `q` must be nx × nx, `r` nu × nu, both finite. The bounds need nu
    /// finite entries with `u_min <= u_max`; `time_step` must be positive
    /// and `num_nodes` at least 1.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: &dyn Dynamics,
        q: &DMatrix<f64>,
        r: &DMatrix<f64>,
        u_min: &DVector<f64>,
        u_max: &DVector<f64>,
        time_step: f64,
        num_nodes: usize,
        options: &SolverOptions,
    ) -> Result<Self, NmpcError> {
        let (nx, nu) = (model.nx(), model.nu());
        validate(nx, nu, q, r, u_min, u_max, time_step, num_nodes)?;

        let ny = nx + nu;
        let mut w = DMatrix::zeros(ny, ny);
        w.view_mut((0, 0), (nx, nx)).copy_from(q);
        w.view_mut((nx, nx), (nu, nu)).copy_from(r);

        let mut vx = DMatrix::zeros(ny, nx);
        vx.view_mut((0, 0), (nx, nx)).fill_with_identity();
        let mut vu = DMatrix::zeros(ny, nu);
        vu.view_mut((nx, 0), (nu, nu)).fill_with_identity();

        // yaw kept in [0, 2π] on every node after the first
        let yaw = if nx > Quadrotor::YAW_INDEX { vec![Quadrotor::YAW_INDEX] } else { Vec::new() };
        let nb = yaw.len();
        let lbx = DVector::zeros(nb);
        let ubx = DVector::from_element(nb, 2.0 * PI);

        let dims = OcpDims {
            n: num_nodes,
            nx,
            nu,
            ny,
            ny_e: 0,
            nbx_0: nx,
            nbx: nb,
            nbx_e: nb,
            nbu: nu,
        };

        Ok(Self {
            model_name: model.name().to_string(),
            state_labels: model.state_labels().iter().map(|s| s.to_string()).collect(),
            control_labels: model.control_labels().iter().map(|s| s.to_string()).collect(),
            dims,
            cost: LinearLsCost {
                w,
                vx,
                vu,
                yref: DVector::zeros(ny),
                w_e: DMatrix::zeros(0, 0),
                vx_e: DMatrix::zeros(0, nx),
                yref_e: DVector::zeros(0),
            },
            constraints: OcpConstraints {
                x0: DVector::zeros(nx),
                idxbu: (0..nu).collect(),
                lbu: u_min.clone(),
                ubu: u_max.clone(),
                idxbx: yaw.clone(),
                lbx: lbx.clone(),
                ubx: ubx.clone(),
                idxbx_e: yaw,
                lbx_e: lbx,
                ubx_e: ubx,
            },
            solver_options: OcpSolverSettings {
                nlp_solver_type: "SQP".to_string(),
                hessian_approx: "GAUSS_NEWTON".to_string(),
                integrator_type: "ERK".to_string(),
                sim_method_num_stages: options.integrator_stages,
                sim_method_num_steps: 1,
                nlp_solver_max_iter: options.max_sqp_iter,
                qp_solver_iter_max: options.max_qp_iter,
                nlp_solver_tol_stat: options.tolerance,
                qp_solver_warm_start: options.warm_start,
                tf: time_step * num_nodes as f64,
            },
            time_step,
        })
    }

    /// Number of shooting intervals
    pub fn n(&self) -> usize {
        self.dims.n
    }

    /// Total horizon time [s]
    pub fn tf(&self) -> f64 {
        self.solver_options.tf
    }

    /// State bound indices and values active at `stage`
    pub fn state_bounds(&self, stage: usize) -> (&[usize], &DVector<f64>, &DVector<f64>) {
        let c = &self.constraints;
        if stage == self.dims.n {
            (&c.idxbx_e, &c.lbx_e, &c.ubx_e)
        } else {
            (&c.idxbx, &c.lbx, &c.ubx)
        }
    }

    /// Expected length of `field` at `stage`
    pub fn field_dim(&self, stage: usize, field: Field) -> Result<usize, SolverError> {
        self.dims.field_dim(stage, field)
    }

    /// Check that `values` fits `field` at `stage`
    pub fn check_field(&self, stage: usize, field: Field, values: &[f64]) -> Result<(), SolverError> {
        self.dims.check_field(stage, field, values)
    }
}

impl OcpDims {
    /// Expected length of `field` at `stage`
    pub fn field_dim(&self, stage: usize, field: Field) -> Result<usize, SolverError> {
        // no control at the terminal node
        let max = if field == Field::U { self.n - 1 } else { self.n };
        if stage > max {
            return Err(SolverError::InvalidStage { stage, max });
        }
        let dim = match field {
            Field::Lbx | Field::Ubx if stage == 0 => self.nbx_0,
            Field::Lbx | Field::Ubx if stage == self.n => self.nbx_e,
            Field::Lbx | Field::Ubx => self.nbx,
            Field::Yref if stage == self.n => self.ny_e,
            Field::Yref => self.ny,
            Field::X => self.nx,
            Field::U => self.nu,
        };
        Ok(dim)
    }

    /// Check that `values` fits `field` at `stage`
    pub fn check_field(&self, stage: usize, field: Field, values: &[f64]) -> Result<(), SolverError> {
        let expected = self.field_dim(stage, field)?;
        if values.len() != expected {
            return Err(SolverError::InvalidFieldLength {
                field,
                stage,
                expected,
                got: values.len(),
            });
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn validate(
    nx: usize,
    nu: usize,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
    u_min: &DVector<f64>,
    u_max: &DVector<f64>,
    time_step: f64,
    num_nodes: usize,
) -> Result<(), NmpcError> {
    if q.shape() != (nx, nx) {
        return Err(NmpcError::WeightShape { name: "Q", expected: (nx, nx), got: q.shape() });
    }
    if r.shape() != (nu, nu) {
        return Err(NmpcError::WeightShape { name: "R", expected: (nu, nu), got: r.shape() });
    }
    if q.iter().chain(r.iter()).any(|v| !v.is_finite()) {
        return Err(NmpcError::NonFinite { name: "cost weights" });
    }

    for (name, bound) in [("u_min", u_min), ("u_max", u_max)] {
        if bound.len() != nu {
            return Err(NmpcError::BoundLength { name, expected: nu, got: bound.len() });
        }
        if bound.iter().any(|v| !v.is_finite()) {
            return Err(NmpcError::NonFinite { name });
        }
    }
    if let Some(index) = (0..nu).find(|&i| u_min[i] > u_max[i]) {
        return Err(NmpcError::InvertedBounds {
            index,
            lower: u_min[index],
            upper: u_max[index],
        });
    }

    if !time_step.is_finite() || time_step <= 0.0 {
        return Err(NmpcError::InvalidTimeStep(time_step));
    }
    if num_nodes == 0 {
        return Err(NmpcError::InvalidHorizon(num_nodes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn crazyflie_ocp() -> OcpDefinition {
        let model = Quadrotor::crazyflie(0.0, 0.0, 0.0).unwrap();
        OcpDefinition::new(
            &model,
            &DMatrix::identity(12, 12),
            &DMatrix::zeros(4, 4),
            &DVector::zeros(4),
            &DVector::from_element(4, 0.64),
            0.01,
            32,
            &SolverOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_ocp_dimensions() {
        let ocp = crazyflie_ocp();

        assert_eq!(ocp.n(), 32);
        assert_eq!(ocp.dims.ny, 16);
        assert_eq!(ocp.dims.nbx_0, 12);
        assert_eq!(ocp.dims.nbx, 1);
        assert_eq!(ocp.dims.ny_e, 0);
        assert_relative_eq!(ocp.tf(), 0.32, epsilon = 1e-12);
        assert_eq!(ocp.state_labels.len(), 12);
    }

    #[test]
    fn test_cost_layout() {
        let ocp = crazyflie_ocp();
        let c = &ocp.cost;

        assert_eq!(c.w.shape(), (16, 16));
        assert_eq!(c.w[(11, 11)], 1.0);
        assert_eq!(c.w[(12, 12)], 0.0);

        // y = [x; u]
        let x = DVector::from_fn(12, |i, _| i as f64);
        let u = DVector::from_element(4, 7.0);
        let y = &c.vx * &x + &c.vu * &u;
        assert_eq!(y.rows(0, 12).into_owned(), x);
        assert_eq!(y.rows(12, 4).into_owned(), u);
    }

    #[test]
    fn test_yaw_bounds() {
        let ocp = crazyflie_ocp();

        let (idx, lb, ub) = ocp.state_bounds(5);
        assert_eq!(idx, &[5]);
        assert_eq!(lb[0], 0.0);
        assert_relative_eq!(ub[0], 2.0 * PI);

        let (idx_e, _, _) = ocp.state_bounds(32);
        assert_eq!(idx_e, &[5]);
    }

    #[test]
    fn test_field_dims() {
        let ocp = crazyflie_ocp();

        assert_eq!(ocp.field_dim(0, Field::Lbx).unwrap(), 12);
        assert_eq!(ocp.field_dim(3, Field::Ubx).unwrap(), 1);
        assert_eq!(ocp.field_dim(31, Field::Yref).unwrap(), 16);
        assert_eq!(ocp.field_dim(32, Field::Yref).unwrap(), 0);
        assert_eq!(ocp.field_dim(32, Field::X).unwrap(), 12);
        assert!(ocp.field_dim(32, Field::U).is_err());
        assert!(matches!(
            ocp.field_dim(33, Field::X),
            Err(SolverError::InvalidStage { stage: 33, max: 32 })
        ));
        assert!(matches!(
            ocp.check_field(0, Field::Lbx, &[0.0; 11]),
            Err(SolverError::InvalidFieldLength { expected: 12, got: 11, .. })
        ));
    }

    #[test]
    fn test_weight_shapes_validated() {
        let model = Quadrotor::crazyflie(0.0, 0.0, 0.0).unwrap();
        let u_min = DVector::zeros(4);
        let u_max = DVector::from_element(4, 0.64);
        let opts = SolverOptions::default();

        let bad_q = OcpDefinition::new(
            &model,
            &DMatrix::identity(11, 11),
            &DMatrix::zeros(4, 4),
            &u_min,
            &u_max,
            0.01,
            32,
            &opts,
        );
        assert!(matches!(bad_q, Err(NmpcError::WeightShape { name: "Q", .. })));

        let bad_r = OcpDefinition::new(
            &model,
            &DMatrix::identity(12, 12),
            &DMatrix::zeros(4, 3),
            &u_min,
            &u_max,
            0.01,
            32,
            &opts,
        );
        assert!(matches!(bad_r, Err(NmpcError::WeightShape { name: "R", .. })));
    }

    #[test]
    fn test_bounds_and_steps_validated() {
        let model = Quadrotor::crazyflie(0.0, 0.0, 0.0).unwrap();
        let q = DMatrix::identity(12, 12);
        let r = DMatrix::zeros(4, 4);
        let opts = SolverOptions::default();
        let lo = DVector::zeros(4);
        let hi = DVector::from_element(4, 0.64);

        let short = DVector::zeros(3);
        assert!(matches!(
            OcpDefinition::new(&model, &q, &r, &short, &hi, 0.01, 32, &opts),
            Err(NmpcError::BoundLength { name: "u_min", expected: 4, got: 3 })
        ));
        assert!(matches!(
            OcpDefinition::new(&model, &q, &r, &hi, &lo, 0.01, 32, &opts),
            Err(NmpcError::InvertedBounds { index: 0, .. })
        ));
        assert!(matches!(
            OcpDefinition::new(&model, &q, &r, &lo, &hi, 0.0, 32, &opts),
            Err(NmpcError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            OcpDefinition::new(&model, &q, &r, &lo, &hi, f64::NAN, 32, &opts),
            Err(NmpcError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            OcpDefinition::new(&model, &q, &r, &lo, &hi, 0.01, 0, &opts),
            Err(NmpcError::InvalidHorizon(0))
        ));

        let mut q_nan = q.clone();
        q_nan[(0, 0)] = f64::NAN;
        assert!(matches!(
            OcpDefinition::new(&model, &q_nan, &r, &lo, &hi, 0.01, 32, &opts),
            Err(NmpcError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_definition_serializes() {
        let ocp = crazyflie_ocp();
        let json = serde_json::to_string(&ocp).unwrap();
        let back: OcpDefinition = serde_json::from_str(&json).unwrap();

        assert_eq!(back.dims, ocp.dims);
        assert_eq!(back.model_name, "Nonlinear_Quadrotor");
        assert_eq!(back.solver_options.nlp_solver_type, "SQP");
    }
}
