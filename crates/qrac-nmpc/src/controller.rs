//! Receding-Horizon Controller
//!
//! Main interface of the NMPC. Every control period the controller pins the
//! first shooting node to the measured state, loads the reference window,
//! solves the OCP and hands back the first control of the optimal sequence.
//!
//! The backend is a type parameter so the same loop drives the embedded SQP
//! solver or a generated acados solver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use qrac_core::artifacts::{ArtifactError, Artifacts};
use qrac_core::control::Controller;
use qrac_core::dynamics::Dynamics;

use crate::config::{NmpcConfig, SolverOptions};
use crate::ocp::OcpDefinition;
use crate::solver::{Field, OcpBackend, SolveStatistics, SolverError, SolverStatus};
use crate::sqp::SqpSolver;
use crate::trajectory::PredictedTrajectory;

/// Controller errors
#[derive(Debug, Error)]
pub enum NmpcError {
    #[error("Weight {name} has shape {got:?}, expected {expected:?}")]
    WeightShape {
        name: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("{name} contains non-finite values")]
    NonFinite { name: &'static str },
    #[error("Bound {name} has {got} entries, expected {expected}")]
    BoundLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Control bound {index} is inverted: {lower} > {upper}")]
    InvertedBounds { index: usize, lower: f64, upper: f64 },
    #[error("Time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),
    #[error("Horizon needs at least one node, got {0}")]
    InvalidHorizon(usize),
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

/// Builder for [`Nmpc`]
///
/// Starts from [`NmpcConfig::default`]; every setter overrides one part.
pub struct NmpcBuilder {
    model: Arc<dyn Dynamics>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    u_min: DVector<f64>,
    u_max: DVector<f64>,
    time_step: f64,
    num_nodes: usize,
    real_time: bool,
    options: SolverOptions,
}

impl NmpcBuilder {
    pub fn new(model: Arc<dyn Dynamics>) -> Self {
        Self::from_config(model, &NmpcConfig::default())
    }

    /// Take weights, bounds, horizon and solver options from `config`
    pub fn from_config(model: Arc<dyn Dynamics>, config: &NmpcConfig) -> Self {
        Self {
            model,
            q: config.weights.q_matrix(),
            r: config.weights.r_matrix(),
            u_min: DVector::from_column_slice(&config.bounds.u_min),
            u_max: DVector::from_column_slice(&config.bounds.u_max),
            time_step: config.horizon.time_step,
            num_nodes: config.horizon.num_nodes,
            real_time: config.real_time,
            options: config.solver.clone(),
        }
    }

    pub fn weights(mut self, q: DMatrix<f64>, r: DMatrix<f64>) -> Self {
        self.q = q;
        self.r = r;
        self
    }

    pub fn input_bounds(mut self, u_min: DVector<f64>, u_max: DVector<f64>) -> Self {
        self.u_min = u_min;
        self.u_max = u_max;
        self
    }

    /// Shooting interval [s] and number of intervals
    pub fn horizon(mut self, time_step: f64, num_nodes: usize) -> Self {
        self.time_step = time_step;
        self.num_nodes = num_nodes;
        self
    }

    pub fn real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    pub fn options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the problem, write its definition and configure `B`
    pub fn build<B: OcpBackend>(self) -> Result<Nmpc<B>, NmpcError> {
        let ocp = OcpDefinition::new(
            self.model.as_ref(),
            &self.q,
            &self.r,
            &self.u_min,
            &self.u_max,
            self.time_step,
            self.num_nodes,
            &self.options,
        )?;

        let root = self
            .options
            .artifact_root
            .clone()
            .unwrap_or_else(Artifacts::default_root);
        let artifacts = Artifacts::create(&root, &ocp.model_name, "ocp")?;
        artifacts.write_json("ocp.json", &ocp)?;

        let backend = B::configure(&ocp, self.model, &self.options)?;

        log::info!(
            "NMPC ready: model={} N={} dt={} tf={:.3}s real_time={}",
            ocp.model_name,
            ocp.n(),
            ocp.time_step,
            ocp.tf(),
            self.real_time
        );

        Ok(Nmpc {
            ocp,
            backend,
            u_min: self.u_min,
            real_time: self.real_time,
            last_status: SolverStatus::default(),
            _artifacts: artifacts,
        })
    }
}

/// Nonlinear model predictive controller
///
/// The reference `x_set` is a flat vector of `N·nx` entries; node `k`
/// occupies `[k·nx, (k+1)·nx)`. The control reference is `u_min` on every
/// node.
pub struct Nmpc<B: OcpBackend = SqpSolver> {
    ocp: OcpDefinition,
    backend: B,
    u_min: DVector<f64>,
    real_time: bool,
    last_status: SolverStatus,
    _artifacts: Artifacts,
}

impl Nmpc<SqpSolver> {
    /// Build a controller with the embedded SQP backend and default options
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn Dynamics>,
        q: &DMatrix<f64>,
        r: &DMatrix<f64>,
        u_min: &DVector<f64>,
        u_max: &DVector<f64>,
        time_step: f64,
        num_nodes: usize,
        real_time: bool,
    ) -> Result<Self, NmpcError> {
        NmpcBuilder::new(model)
            .weights(q.clone(), r.clone())
            .input_bounds(u_min.clone(), u_max.clone())
            .horizon(time_step, num_nodes)
            .real_time(real_time)
            .build()
    }
}

impl<B: OcpBackend> Nmpc<B> {
    /// Solve the OCP from `x` towards `x_set`
    ///
    /// Lengths are checked before the backend is touched. A non-zero solver
    /// status is returned and logged, not raised; the backend keeps its best
    /// iterate. In real-time mode the call lasts at least one control period.
    pub fn solve(&mut self, x: &DVector<f64>, x_set: &DVector<f64>) -> Result<SolverStatus, NmpcError> {
        let entry = Instant::now();
        let d = self.ocp.dims;

        if x.len() != d.nx {
            return Err(SolverError::InvalidStateDimension {
                expected: d.nx,
                got: x.len(),
            }
            .into());
        }
        if x_set.len() != self.n_set() {
            return Err(SolverError::InvalidReferenceLength {
                expected: self.n_set(),
                got: x_set.len(),
            }
            .into());
        }

        self.backend.set(0, Field::Lbx, x.as_slice())?;
        self.backend.set(0, Field::Ubx, x.as_slice())?;

        let mut yref = DVector::zeros(d.ny);
        yref.rows_mut(d.nx, d.nu).copy_from(&self.u_min);
        for k in 0..d.n {
            yref.rows_mut(0, d.nx).copy_from(&x_set.rows(k * d.nx, d.nx));
            self.backend.set(k, Field::Yref, yref.as_slice())?;
        }

        let status = self.backend.solve();
        self.last_status = status;

        let stats = self.backend.statistics();
        log::debug!(
            "NMPC solve: status={:?} sqp_iter={} qp_iter={} solve={:.3}ms call={:.3}ms",
            status,
            stats.sqp_iterations,
            stats.qp_iterations,
            stats.solve_time_ms,
            entry.elapsed().as_secs_f64() * 1000.0
        );
        if !status.is_success() {
            log::warn!("OCP solver returned status {} ({:?})", status.code(), status);
        }

        if self.real_time {
            let deadline = entry + Duration::from_secs_f64(self.ocp.time_step);
            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
            }
        }

        Ok(status)
    }

    /// Solve and return the control at node 0
    pub fn get_input(&mut self, x: &DVector<f64>, x_set: &DVector<f64>) -> Result<DVector<f64>, NmpcError> {
        self.solve(x, x_set)?;
        Ok(self.backend.get(0, Field::U)?)
    }

    /// Solve and return the predicted state at node 1
    pub fn get_state(&mut self, x: &DVector<f64>, x_set: &DVector<f64>) -> Result<DVector<f64>, NmpcError> {
        self.solve(x, x_set)?;
        Ok(self.backend.get(1, Field::X)?)
    }

    /// Solve and return states and controls of nodes `0..N`
    pub fn get_trajectory(
        &mut self,
        x: &DVector<f64>,
        x_set: &DVector<f64>,
    ) -> Result<PredictedTrajectory, NmpcError> {
        let status = self.solve(x, x_set)?;
        let n = self.ocp.n();

        let mut states = Vec::with_capacity(n);
        let mut controls = Vec::with_capacity(n);
        for k in 0..n {
            states.push(self.backend.get(k, Field::X)?);
            controls.push(self.backend.get(k, Field::U)?);
        }

        Ok(PredictedTrajectory::new(self.ocp.time_step, states, controls, status))
    }

    /// Status of the last solve ([`SolverStatus::Ready`] before the first)
    pub fn last_status(&self) -> SolverStatus {
        self.last_status
    }

    pub fn statistics(&self) -> SolveStatistics {
        self.backend.statistics()
    }

    /// Control period [s]
    pub fn dt(&self) -> f64 {
        self.ocp.time_step
    }

    pub fn num_nodes(&self) -> usize {
        self.ocp.n()
    }

    /// Reference vector length N·nx
    pub fn n_set(&self) -> usize {
        self.ocp.n() * self.ocp.dims.nx
    }

    pub fn is_real_time(&self) -> bool {
        self.real_time
    }

    pub fn ocp(&self) -> &OcpDefinition {
        &self.ocp
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: OcpBackend> Controller for Nmpc<B> {
    type Error = NmpcError;

    fn dt(&self) -> f64 {
        Nmpc::dt(self)
    }

    fn nx(&self) -> usize {
        self.ocp.dims.nx
    }

    fn nu(&self) -> usize {
        self.ocp.dims.nu
    }

    fn n_set(&self) -> usize {
        Nmpc::n_set(self)
    }

    fn get_input(&mut self, x: &DVector<f64>, x_set: &DVector<f64>) -> Result<DVector<f64>, NmpcError> {
        Nmpc::get_input(self, x, x_set)
    }
}
