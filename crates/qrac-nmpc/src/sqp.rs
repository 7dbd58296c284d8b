//! Embedded Gauss-Newton SQP backend
//!
//! Solves the OCP from [`crate::ocp`] by sequential quadratic programming
//! around a single-shooting rollout:
//!
//! 1. Roll out `x_{k+1} = Φ(x_k, u_k)` with the ERK scheme. The same pass
//!    chains the model Jacobians through the stages and yields
//!    `A_k = ∂Φ/∂x`, `B_k = ∂Φ/∂u`.
//! 2. Solve the sparse Gauss-Newton QP in the steps
//!    `z = (Δu_0, …, Δu_{N-1}, Δx_1, …, Δx_N)`:
//!
//!    ```text
//!    min  Σ_k ½‖Vx Δx_k + Vu Δu_k + r_k‖²_W     (Δx_0 = 0)
//!    s.t. Δx_{k+1} = A_k Δx_k + B_k Δu_k
//!         lbu ≤ u_k + Δu_k ≤ ubu
//!         lbx ≤ x_k + Δx_k ≤ ubx                 on idxbx, k = 1..N
//!    ```
//!
//! 3. Take the full control step, project onto the control box, stop once
//!    `‖Δu‖∞` drops below the tolerance.
//!
//! The Hessian is fixed by the weights, and the sparsity pattern of the
//! constraints by the dimensions. One Clarabel instance is set up on the
//! first QP; later QPs only overwrite `q`, `A` and `b`.
//!
//! The returned status follows the acados codes: iteration budget exhausted
//! is [`SolverStatus::MaxIterations`], an infeasible or broken QP is
//! [`SolverStatus::QpFailure`]. Either way the best iterate is kept.

use std::sync::Arc;
use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettings, DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus as QpStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

use qrac_core::dynamics::{Dynamics, ModelError};
use qrac_core::math::ExplicitRk;

use crate::config::SolverOptions;
use crate::ocp::{OcpDefinition, OcpDims};
use crate::solver::{Field, OcpBackend, SolveStatistics, SolverError, SolverStatus};

/// Levenberg term added to the Hessian diagonal
const HESSIAN_REGULARIZATION: f64 = 1e-8;

/// Largest constraint violation accepted from an unconverged QP
const QP_FEASIBILITY_TOL: f64 = 1e-3;

/// Shooting-node linearization around the current control sequence
struct Linearization {
    xs: Vec<DVector<f64>>,
    a: Vec<DMatrix<f64>>,
    b: Vec<DMatrix<f64>>,
}

/// State bound row of the QP: node, state index, position in the bound vectors
#[derive(Debug, Clone, Copy)]
struct StateBound {
    node: usize,
    state: usize,
    slot: usize,
}

/// Sparse step QP with a persistent Clarabel instance
struct StepQp {
    n: usize,
    nx: usize,
    nu: usize,
    p: CscMatrix<f64>,
    bounds: Vec<StateBound>,
    max_iter: u32,
    solver: Option<DefaultSolver<f64>>,
}

impl StepQp {
    fn new(
        dims: OcpDims,
        cost: (&DMatrix<f64>, &DMatrix<f64>, &DMatrix<f64>),
        terminal: (&DMatrix<f64>, &DMatrix<f64>),
        bounds: Vec<StateBound>,
        max_iter: u32,
    ) -> Self {
        Self {
            n: dims.n,
            nx: dims.nx,
            nu: dims.nu,
            p: hessian(dims, cost, terminal),
            bounds,
            max_iter,
            solver: None,
        }
    }

    fn num_controls(&self) -> usize {
        self.n * self.nu
    }

    fn num_variables(&self) -> usize {
        self.n * (self.nu + self.nx)
    }

    /// Column of Δx_k, k in 1..=N
    fn state_column(&self, k: usize, i: usize) -> usize {
        self.num_controls() + (k - 1) * self.nx + i
    }

    fn num_equalities(&self) -> usize {
        self.n * self.nx
    }

    fn num_inequalities(&self) -> usize {
        2 * self.num_controls() + 2 * self.bounds.len()
    }

    fn cones(&self) -> Vec<SupportedConeT<f64>> {
        vec![ZeroConeT(self.num_equalities()), NonnegativeConeT(self.num_inequalities())]
    }

    /// Dynamics rows, then control box rows, then state bound rows
    ///
    /// Every entry of the pattern is stored, zeros included, so the layout
    /// never changes between iterations.
    fn constraint_matrix(&self, lin: &Linearization) -> CscMatrix<f64> {
        let (n, nx, nu) = (self.n, self.nx, self.nu);
        let nv = self.num_variables();
        let m = self.num_equalities() + self.num_inequalities();
        let box_row = self.num_equalities();
        let bound_row = box_row + 2 * self.num_controls();

        let mut colptr = Vec::with_capacity(nv + 1);
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        colptr.push(0);

        // Δu_k enters Δx_{k+1} = A_k Δx_k + B_k Δu_k
        for k in 0..n {
            for c in 0..nu {
                let j = k * nu + c;
                for r in 0..nx {
                    rowval.push(k * nx + r);
                    nzval.push(-lin.b[k][(r, c)]);
                }
                rowval.push(box_row + 2 * j);
                nzval.push(1.0);
                rowval.push(box_row + 2 * j + 1);
                nzval.push(-1.0);
                colptr.push(rowval.len());
            }
        }

        for k in 1..=n {
            for c in 0..nx {
                rowval.push((k - 1) * nx + c);
                nzval.push(1.0);
                if k < n {
                    for r in 0..nx {
                        rowval.push(k * nx + r);
                        nzval.push(-lin.a[k][(r, c)]);
                    }
                }
                for (i, bound) in self.bounds.iter().enumerate() {
                    if bound.node == k && bound.state == c {
                        rowval.push(bound_row + 2 * i);
                        nzval.push(1.0);
                        rowval.push(bound_row + 2 * i + 1);
                        nzval.push(-1.0);
                    }
                }
                colptr.push(rowval.len());
            }
        }

        CscMatrix::new(m, nv, colptr, rowval, nzval)
    }

    fn settings(&self) -> Result<DefaultSettings<f64>, String> {
        DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .verbose(false)
            .tol_gap_abs(1e-7)
            .tol_gap_rel(1e-7)
            .tol_feas(1e-7)
            .presolve_enable(false)
            .input_sparse_dropzeros(false)
            .build()
            .map_err(|e| e.to_string())
    }

    /// Solve for `z`, returning it with the interior-point iteration count
    fn solve(&mut self, q: &[f64], a: &CscMatrix<f64>, b: &[f64]) -> Result<(DVector<f64>, usize), usize> {
        if let Some(solver) = self.solver.as_mut() {
            let q_vec = q.to_vec();
            let b_vec = b.to_vec();
            let updated = solver
                .update_q(&q_vec)
                .and_then(|_| solver.update_A(&a.nzval))
                .and_then(|_| solver.update_b(&b_vec));
            if let Err(e) = updated {
                log::warn!("QP data update rejected, rebuilding: {}", e);
                self.solver = None;
            }
        }

        if self.solver.is_none() {
            let settings = match self.settings() {
                Ok(settings) => settings,
                Err(e) => {
                    log::error!("Invalid QP settings: {}", e);
                    return Err(0);
                }
            };
            match DefaultSolver::new(&self.p, q, a, b, &self.cones(), settings) {
                Ok(solver) => self.solver = Some(solver),
                Err(e) => {
                    log::warn!("QP setup failed: {:?}", e);
                    return Err(0);
                }
            }
        }

        let Some(solver) = self.solver.as_mut() else {
            return Err(0);
        };
        solver.solve();

        let iterations = solver.info.iterations as usize;
        let sol = &solver.solution;
        let usable = matches!(
            sol.status,
            QpStatus::Solved | QpStatus::AlmostSolved | QpStatus::MaxIterations
        );
        if !usable || sol.x.iter().any(|v| !v.is_finite()) {
            log::debug!("QP subproblem failed: {:?}", sol.status);
            return Err(iterations);
        }

        let status = sol.status;
        let x = sol.x.clone();
        let violation = self.violation(a, b, &x);
        if violation > QP_FEASIBILITY_TOL {
            log::debug!("QP step violates constraints by {:.3e} ({:?})", violation, status);
            return Err(iterations);
        }
        Ok((DVector::from_column_slice(&x), iterations))
    }

    /// Largest violation of `A z = b` on the dynamics rows and `A z ≤ b` elsewhere
    fn violation(&self, a: &CscMatrix<f64>, b: &[f64], z: &[f64]) -> f64 {
        let mut az = vec![0.0; a.m];
        for (j, zj) in z.iter().enumerate() {
            for idx in a.colptr[j]..a.colptr[j + 1] {
                az[a.rowval[idx]] += a.nzval[idx] * zj;
            }
        }

        let n_eq = self.num_equalities();
        az.iter()
            .zip(b)
            .enumerate()
            .map(|(row, (lhs, rhs))| {
                if row < n_eq {
                    (lhs - rhs).abs()
                } else {
                    (lhs - rhs).max(0.0)
                }
            })
            .fold(0.0, f64::max)
    }
}

/// Upper triangle of the Gauss-Newton Hessian over `z`
///
/// Stage k couples Δu_k with Δx_k; the stage-0 state step is zero.
fn hessian(
    dims: OcpDims,
    (w, vx, vu): (&DMatrix<f64>, &DMatrix<f64>, &DMatrix<f64>),
    (w_e, vx_e): (&DMatrix<f64>, &DMatrix<f64>),
) -> CscMatrix<f64> {
    let OcpDims { n, nx, nu, .. } = dims;
    let nvu = n * nu;

    let huu = vu.transpose() * w * vu;
    let hux = vu.transpose() * w * vx;
    let hxx = vx.transpose() * w * vx;
    let hxx_e = vx_e.transpose() * w_e * vx_e;

    let mut colptr = Vec::with_capacity(n * (nu + nx) + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);

    for k in 0..n {
        for c in 0..nu {
            for r in 0..=c {
                let mut v = 0.5 * (huu[(r, c)] + huu[(c, r)]);
                if r == c {
                    v += HESSIAN_REGULARIZATION;
                }
                rowval.push(k * nu + r);
                nzval.push(v);
            }
            colptr.push(rowval.len());
        }
    }

    for k in 1..=n {
        let h = if k == n { &hxx_e } else { &hxx };
        for c in 0..nx {
            if k < n {
                for r in 0..nu {
                    rowval.push(k * nu + r);
                    nzval.push(hux[(r, c)]);
                }
            }
            for r in 0..=c {
                let mut v = 0.5 * (h[(r, c)] + h[(c, r)]);
                if r == c {
                    v += HESSIAN_REGULARIZATION;
                }
                rowval.push(nvu + (k - 1) * nx + r);
                nzval.push(v);
            }
            colptr.push(rowval.len());
        }
    }

    let nv = n * (nu + nx);
    CscMatrix::new(nv, nv, colptr, rowval, nzval)
}

/// Gauss-Newton SQP solver
pub struct SqpSolver {
    model: Arc<dyn Dynamics>,
    scheme: ExplicitRk,
    dims: OcpDims,
    dt: f64,
    options: SolverOptions,

    w: DMatrix<f64>,
    vx: DMatrix<f64>,
    vu: DMatrix<f64>,
    w_e: DMatrix<f64>,
    vx_e: DMatrix<f64>,
    yref: Vec<DVector<f64>>,
    yref_e: DVector<f64>,

    lbu: DVector<f64>,
    ubu: DVector<f64>,
    /// Per-stage state bounds; stage 0 covers every state
    lbx: Vec<DVector<f64>>,
    ubx: Vec<DVector<f64>>,

    qp: StepQp,
    xs: Vec<DVector<f64>>,
    us: Vec<DVector<f64>>,
    last_stats: SolveStatistics,
}

impl SqpSolver {
    fn initial_controls(&self) -> Vec<DVector<f64>> {
        let u0 = DVector::zeros(self.dims.nu).sup(&self.lbu).inf(&self.ubu);
        vec![u0; self.dims.n]
    }

    /// Stage-0 bounds pin the initial state; a non-degenerate box collapses
    /// onto its midpoint
    fn initial_state(&self) -> DVector<f64> {
        (&self.lbx[0] + &self.ubx[0]) * 0.5
    }

    fn discrete_step(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, ModelError> {
        let model = &self.model;
        self.scheme
            .try_step(x, 0.0, self.dt, |_t, x| model.derivative(x, u))
    }

    /// Simulate the horizon from `x0` under the current controls
    fn rollout(&self, x0: &DVector<f64>) -> Result<Vec<DVector<f64>>, SolverStatus> {
        let mut xs = Vec::with_capacity(self.dims.n + 1);
        xs.push(x0.clone());
        for k in 0..self.dims.n {
            let next = self.discrete_step(&xs[k], &self.us[k]).map_err(model_failure)?;
            if next.iter().any(|v| !v.is_finite()) {
                return Err(SolverStatus::NaNDetected);
            }
            xs.push(next);
        }
        Ok(xs)
    }

    /// Rollout with the discrete Jacobians of every interval
    fn linearize(&self, x0: &DVector<f64>) -> Result<Linearization, SolverStatus> {
        let n = self.dims.n;
        let model = &self.model;
        let mut xs = Vec::with_capacity(n + 1);
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        xs.push(x0.clone());

        for k in 0..n {
            let u = &self.us[k];
            let (next, ak, bk) = self
                .scheme
                .try_step_sensitivities(&xs[k], 0.0, self.dt, self.dims.nu, |_t, x| {
                    let f = model.derivative(x, u)?;
                    let (jx, ju) = model.jacobian(x, u)?;
                    Ok::<_, ModelError>((f, jx, ju))
                })
                .map_err(model_failure)?;
            if next.iter().chain(ak.iter()).chain(bk.iter()).any(|v| !v.is_finite()) {
                return Err(SolverStatus::NaNDetected);
            }
            xs.push(next);
            a.push(ak);
            b.push(bk);
        }
        Ok(Linearization { xs, a, b })
    }

    /// Least-squares objective ½ Σ ‖y_k − yref_k‖²_W at the states `xs`
    fn objective(&self, xs: &[DVector<f64>]) -> f64 {
        let mut cost = 0.0;
        for k in 0..self.dims.n {
            let r = &self.vx * &xs[k] + &self.vu * &self.us[k] - &self.yref[k];
            cost += 0.5 * r.dot(&(&self.w * &r));
        }
        if self.dims.ny_e > 0 {
            let r = &self.vx_e * &xs[self.dims.n] - &self.yref_e;
            cost += 0.5 * r.dot(&(&self.w_e * &r));
        }
        cost
    }

    /// Gradient of the QP objective at z = 0
    fn gradient(&self, lin: &Linearization) -> Vec<f64> {
        let OcpDims { n, nx, nu, .. } = self.dims;
        let mut q = vec![0.0; self.qp.num_variables()];

        for k in 0..n {
            let wr = &self.w * (&self.vx * &lin.xs[k] + &self.vu * &self.us[k] - &self.yref[k]);
            let gu = self.vu.transpose() * &wr;
            q[k * nu..(k + 1) * nu].copy_from_slice(gu.as_slice());
            if k > 0 {
                let gx = self.vx.transpose() * &wr;
                let col = self.qp.state_column(k, 0);
                q[col..col + nx].copy_from_slice(gx.as_slice());
            }
        }
        if self.dims.ny_e > 0 {
            let wr = &self.w_e * (&self.vx_e * &lin.xs[n] - &self.yref_e);
            let gx = self.vx_e.transpose() * wr;
            let col = self.qp.state_column(n, 0);
            q[col..col + nx].copy_from_slice(gx.as_slice());
        }
        q
    }

    /// Right-hand side: zero dynamics defects, then box and bound margins
    fn margins(&self, lin: &Linearization) -> Vec<f64> {
        let mut b = vec![0.0; self.qp.num_equalities()];
        b.reserve(self.qp.num_inequalities());

        for uk in &self.us {
            for i in 0..self.dims.nu {
                b.push(self.ubu[i] - uk[i]);
                b.push(uk[i] - self.lbu[i]);
            }
        }
        for bound in &self.qp.bounds {
            let x = lin.xs[bound.node][bound.state];
            b.push(self.ubx[bound.node][bound.slot] - x);
            b.push(x - self.lbx[bound.node][bound.slot]);
        }
        b
    }
}

impl OcpBackend for SqpSolver {
    fn configure(
        ocp: &OcpDefinition,
        model: Arc<dyn Dynamics>,
        options: &SolverOptions,
    ) -> Result<Self, SolverError> {
        let dims = ocp.dims;
        if model.nx() != dims.nx || model.nu() != dims.nu {
            return Err(SolverError::InitializationFailed(format!(
                "model has nx={} nu={}, problem has nx={} nu={}",
                model.nx(),
                model.nu(),
                dims.nx,
                dims.nu
            )));
        }
        if options.max_sqp_iter == 0 {
            return Err(SolverError::InvalidOptions("max_sqp_iter must be positive".to_string()));
        }
        if options.max_qp_iter == 0 {
            return Err(SolverError::InvalidOptions("max_qp_iter must be positive".to_string()));
        }
        if !options.tolerance.is_finite() || options.tolerance <= 0.0 {
            return Err(SolverError::InvalidOptions(format!(
                "tolerance must be positive, got {}",
                options.tolerance
            )));
        }
        let scheme = ExplicitRk::new(options.integrator_stages)
            .map_err(|e| SolverError::InvalidOptions(e.to_string()))?;

        let c = &ocp.constraints;
        let mut lbx = vec![c.x0.clone()];
        let mut ubx = vec![c.x0.clone()];
        for _ in 1..dims.n {
            lbx.push(c.lbx.clone());
            ubx.push(c.ubx.clone());
        }
        lbx.push(c.lbx_e.clone());
        ubx.push(c.ubx_e.clone());

        let mut bounds = Vec::new();
        for node in 1..=dims.n {
            let idx = if node == dims.n { &c.idxbx_e } else { &c.idxbx };
            for (slot, &state) in idx.iter().enumerate() {
                bounds.push(StateBound { node, state, slot });
            }
        }

        let cost = &ocp.cost;
        let qp = StepQp::new(
            dims,
            (&cost.w, &cost.vx, &cost.vu),
            (&cost.w_e, &cost.vx_e),
            bounds,
            options.max_qp_iter,
        );

        let mut solver = Self {
            model,
            scheme,
            dims,
            dt: ocp.time_step,
            options: options.clone(),
            w: cost.w.clone(),
            vx: cost.vx.clone(),
            vu: cost.vu.clone(),
            w_e: cost.w_e.clone(),
            vx_e: cost.vx_e.clone(),
            yref: vec![cost.yref.clone(); dims.n],
            yref_e: cost.yref_e.clone(),
            lbu: c.lbu.clone(),
            ubu: c.ubu.clone(),
            lbx,
            ubx,
            qp,
            xs: vec![DVector::zeros(dims.nx); dims.n + 1],
            us: Vec::new(),
            last_stats: SolveStatistics::default(),
        };
        solver.us = solver.initial_controls();

        log::debug!(
            "SQP backend ready: N={} nz={} stages={} max_iter={}",
            dims.n,
            solver.qp.num_variables(),
            options.integrator_stages,
            options.max_sqp_iter
        );
        Ok(solver)
    }

    fn set(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), SolverError> {
        self.dims.check_field(stage, field, values)?;
        let n = self.dims.n;
        let target = match field {
            Field::Lbx => &mut self.lbx[stage],
            Field::Ubx => &mut self.ubx[stage],
            Field::Yref if stage == n => &mut self.yref_e,
            Field::Yref => &mut self.yref[stage],
            Field::X => &mut self.xs[stage],
            Field::U => &mut self.us[stage],
        };
        target.copy_from_slice(values);
        Ok(())
    }

    fn solve(&mut self) -> SolverStatus {
        let start = Instant::now();
        let x0 = self.initial_state();
        if !self.options.warm_start {
            self.us = self.initial_controls();
        }

        let mut status = SolverStatus::MaxIterations;
        let mut sqp_iterations = 0;
        let mut qp_iterations = 0;
        let mut step_norm = f64::INFINITY;

        for _ in 0..self.options.max_sqp_iter {
            sqp_iterations += 1;

            let lin = match self.linearize(&x0) {
                Ok(lin) => lin,
                Err(s) => {
                    status = s;
                    break;
                }
            };

            let q = self.gradient(&lin);
            let b = self.margins(&lin);
            let a = self.qp.constraint_matrix(&lin);
            let z = match self.qp.solve(&q, &a, &b) {
                Ok((z, iters)) => {
                    qp_iterations += iters;
                    z
                }
                Err(iters) => {
                    qp_iterations += iters;
                    self.xs = lin.xs;
                    status = SolverStatus::QpFailure;
                    break;
                }
            };

            let nu = self.dims.nu;
            let du = z.rows(0, self.qp.num_controls());
            for (k, uk) in self.us.iter_mut().enumerate() {
                *uk += du.rows(k * nu, nu);
                *uk = uk.sup(&self.lbu).inf(&self.ubu);
            }

            step_norm = du.amax();
            if step_norm < self.options.tolerance {
                status = SolverStatus::Success;
                break;
            }
        }

        let mut objective = f64::NAN;
        if status != SolverStatus::NaNDetected {
            match self.rollout(&x0) {
                Ok(xs) => {
                    objective = self.objective(&xs);
                    self.xs = xs;
                }
                Err(s) => status = s,
            }
        }

        self.last_stats = SolveStatistics {
            sqp_iterations,
            qp_iterations,
            solve_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            step_norm,
            objective,
        };
        status
    }

    fn get(&self, stage: usize, field: Field) -> Result<DVector<f64>, SolverError> {
        let n = self.dims.n;
        self.dims.field_dim(stage, field)?;
        let value = match field {
            Field::Lbx => &self.lbx[stage],
            Field::Ubx => &self.ubx[stage],
            Field::Yref if stage == n => &self.yref_e,
            Field::Yref => &self.yref[stage],
            Field::X => &self.xs[stage],
            Field::U => &self.us[stage],
        };
        Ok(value.clone())
    }

    fn statistics(&self) -> SolveStatistics {
        self.last_stats
    }
}

fn model_failure(e: ModelError) -> SolverStatus {
    log::error!("Model evaluation failed during SQP: {}", e);
    SolverStatus::NaNDetected
}
