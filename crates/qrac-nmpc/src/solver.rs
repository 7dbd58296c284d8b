//! OCP Solver Interface
//!
//! The controller talks to its optimizer through [`OcpBackend`], a narrow
//! stage/field interface modelled on the acados C API: configure once, then
//! per solve `set` bounds and references, `solve`, and `get` the primal
//! trajectory.
//!
//! Two backends exist:
//! - [`crate::sqp::SqpSolver`]: embedded Gauss-Newton SQP (default).
//! - `AcadosSolver`: generated acados solver, behind the `acados` feature.

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;
use serde::Serialize;
use thiserror::Error;

use qrac_core::artifacts::ArtifactError;
use qrac_core::dynamics::Dynamics;

use crate::config::SolverOptions;
use crate::ocp::OcpDefinition;

#[cfg(feature = "acados")]
use crate::acados_ffi::{self, AcadosCapsule};

/// Solver errors
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),
    #[error("Invalid state dimension: expected {expected}, got {got}")]
    InvalidStateDimension { expected: usize, got: usize },
    #[error("Invalid reference length: expected {expected}, got {got}")]
    InvalidReferenceLength { expected: usize, got: usize },
    #[error("Stage {stage} out of range (max {max})")]
    InvalidStage { stage: usize, max: usize },
    #[error("Field {field} at stage {stage}: expected {expected} values, got {got}")]
    InvalidFieldLength {
        field: Field,
        stage: usize,
        expected: usize,
        got: usize,
    },
    #[error("Backend call failed with status {0}")]
    Backend(i32),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

/// acados solver status codes (from acados/utils/types.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(i32)]
pub enum SolverStatus {
    Unknown = -1,          // ACADOS_UNKNOWN
    Success = 0,           // ACADOS_SUCCESS
    NaNDetected = 1,       // ACADOS_NAN_DETECTED
    MaxIterations = 2,     // ACADOS_MAXITER
    MinStep = 3,           // ACADOS_MINSTEP
    QpFailure = 4,         // ACADOS_QP_FAILURE
    #[default]
    Ready = 5,             // ACADOS_READY
    Unbounded = 6,         // ACADOS_UNBOUNDED
    Timeout = 7,           // ACADOS_TIMEOUT
    QpScalingFailed = 8,   // ACADOS_QPSCALING_BOUNDS_NOT_SATISFIED
    Infeasible = 9,        // ACADOS_INFEASIBLE
}

impl From<i32> for SolverStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => SolverStatus::Success,
            1 => SolverStatus::NaNDetected,
            2 => SolverStatus::MaxIterations,
            3 => SolverStatus::MinStep,
            4 => SolverStatus::QpFailure,
            5 => SolverStatus::Ready,
            6 => SolverStatus::Unbounded,
            7 => SolverStatus::Timeout,
            8 => SolverStatus::QpScalingFailed,
            9 => SolverStatus::Infeasible,
            _ => SolverStatus::Unknown,
        }
    }
}

impl SolverStatus {
    /// Numeric acados status code
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == SolverStatus::Success
    }
}

/// Solution statistics from the last solve
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SolveStatistics {
    /// Number of SQP iterations
    pub sqp_iterations: usize,
    /// Number of QP iterations, summed over SQP iterations
    pub qp_iterations: usize,
    /// Total solve time [ms]
    pub solve_time_ms: f64,
    /// Infinity norm of the last SQP step
    pub step_norm: f64,
    /// Objective value at the returned trajectory
    pub objective: f64,
}

/// Stage fields exchanged with a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Field {
    /// State lower bound (all states at stage 0, bounded states elsewhere)
    Lbx,
    /// State upper bound
    Ubx,
    /// Cost reference
    Yref,
    /// Primal state
    X,
    /// Primal control
    U,
}

impl Field {
    /// acados field name
    pub fn name(self) -> &'static str {
        match self {
            Field::Lbx => "lbx",
            Field::Ubx => "ubx",
            Field::Yref => "yref",
            Field::X => "x",
            Field::U => "u",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque OCP solver capability
///
/// Stages run `0..=N`. `set` with [`Field::X`] or [`Field::U`] seeds the
/// initial guess; `get` returns the primal solution of the last solve.
pub trait OcpBackend: Send {
    /// Build a solver for `ocp` over `model`
    fn configure(
        ocp: &OcpDefinition,
        model: Arc<dyn Dynamics>,
        options: &SolverOptions,
    ) -> Result<Self, SolverError>
    where
        Self: Sized;

    /// Write `values` into `field` at `stage`
    fn set(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), SolverError>;

    /// Run the solver once
    fn solve(&mut self) -> SolverStatus;

    /// Read `field` at `stage`
    fn get(&self, stage: usize, field: Field) -> Result<DVector<f64>, SolverError>;

    /// Statistics of the last solve
    fn statistics(&self) -> SolveStatistics;
}

/// Generated acados solver
///
/// The C code must have been generated for the same problem (see
/// `build.rs`); dimensions are checked against the definition at
/// configuration time.
#[cfg(feature = "acados")]
pub struct AcadosSolver {
    ocp: OcpDefinition,
    capsule: AcadosCapsule,
    warm_start: bool,
    last_stats: SolveStatistics,
}

#[cfg(feature = "acados")]
impl OcpBackend for AcadosSolver {
    fn configure(
        ocp: &OcpDefinition,
        _model: Arc<dyn Dynamics>,
        options: &SolverOptions,
    ) -> Result<Self, SolverError> {
        if ocp.model_name != acados_ffi::MODEL_NAME {
            return Err(SolverError::InitializationFailed(format!(
                "generated solver is for model {}, problem is for {}",
                acados_ffi::MODEL_NAME,
                ocp.model_name
            )));
        }
        let d = &ocp.dims;
        if d.nx != acados_ffi::NX || d.nu != acados_ffi::NU || d.ny != acados_ffi::NY {
            return Err(SolverError::InitializationFailed(format!(
                "generated solver has nx={} nu={} ny={}, problem has nx={} nu={} ny={}",
                acados_ffi::NX,
                acados_ffi::NU,
                acados_ffi::NY,
                d.nx,
                d.nu,
                d.ny
            )));
        }

        let time_steps = vec![ocp.time_step; d.n];
        let capsule = AcadosCapsule::new(d.n, &time_steps).map_err(SolverError::Backend)?;

        log::info!("acados solver ready: N={} tf={:.3}s", d.n, ocp.tf());

        Ok(Self {
            ocp: ocp.clone(),
            capsule,
            warm_start: options.warm_start,
            last_stats: SolveStatistics::default(),
        })
    }

    fn set(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), SolverError> {
        self.ocp.check_field(stage, field, values)?;
        let status = match field {
            Field::Lbx | Field::Ubx => self.capsule.set_constraint(stage, field, values),
            Field::Yref => self.capsule.set_reference(stage, values),
            Field::X | Field::U => self.capsule.set_primal(stage, field, values),
        };
        status.map_err(SolverError::Backend)
    }

    fn solve(&mut self) -> SolverStatus {
        if !self.warm_start {
            if let Err(code) = self.capsule.reset() {
                log::warn!("acados reset failed with status {}", code);
            }
        }
        let status = SolverStatus::from(self.capsule.solve());
        self.last_stats = SolveStatistics {
            sqp_iterations: self.capsule.get_sqp_iterations() as usize,
            qp_iterations: 0,
            solve_time_ms: self.capsule.get_solve_time() * 1000.0,
            step_norm: 0.0,
            objective: 0.0,
        };
        status
    }

    fn get(&self, stage: usize, field: Field) -> Result<DVector<f64>, SolverError> {
        let len = self.ocp.field_dim(stage, field)?;
        match field {
            Field::X | Field::U => Ok(DVector::from_vec(self.capsule.get_primal(stage, field, len))),
            _ => Err(SolverError::InvalidOptions(format!("field {} cannot be read back", field))),
        }
    }

    fn statistics(&self) -> SolveStatistics {
        self.last_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SolverStatus::from(0), SolverStatus::Success);
        assert_eq!(SolverStatus::from(2), SolverStatus::MaxIterations);
        assert_eq!(SolverStatus::from(4), SolverStatus::QpFailure);
        assert_eq!(SolverStatus::from(42), SolverStatus::Unknown);

        for code in 0..=9 {
            assert_eq!(SolverStatus::from(code).code(), code);
        }
        assert!(SolverStatus::Success.is_success());
        assert!(!SolverStatus::MaxIterations.is_success());
        assert_eq!(SolverStatus::default(), SolverStatus::Ready);
    }

    #[test]
    fn test_field_names() {
        assert_eq!(Field::Lbx.to_string(), "lbx");
        assert_eq!(Field::Yref.name(), "yref");

        let err = SolverError::InvalidFieldLength {
            field: Field::Yref,
            stage: 3,
            expected: 16,
            got: 12,
        };
        assert_eq!(err.to_string(), "Field yref at stage 3: expected 16 values, got 12");
    }
}
