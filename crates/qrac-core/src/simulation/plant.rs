//! Plant integrator
//!
//! Advances the true system over one control period by integrating the
//! dynamics model with a fixed-step explicit Runge-Kutta scheme. The
//! control period is split into `round(control_step / sim_step)` fine
//! steps.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use nalgebra::DVector;
use serde::Serialize;
use thiserror::Error;

use crate::artifacts::{ArtifactError, Artifacts};
use crate::dynamics::{Dynamics, ModelError};
use crate::math::{ExplicitRk, IntegratorError};

/// Number of ERK stages used by the plant
pub const PLANT_ERK_STAGES: usize = 4;

/// Integrator status: success
pub const SIM_STATUS_SUCCESS: i32 = 0;
/// Integrator status: non-finite value in the result
pub const SIM_STATUS_NAN_DETECTED: i32 = 1;
/// Integrator status: the model rejected its inputs
pub const SIM_STATUS_MODEL_ERROR: i32 = 2;

/// Plant errors
#[derive(Debug, Error)]
pub enum PlantError {
    #[error("Invalid {name}: must be finite and positive, got {value}")]
    InvalidStep { name: &'static str, value: f64 },
    #[error("Control step ({control_step}) must not be smaller than simulation step ({sim_step})")]
    ControlStepTooSmall { control_step: f64, sim_step: f64 },
    #[error("Invalid state dimension: expected {expected}, got {got}")]
    InvalidStateDimension { expected: usize, got: usize },
    #[error("Invalid control dimension: expected {expected}, got {got}")]
    InvalidControlDimension { expected: usize, got: usize },
    #[error("Plant integration failed with status {0}")]
    IntegrationFailed(i32),
    #[error("Integrator error: {0}")]
    Integrator(#[from] IntegratorError),
    #[error("Artifact error: {0}")]
    Artifacts(#[from] ArtifactError),
}

/// System that the closed-loop simulator advances
pub trait Plant: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// State dimension
    fn nx(&self) -> usize;

    /// Control dimension
    fn nu(&self) -> usize;

    /// Apply `u` from state `x0` for one control period
    fn update(&mut self, x0: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, Self::Error>;
}

/// Integrator problem definition, written next to the generated artifacts
#[derive(Debug, Clone, Serialize)]
pub struct SimDefinition {
    pub name: String,
    pub nx: usize,
    pub nu: usize,
    pub state_labels: Vec<String>,
    pub control_labels: Vec<String>,
    pub integrator_type: String,
    pub num_stages: usize,
    pub num_steps: usize,
    /// Integration horizon (one control period) [s]
    pub t: f64,
}

/// ERK integrator driven through a set / solve / get cycle
pub struct ErkSimulator {
    model: Arc<dyn Dynamics>,
    scheme: ExplicitRk,
    horizon: f64,
    num_steps: usize,
    x: DVector<f64>,
    u: DVector<f64>,
    xn: DVector<f64>,
}

impl ErkSimulator {
    pub fn new(
        model: Arc<dyn Dynamics>,
        num_stages: usize,
        horizon: f64,
        num_steps: usize,
    ) -> Result<Self, IntegratorError> {
        let scheme = ExplicitRk::new(num_stages)?;
        let (nx, nu) = (model.nx(), model.nu());
        Ok(Self {
            model,
            scheme,
            horizon,
            num_steps,
            x: DVector::zeros(nx),
            u: DVector::zeros(nu),
            xn: DVector::zeros(nx),
        })
    }

    pub fn set_x(&mut self, x: &DVector<f64>) {
        self.x.copy_from(x);
    }

    pub fn set_u(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
    }

    /// Integrate over the horizon, returning an integrator status code
    pub fn solve(&mut self) -> i32 {
        let h = self.horizon / self.num_steps as f64;
        let model = &self.model;
        let u = &self.u;

        let result: Result<DVector<f64>, ModelError> = self
            .scheme
            .try_integrate(&self.x, 0.0, h, self.num_steps, |_t, x| model.derivative(x, u));

        match result {
            Ok(xn) if xn.iter().all(|v| v.is_finite()) => {
                self.xn = xn;
                SIM_STATUS_SUCCESS
            }
            Ok(_) => SIM_STATUS_NAN_DETECTED,
            Err(e) => {
                log::error!("Plant model evaluation failed: {}", e);
                SIM_STATUS_MODEL_ERROR
            }
        }
    }

    /// State at the end of the last successful solve
    pub fn xn(&self) -> &DVector<f64> {
        &self.xn
    }
}

/// Plant that integrates a [`Dynamics`] model
pub struct IntegratorPlant {
    sim: ErkSimulator,
    nx: usize,
    nu: usize,
    sim_step: f64,
    control_step: f64,
    num_steps: usize,
    _artifacts: Artifacts,
}

impl IntegratorPlant {
    /// Create a plant writing its artifacts under the default root
    pub fn new(model: Arc<dyn Dynamics>, sim_step: f64, control_step: f64) -> Result<Self, PlantError> {
        Self::with_artifact_root(model, sim_step, control_step, &Artifacts::default_root())
    }

    /// Create a plant writing its artifacts under `root`
    pub fn with_artifact_root(
        model: Arc<dyn Dynamics>,
        sim_step: f64,
        control_step: f64,
        root: &Path,
    ) -> Result<Self, PlantError> {
        for (name, value) in [("sim_step", sim_step), ("control_step", control_step)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PlantError::InvalidStep { name, value });
            }
        }
        if control_step < sim_step {
            return Err(PlantError::ControlStepTooSmall { control_step, sim_step });
        }

        let num_steps = ((control_step / sim_step).round() as usize).max(1);
        let (nx, nu) = (model.nx(), model.nu());

        let definition = SimDefinition {
            name: model.name().to_string(),
            nx,
            nu,
            state_labels: model.state_labels().iter().map(|s| s.to_string()).collect(),
            control_labels: model.control_labels().iter().map(|s| s.to_string()).collect(),
            integrator_type: "ERK".to_string(),
            num_stages: PLANT_ERK_STAGES,
            num_steps,
            t: control_step,
        };
        let artifacts = Artifacts::create(root, model.name(), "sim")?;
        artifacts.write_json("sim.json", &definition)?;

        let sim = ErkSimulator::new(model, PLANT_ERK_STAGES, control_step, num_steps)?;

        log::debug!(
            "Plant ready: sim_step={} control_step={} num_steps={}",
            sim_step,
            control_step,
            num_steps
        );

        Ok(Self {
            sim,
            nx,
            nu,
            sim_step,
            control_step,
            num_steps,
            _artifacts: artifacts,
        })
    }

    pub fn sim_step(&self) -> f64 {
        self.sim_step
    }

    pub fn control_step(&self) -> f64 {
        self.control_step
    }

    /// Fine integration steps per control period
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }
}

impl Plant for IntegratorPlant {
    type Error = PlantError;

    fn nx(&self) -> usize {
        self.nx
    }

    fn nu(&self) -> usize {
        self.nu
    }

    fn update(&mut self, x0: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, PlantError> {
        if x0.len() != self.nx {
            return Err(PlantError::InvalidStateDimension { expected: self.nx, got: x0.len() });
        }
        if u.len() != self.nu {
            return Err(PlantError::InvalidControlDimension { expected: self.nu, got: u.len() });
        }

        let start = Instant::now();
        self.sim.set_x(x0);
        self.sim.set_u(u);

        let status = self.sim.solve();
        if status != SIM_STATUS_SUCCESS {
            return Err(PlantError::IntegrationFailed(status));
        }

        log::trace!("Plant update runtime: {:?}", start.elapsed());
        Ok(self.sim.xn().clone())
    }
}
