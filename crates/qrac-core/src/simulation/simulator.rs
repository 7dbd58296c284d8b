//! Closed-loop simulator
//!
//! Runs a controller against a plant on a backend worker while a frontend
//! worker feeds a renderer. The caller keeps control through
//! [`ClosedLoopSim::update_setpoint`], [`ClosedLoopSim::stop`] and the
//! status accessors.
//!
//! ```text
//!            ┌──────────── SharedState ────────────┐
//!  caller ──►│ setpoint     state    steps   time  │◄── frontend ──► Renderer
//!            └──────┬─────────▲───────────────▲────┘
//!                   │         │               │
//!                   ▼         │               │
//!            backend: controller.get_input ─► plant.update
//! ```
//!
//! Lifecycle: `Idle → Running → Stopping → Idle`. Cancellation is
//! cooperative: a worker notices [`ClosedLoopSim::stop`] on its next poll,
//! so a backend inside a long solve finishes that cycle first.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nalgebra::{DVector, Vector3};
use thiserror::Error;

use crate::control::{tile_state, Controller};

use super::config::SimConfig;
use super::plant::Plant;
use super::render::{sprite_points, RenderFrame, Renderer};
use super::shared::{RunFlag, SharedState};
use super::trail::PoseTrail;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Simulator is already running; wait for it to stop before starting again")]
    AlreadyRunning,
    #[error("Simulator has not been started")]
    NotStarted,
    #[error("Invalid simulator configuration: {0}")]
    InvalidConfig(String),
    #[error("Plant and controller disagree on {what}: plant has {plant}, controller has {controller}")]
    DimensionMismatch {
        what: &'static str,
        plant: usize,
        controller: usize,
    },
    #[error("Invalid initial state dimension: expected {expected}, got {got}")]
    InvalidInitialState { expected: usize, got: usize },
    #[error("Invalid setpoint length: expected {expected}, got {got}")]
    InvalidSetpointLength { expected: usize, got: usize },
    #[error("Controller failed: {0}")]
    Controller(#[source] BoxError),
    #[error("Plant failed: {0}")]
    Plant(#[source] BoxError),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}

/// Observable simulator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    /// No workers alive
    Idle,
    /// Run flag set, workers looping
    Running,
    /// Run flag cleared, workers still winding down
    Stopping,
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Completed control cycles
    pub steps: u64,
    /// Simulated time [s]
    pub sim_time: f64,
    /// Plant state at the end of the run
    pub final_state: DVector<f64>,
}

/// Frontend settings resolved from [`SimConfig`]
#[derive(Debug, Clone)]
struct FrontendSettings {
    lb_pose: [f64; 3],
    ub_pose: [f64; 3],
    data_len: usize,
    min_distance: f64,
    sprite_size: f64,
    period: Duration,
}

/// Closed-loop simulator over a plant, a controller and a renderer
pub struct ClosedLoopSim<P, C, R>
where
    P: Plant + 'static,
    C: Controller + 'static,
    R: Renderer + 'static,
{
    plant: Arc<Mutex<P>>,
    controller: Arc<Mutex<C>>,
    renderer: Arc<Mutex<R>>,
    frontend: FrontendSettings,
    dt: f64,
    nx: usize,
    n_set: usize,
    running: RunFlag,
    shared: Option<Arc<SharedState>>,
    backend_handle: Option<JoinHandle<Result<(), SimError>>>,
    frontend_handle: Option<JoinHandle<()>>,
}

impl<P, C, R> ClosedLoopSim<P, C, R>
where
    P: Plant + 'static,
    C: Controller + 'static,
    R: Renderer + 'static,
{
    /// Validate the collaborators and configuration
    pub fn new(plant: P, controller: C, renderer: R, config: SimConfig) -> Result<Self, SimError> {
        let (lb_pose, ub_pose) = config.validate()?;

        if plant.nx() != controller.nx() {
            return Err(SimError::DimensionMismatch {
                what: "nx",
                plant: plant.nx(),
                controller: controller.nx(),
            });
        }
        if plant.nu() != controller.nu() {
            return Err(SimError::DimensionMismatch {
                what: "nu",
                plant: plant.nu(),
                controller: controller.nu(),
            });
        }

        let dt = controller.dt();
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimError::InvalidConfig(format!("controller dt must be positive, got {}", dt)));
        }

        let nx = plant.nx();
        let n_set = controller.n_set();
        if nx == 0 || n_set == 0 || n_set % nx != 0 {
            return Err(SimError::InvalidConfig(format!(
                "controller setpoint length {} is not a positive multiple of nx = {}",
                n_set, nx
            )));
        }

        Ok(Self {
            plant: Arc::new(Mutex::new(plant)),
            controller: Arc::new(Mutex::new(controller)),
            renderer: Arc::new(Mutex::new(renderer)),
            frontend: FrontendSettings {
                lb_pose,
                ub_pose,
                data_len: config.data_len,
                min_distance: config.trail_min_distance,
                sprite_size: config.sprite_size,
                period: config.render_period(),
            },
            dt,
            nx,
            n_set,
            running: RunFlag::new(),
            shared: None,
            backend_handle: None,
            frontend_handle: None,
        })
    }

    /// Start a run from `x0`
    ///
    /// The setpoint starts as `x0` repeated over the controller horizon.
    /// With `max_steps` set to `Some(n)` (n > 0) the run ends by itself
    /// after `n` control cycles; `None` runs until [`ClosedLoopSim::stop`].
    pub fn start(&mut self, x0: &DVector<f64>, max_steps: Option<u64>) -> Result<(), SimError> {
        if self.running.is_set() {
            return Err(SimError::AlreadyRunning);
        }
        if x0.len() != self.nx {
            return Err(SimError::InvalidInitialState { expected: self.nx, got: x0.len() });
        }

        self.reap_workers();

        let shared = Arc::new(SharedState::new(
            x0.clone(),
            tile_state(x0, self.n_set / self.nx),
            max_steps,
        ));
        if !self.running.try_set() {
            return Err(SimError::AlreadyRunning);
        }

        log::info!("Starting simulator (max_steps: {:?})", max_steps);

        let backend = {
            let plant = Arc::clone(&self.plant);
            let controller = Arc::clone(&self.controller);
            let shared = Arc::clone(&shared);
            let running = self.running.clone();
            let dt = self.dt;
            thread::Builder::new()
                .name("qrac-sim-backend".to_string())
                .spawn(move || run_backend(plant, controller, shared, running, dt))
        };
        let backend = match backend {
            Ok(handle) => handle,
            Err(e) => {
                self.running.clear();
                return Err(SimError::Spawn(e));
            }
        };
        self.backend_handle = Some(backend);
        self.shared = Some(Arc::clone(&shared));

        let frontend = {
            let renderer = Arc::clone(&self.renderer);
            let running = self.running.clone();
            let settings = self.frontend.clone();
            thread::Builder::new()
                .name("qrac-sim-frontend".to_string())
                .spawn(move || run_frontend(renderer, shared, running, settings))
        };
        match frontend {
            Ok(handle) => self.frontend_handle = Some(handle),
            Err(e) => {
                self.running.clear();
                self.reap_workers();
                return Err(SimError::Spawn(e));
            }
        }

        Ok(())
    }

    /// Ask both workers to exit
    pub fn stop(&self) {
        self.running.clear();
    }

    /// Replace the setpoint read by the backend
    pub fn update_setpoint(&self, x_set: &DVector<f64>) -> Result<(), SimError> {
        let shared = self.shared.as_ref().ok_or(SimError::NotStarted)?;
        if x_set.len() != self.n_set {
            return Err(SimError::InvalidSetpointLength { expected: self.n_set, got: x_set.len() });
        }
        shared.setpoint.store(x_set.clone());
        Ok(())
    }

    /// Whether the run flag is set
    pub fn is_alive(&self) -> bool {
        self.running.is_set()
    }

    pub fn phase(&self) -> SimPhase {
        if self.running.is_set() {
            return SimPhase::Running;
        }
        let winding_down = self
            .backend_handle
            .iter()
            .map(|h| h.is_finished())
            .chain(self.frontend_handle.iter().map(|h| h.is_finished()))
            .any(|finished| !finished);
        if winding_down {
            SimPhase::Stopping
        } else {
            SimPhase::Idle
        }
    }

    /// Simulated time of the current or last run [s]
    pub fn timestamp(&self) -> f64 {
        self.shared.as_ref().map_or(0.0, |s| s.sim_time())
    }

    /// Completed control cycles of the current or last run
    pub fn steps(&self) -> u64 {
        self.shared.as_ref().map_or(0, |s| s.steps())
    }

    /// Snapshot of the current plant state
    pub fn state(&self) -> Option<Arc<DVector<f64>>> {
        self.shared.as_ref().map(|s| s.state.load())
    }

    /// Control period [s]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Setpoint length expected by [`ClosedLoopSim::update_setpoint`]
    pub fn n_set(&self) -> usize {
        self.n_set
    }

    /// Wait for the current run to end
    ///
    /// Returns the backend error if the run was aborted by a controller or
    /// plant failure.
    pub fn join(&mut self) -> Result<RunSummary, SimError> {
        let shared = self.shared.clone().ok_or(SimError::NotStarted)?;

        let backend = self.backend_handle.take().map(|h| h.join());
        let frontend = self.frontend_handle.take().map(|h| h.join());

        match backend {
            Some(Ok(result)) => result?,
            Some(Err(_)) => return Err(SimError::WorkerPanicked("backend")),
            None => {}
        }
        if let Some(Err(_)) = frontend {
            return Err(SimError::WorkerPanicked("frontend"));
        }

        let summary = RunSummary {
            steps: shared.steps(),
            sim_time: shared.sim_time(),
            final_state: (*shared.state.load()).clone(),
        };
        log::info!(
            "Simulator exited after {} steps ({:.3} s simulated)",
            summary.steps,
            summary.sim_time
        );
        Ok(summary)
    }

    /// Borrow the controller, waiting for the backend to release it
    pub fn with_controller<T>(&self, f: impl FnOnce(&mut C) -> T) -> T {
        let mut guard = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Borrow the renderer, waiting for the frontend to release it
    pub fn with_renderer<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        let mut guard = self.renderer.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn reap_workers(&mut self) {
        if let Some(handle) = self.backend_handle.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Previous run ended with an error: {}", e),
                Err(_) => log::warn!("Previous backend worker panicked"),
            }
        }
        if let Some(handle) = self.frontend_handle.take() {
            if handle.join().is_err() {
                log::warn!("Previous frontend worker panicked");
            }
        }
    }
}

impl<P, C, R> Drop for ClosedLoopSim<P, C, R>
where
    P: Plant + 'static,
    C: Controller + 'static,
    R: Renderer + 'static,
{
    fn drop(&mut self) {
        self.stop();
        self.reap_workers();
    }
}

fn run_backend<P: Plant, C: Controller>(
    plant: Arc<Mutex<P>>,
    controller: Arc<Mutex<C>>,
    shared: Arc<SharedState>,
    running: RunFlag,
    dt: f64,
) -> Result<(), SimError> {
    let mut plant = plant.lock().unwrap_or_else(PoisonError::into_inner);
    let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);

    let abort = |err: SimError| {
        running.clear();
        log::error!("Simulation backend stopped: {}", err);
        err
    };

    while running.is_set() {
        let x0 = shared.state.load();
        let x_set = shared.setpoint.load();

        let u = controller
            .get_input(&x0, &x_set)
            .map_err(|e| abort(SimError::Controller(Box::new(e))))?;
        let x = plant
            .update(&x0, &u)
            .map_err(|e| abort(SimError::Plant(Box::new(e))))?;

        log::debug!("u: {:?}", u.as_slice());
        log::debug!("x: {:?}", x.as_slice());

        shared.state.store(x);
        if shared.advance(dt) {
            running.clear();
        }
    }

    Ok(())
}

fn run_frontend<R: Renderer>(
    renderer: Arc<Mutex<R>>,
    shared: Arc<SharedState>,
    running: RunFlag,
    settings: FrontendSettings,
) {
    let mut renderer = renderer.lock().unwrap_or_else(PoisonError::into_inner);
    let mut trail = PoseTrail::new(settings.data_len, settings.min_distance);

    while running.is_set() {
        let x = shared.state.load();
        let position = Vector3::from_fn(|i, _| x.get(i).copied().unwrap_or(0.0));
        trail.push(position);

        let frame = RenderFrame {
            state: &*x,
            sprite: sprite_points(&x, settings.sprite_size),
            trail: trail.iter().copied().collect(),
            timestamp: shared.sim_time(),
            lb_pose: settings.lb_pose,
            ub_pose: settings.ub_pose,
        };
        renderer.render(&frame);

        thread::sleep(settings.period);
    }

    renderer.finish();
}
