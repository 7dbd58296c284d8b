//! Controller configuration
//!
//! Configuration parameters for the receding-horizon NMPC. Every section has
//! a `Default`, so a TOML file only needs the keys it changes.

use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NmpcConfig {
    /// Horizon discretization
    pub horizon: HorizonConfig,
    /// Stage cost weights
    pub weights: CostWeights,
    /// Control box bounds
    pub bounds: InputBounds,
    /// Solver configuration
    pub solver: SolverOptions,
    /// Pad every solve to one control period
    pub real_time: bool,
}

impl NmpcConfig {
    /// Load a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Horizon configuration for the OCP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Number of shooting intervals (N)
    pub num_nodes: usize,
    /// Length of one interval, also the control period [s]
    pub time_step: f64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            num_nodes: 32,
            time_step: 0.01,
        }
    }
}

impl HorizonConfig {
    /// Total horizon time tf = N·dt [s]
    pub fn horizon_time(&self) -> f64 {
        self.num_nodes as f64 * self.time_step
    }

    /// Times of the N+1 shooting nodes relative to the solve [s]
    pub fn node_times(&self) -> Vec<f64> {
        (0..=self.num_nodes)
            .map(|k| k as f64 * self.time_step)
            .collect()
    }
}

/// Diagonal stage cost weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// State weight diagonal, nx entries
    pub q: Vec<f64>,
    /// Control weight diagonal, nu entries
    pub r: Vec<f64>,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            // position, attitude, velocity, body rates
            q: vec![
                40.0, 40.0, 40.0, 1.0, 1.0, 1.0, 20.0, 20.0, 20.0, 1.0, 1.0, 1.0,
            ],
            r: vec![0.0; 4],
        }
    }
}

impl CostWeights {
    pub fn q_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_column_slice(&self.q))
    }

    pub fn r_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_column_slice(&self.r))
    }
}

/// Control box bounds applied at every node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputBounds {
    /// Lower bound, nu entries. Also the control reference.
    pub u_min: Vec<f64>,
    /// Upper bound, nu entries
    pub u_max: Vec<f64>,
}

impl Default for InputBounds {
    fn default() -> Self {
        // Crazyflie rotor thrust range [N]
        Self {
            u_min: vec![0.0; 4],
            u_max: vec![0.64; 4],
        }
    }
}

/// Solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Maximum Gauss-Newton SQP iterations per solve
    pub max_sqp_iter: usize,
    /// Maximum interior-point iterations per QP subproblem
    pub max_qp_iter: u32,
    /// Stationarity tolerance on the SQP step
    pub tolerance: f64,
    /// Start each solve from the previous solution
    pub warm_start: bool,
    /// Explicit Runge-Kutta stages of the shooting integrator (1..=4)
    pub integrator_stages: usize,
    /// Directory for generated artifacts; the system temp dir when unset
    pub artifact_root: Option<PathBuf>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_sqp_iter: 10,
            max_qp_iter: 10,
            tolerance: 1e-4,
            warm_start: true,
            integrator_stages: 4,
            artifact_root: None,
        }
    }
}
