//! Simulation configuration
//!
//! Frontend settings for the closed-loop simulator: the plotting volume,
//! trail length and sprite size.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::trail::{DEFAULT_MIN_DISTANCE, DEFAULT_TRAIL_LEN};
use super::SimError;

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Lower corner of the plotting volume [m], 3 entries
    pub lb_pose: Vec<f64>,
    /// Upper corner of the plotting volume [m], 3 entries
    pub ub_pose: Vec<f64>,
    /// Number of trail samples kept by the frontend
    pub data_len: usize,
    /// Minimum spacing between trail samples [m]
    pub trail_min_distance: f64,
    /// Arm-to-arm span of the vehicle sprite [m]
    pub sprite_size: f64,
    /// Pause between rendered frames [ms]
    pub render_period_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lb_pose: vec![-10.0, -10.0, 0.0],
            ub_pose: vec![10.0, 10.0, 10.0],
            data_len: DEFAULT_TRAIL_LEN,
            trail_min_distance: DEFAULT_MIN_DISTANCE,
            sprite_size: 1.0,
            render_period_ms: 20, // ~50 Hz
        }
    }
}

impl SimConfig {
    /// Default settings with the given plotting volume
    pub fn new(lb_pose: Vec<f64>, ub_pose: Vec<f64>) -> Self {
        Self {
            lb_pose,
            ub_pose,
            ..Default::default()
        }
    }

    pub fn render_period(&self) -> Duration {
        Duration::from_millis(self.render_period_ms)
    }

    /// Check the configuration, returning the plotting volume corners
    pub fn validate(&self) -> Result<([f64; 3], [f64; 3]), SimError> {
        let lb = pose_bound("lb_pose", &self.lb_pose)?;
        let ub = pose_bound("ub_pose", &self.ub_pose)?;

        if lb.iter().zip(ub.iter()).any(|(l, u)| l >= u) {
            return Err(SimError::InvalidConfig(format!(
                "lb_pose {:?} must be strictly below ub_pose {:?}",
                lb, ub
            )));
        }
        if self.data_len == 0 {
            return Err(SimError::InvalidConfig("data_len must be positive".to_string()));
        }
        if !self.trail_min_distance.is_finite() || self.trail_min_distance < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "trail_min_distance must be finite and non-negative, got {}",
                self.trail_min_distance
            )));
        }
        if !self.sprite_size.is_finite() || self.sprite_size <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "sprite_size must be finite and positive, got {}",
                self.sprite_size
            )));
        }

        Ok((lb, ub))
    }
}

fn pose_bound(name: &str, values: &[f64]) -> Result<[f64; 3], SimError> {
    match values {
        [x, y, z] if values.iter().all(|v| v.is_finite()) => Ok([*x, *y, *z]),
        [_, _, _] => Err(SimError::InvalidConfig(format!("{} must be finite, got {:?}", name, values))),
        _ => Err(SimError::InvalidConfig(format!(
            "{} must have 3 entries, got {}",
            name,
            values.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.data_len, 400);
        assert_eq!(config.trail_min_distance, 0.1);

        let (lb, ub) = config.validate().unwrap();
        assert_eq!(lb, [-10.0, -10.0, 0.0]);
        assert_eq!(ub, [10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_pose_bounds_must_be_3_vectors() {
        let config = SimConfig::new(vec![-10.0, -10.0], vec![10.0, 10.0, 10.0]);
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        let config = SimConfig::new(vec![-10.0, -10.0, 0.0], vec![10.0, 10.0, 10.0, 1.0]);
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        let config = SimConfig::new(vec![-10.0, f64::NAN, 0.0], vec![10.0, 10.0, 10.0]);
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let config = SimConfig::new(vec![0.0, 0.0, 5.0], vec![1.0, 1.0, 5.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SimConfig = serde_json::from_str(r#"{"sprite_size": 0.5}"#).unwrap();
        assert_eq!(config.sprite_size, 0.5);
        assert_eq!(config.data_len, 400);
        assert!(config.validate().is_ok());
    }
}
