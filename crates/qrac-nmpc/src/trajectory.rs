//! Predicted trajectory
//!
//! The open-loop state and control sequences of one solve, with node times
//! relative to the solve so a caller can look ahead or plot the plan.

use nalgebra::{DVector, Vector3};
use serde::Serialize;

use crate::solver::SolverStatus;

/// Optimal open-loop plan from a single solve
///
/// Node `k` sits at `times[k] = k·dt`. `states[k]` and `controls[k]` belong
/// to the same node; `controls[k]` is held over `[times[k], times[k+1])`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictedTrajectory {
    /// Node times relative to the solve [s]
    pub times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    /// Solver status the plan came from
    pub status: SolverStatus,
}

impl PredictedTrajectory {
    pub fn new(
        dt: f64,
        states: Vec<DVector<f64>>,
        controls: Vec<DVector<f64>>,
        status: SolverStatus,
    ) -> Self {
        let times = (0..states.len()).map(|k| k as f64 * dt).collect();
        Self {
            times,
            states,
            controls,
            status,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Time of the last node [s]
    pub fn duration(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// The control a receding-horizon loop applies
    pub fn first_control(&self) -> Option<&DVector<f64>> {
        self.controls.first()
    }

    /// Converged solve with finite values throughout
    pub fn is_valid(&self) -> bool {
        self.status.is_success()
            && !self.is_empty()
            && self
                .states
                .iter()
                .chain(self.controls.iter())
                .all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Position part `[x, y, z]` of every node
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.states
            .iter()
            .map(|x| Vector3::from_fn(|i, _| x.get(i).copied().unwrap_or(0.0)))
            .collect()
    }

    /// Linearly interpolated state at `t`, clamped to the horizon
    pub fn interpolate_state(&self, t: f64) -> Option<DVector<f64>> {
        let last = self.states.len().checked_sub(1)?;
        if t <= self.times[0] {
            return Some(self.states[0].clone());
        }
        if t >= self.times[last] {
            return Some(self.states[last].clone());
        }

        let idx = self
            .times
            .iter()
            .position(|&time| time > t)
            .unwrap_or(last)
            .saturating_sub(1);

        let (t0, t1) = (self.times[idx], self.times[idx + 1]);
        let alpha = (t - t0) / (t1 - t0);
        Some(&self.states[idx] * (1.0 - alpha) + &self.states[idx + 1] * alpha)
    }

    /// Zero-order-hold control at `t`, clamped to the horizon
    pub fn control_at(&self, t: f64) -> Option<&DVector<f64>> {
        let last = self.controls.len().checked_sub(1)?;
        let idx = self
            .times
            .iter()
            .take(self.controls.len())
            .rposition(|&time| time <= t)
            .unwrap_or(0);
        self.controls.get(idx.min(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(status: SolverStatus) -> PredictedTrajectory {
        let states = (0..4)
            .map(|k| DVector::from_fn(12, |i, _| if i < 3 { k as f64 * (i + 1) as f64 } else { 0.0 }))
            .collect();
        let controls = (0..4).map(|k| DVector::from_element(4, 0.1 * k as f64)).collect();
        PredictedTrajectory::new(0.5, states, controls, status)
    }

    #[test]
    fn test_node_times() {
        let traj = ramp(SolverStatus::Success);

        assert_eq!(traj.len(), 4);
        assert_eq!(traj.times, vec![0.0, 0.5, 1.0, 1.5]);
        assert_relative_eq!(traj.duration(), 1.5);
        assert_eq!(traj.first_control().unwrap()[0], 0.0);
    }

    #[test]
    fn test_positions() {
        let traj = ramp(SolverStatus::Success);
        let p = traj.positions();

        assert_eq!(p.len(), 4);
        assert_relative_eq!(p[2], Vector3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_interpolate_state() {
        let traj = ramp(SolverStatus::Success);

        let mid = traj.interpolate_state(0.75).unwrap();
        assert_relative_eq!(mid[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(mid[2], 4.5, epsilon = 1e-12);

        assert_eq!(traj.interpolate_state(-1.0).unwrap(), traj.states[0]);
        assert_eq!(traj.interpolate_state(10.0).unwrap(), traj.states[3]);
    }

    #[test]
    fn test_control_hold() {
        let traj = ramp(SolverStatus::Success);

        assert_relative_eq!(traj.control_at(0.0).unwrap()[0], 0.0);
        assert_relative_eq!(traj.control_at(0.99).unwrap()[0], 0.1);
        assert_relative_eq!(traj.control_at(1.0).unwrap()[0], 0.2);
        assert_relative_eq!(traj.control_at(9.0).unwrap()[0], 0.3);
        assert_relative_eq!(traj.control_at(-1.0).unwrap()[0], 0.0);
    }

    #[test]
    fn test_validity() {
        assert!(ramp(SolverStatus::Success).is_valid());
        assert!(!ramp(SolverStatus::MaxIterations).is_valid());

        let mut nan = ramp(SolverStatus::Success);
        nan.states[1][4] = f64::NAN;
        assert!(!nan.is_valid());

        let empty = PredictedTrajectory::new(0.1, Vec::new(), Vec::new(), SolverStatus::Success);
        assert!(empty.is_empty());
        assert!(!empty.is_valid());
        assert!(empty.interpolate_state(0.0).is_none());
        assert!(empty.control_at(0.0).is_none());
    }
}
