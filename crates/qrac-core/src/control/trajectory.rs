//! Trajectory tracking and generation
//!
//! Setpoint generators for the quadrotor state layout
//! `[x, y, z, φ, θ, ψ, ẋ, ẏ, ż, p, q, r]`, and sampling of a generator
//! over a controller horizon.

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::dynamics::Quadrotor;

/// Time-parametrized full-state setpoint
pub trait SetpointFn {
    /// Setpoint at time `t` (seconds since the trajectory started)
    fn setpoint(&self, t: f64) -> DVector<f64>;
}

/// Single point on a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Position [m]
    pub position: Vector3<f64>,
    /// Velocity [m/s]
    pub velocity: Vector3<f64>,
    /// Yaw angle [rad]
    pub yaw: f64,
}

impl Default for TrajectoryPoint {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            yaw: 0.0,
        }
    }
}

impl TrajectoryPoint {
    /// Create a hover point at given position
    pub fn hover(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            yaw,
            ..Default::default()
        }
    }

    /// Expand into a 12-entry quadrotor state (roll, pitch and rates zero)
    pub fn to_state(&self) -> DVector<f64> {
        let mut x = DVector::zeros(Quadrotor::NX);
        x.fixed_rows_mut::<3>(0).copy_from(&self.position);
        x[Quadrotor::YAW_INDEX] = self.yaw;
        x.fixed_rows_mut::<3>(6).copy_from(&self.velocity);
        x
    }
}

/// Hold a fixed pose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hover {
    pub position: Vector3<f64>,
    pub yaw: f64,
}

impl Hover {
    pub fn new(position: Vector3<f64>, yaw: f64) -> Self {
        Self { position, yaw }
    }
}

impl SetpointFn for Hover {
    fn setpoint(&self, _t: f64) -> DVector<f64> {
        TrajectoryPoint::hover(self.position, self.yaw).to_state()
    }
}

/// Constant-speed circle in a horizontal plane, centered on the z-axis
///
/// Starts at `(r, 0, alt)` and runs counter-clockwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    /// Tangential speed [m/s]
    pub v: f64,
    /// Radius [m]
    pub r: f64,
    /// Altitude [m]
    pub alt: f64,
}

impl Circle {
    pub fn new(v: f64, r: f64, alt: f64) -> Self {
        Self { v, r, alt }
    }

    /// Angular rate around the center [rad/s]
    pub fn angular_rate(&self) -> f64 {
        self.v / self.r
    }

    pub fn point(&self, t: f64) -> TrajectoryPoint {
        let (s, c) = (self.angular_rate() * t).sin_cos();
        TrajectoryPoint {
            position: Vector3::new(self.r * c, self.r * s, self.alt),
            velocity: Vector3::new(-self.v * s, self.v * c, 0.0),
            yaw: 0.0,
        }
    }
}

impl SetpointFn for Circle {
    fn setpoint(&self, t: f64) -> DVector<f64> {
        self.point(t).to_state()
    }
}

/// A complete trajectory as a time-indexed sequence of points
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Time stamps for each point [s]
    times: Vec<f64>,
    /// Trajectory points
    points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    /// Create a new trajectory
    ///
    /// Returns `None` when the sequences are empty, have different
    /// lengths, or the time stamps are not strictly increasing.
    pub fn new(times: Vec<f64>, points: Vec<TrajectoryPoint>) -> Option<Self> {
        if times.is_empty() || times.len() != points.len() {
            return None;
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }
        Some(Self { times, points })
    }

    /// Piecewise-linear path through waypoints flown at constant speed
    pub fn through_waypoints(waypoints: &[Vector3<f64>], speed: f64, yaw: f64) -> Option<Self> {
        if waypoints.is_empty() || !(speed > 0.0) {
            return None;
        }

        let mut times = vec![0.0];
        let mut points = Vec::with_capacity(waypoints.len());

        for (i, wp) in waypoints.iter().enumerate() {
            let velocity = waypoints
                .get(i + 1)
                .map(|next| (next - wp).normalize() * speed)
                .filter(|v| v.iter().all(|c| c.is_finite()))
                .unwrap_or_else(Vector3::zeros);

            if i > 0 {
                let t_prev = times[i - 1];
                times.push(t_prev + (wp - waypoints[i - 1]).norm() / speed);
            }
            points.push(TrajectoryPoint { position: *wp, velocity, yaw });
        }

        Self::new(times, points)
    }

    /// Sample trajectory at given time using linear interpolation
    pub fn sample(&self, t: f64) -> TrajectoryPoint {
        let last = self.times.len() - 1;

        // Clamp to trajectory bounds
        if t <= self.times[0] {
            return self.points[0].clone();
        }
        if t >= self.times[last] {
            return self.points[last].clone();
        }

        let i = self.times.partition_point(|&ti| ti <= t) - 1;
        let alpha = (t - self.times[i]) / (self.times[i + 1] - self.times[i]);

        let (p1, p2) = (&self.points[i], &self.points[i + 1]);
        TrajectoryPoint {
            position: p1.position.lerp(&p2.position, alpha),
            velocity: p1.velocity.lerp(&p2.velocity, alpha),
            yaw: p1.yaw * (1.0 - alpha) + p2.yaw * alpha,
        }
    }

    /// Total trajectory duration
    pub fn duration(&self) -> f64 {
        self.times[self.times.len() - 1] - self.times[0]
    }
}

impl SetpointFn for Trajectory {
    fn setpoint(&self, t: f64) -> DVector<f64> {
        self.sample(t).to_state()
    }
}

/// Sample a setpoint function over a horizon
///
/// Node `k` of the result holds `traj.setpoint(t0 + k·dt)` and occupies
/// entries `[k·nx, (k+1)·nx)`. Setpoints that are shorter than `nx` are
/// zero-padded, longer ones are truncated.
pub fn sample_horizon<T: SetpointFn + ?Sized>(
    traj: &T,
    t0: f64,
    dt: f64,
    num_nodes: usize,
    nx: usize,
) -> DVector<f64> {
    let mut x_set = DVector::zeros(num_nodes * nx);
    for k in 0..num_nodes {
        let sp = traj.setpoint(t0 + k as f64 * dt);
        let n = sp.len().min(nx);
        x_set.rows_mut(k * nx, n).copy_from(&sp.rows(0, n));
    }
    x_set
}

/// Repeat a single state over `num_nodes` horizon nodes
pub fn tile_state(x: &DVector<f64>, num_nodes: usize) -> DVector<f64> {
    let nx = x.len();
    DVector::from_fn(nx * num_nodes, |i, _| x[i % nx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_hover_setpoint() {
        let hover = Hover::new(Vector3::new(1.0, 2.0, 3.0), 0.5);

        let sp = hover.setpoint(10.0);
        assert_eq!(sp.len(), 12);
        assert_relative_eq!(sp[2], 3.0);
        assert_relative_eq!(sp[5], 0.5);
        assert_relative_eq!(sp.rows(6, 6).norm(), 0.0);
    }

    #[test]
    fn test_circle_trajectory() {
        let circle = Circle::new(4.0, 4.0, 4.0);

        // Starts at (r, 0, alt) moving along +y
        let p0 = circle.point(0.0);
        assert_relative_eq!(p0.position, Vector3::new(4.0, 0.0, 4.0), epsilon = 1e-12);
        assert_relative_eq!(p0.velocity, Vector3::new(0.0, 4.0, 0.0), epsilon = 1e-12);

        // A quarter turn takes (π/2)·r/v seconds
        let p_quarter = circle.point(PI / 2.0);
        assert_relative_eq!(p_quarter.position, Vector3::new(0.0, 4.0, 4.0), epsilon = 1e-12);

        // Speed is constant
        for t in [0.3, 1.7, 5.2] {
            assert_relative_eq!(circle.point(t).velocity.norm(), 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_trajectory_interpolation() {
        let traj = Trajectory::new(
            vec![0.0, 1.0],
            vec![
                TrajectoryPoint::hover(Vector3::zeros(), 0.0),
                TrajectoryPoint::hover(Vector3::new(1.0, 0.0, 0.0), 1.0),
            ],
        )
        .unwrap();

        let mid = traj.sample(0.5);
        assert_relative_eq!(mid.position, Vector3::new(0.5, 0.0, 0.0), epsilon = 1e-10);
        assert_relative_eq!(mid.yaw, 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_trajectory_clamping() {
        let traj = Trajectory::through_waypoints(
            &[Vector3::new(0.0, 0.0, 1.0), Vector3::new(10.0, 0.0, 1.0)],
            2.0,
            0.0,
        )
        .unwrap();

        assert_relative_eq!(traj.duration(), 5.0, epsilon = 1e-10);
        assert_relative_eq!(traj.sample(-1.0).position, Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(traj.sample(100.0).position, Vector3::new(10.0, 0.0, 1.0));
        assert_relative_eq!(traj.sample(2.5).position, Vector3::new(5.0, 0.0, 1.0), epsilon = 1e-10);
        assert_relative_eq!(traj.sample(0.0).velocity, Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-10);
    }

    #[test]
    fn test_invalid_trajectories() {
        assert!(Trajectory::new(vec![], vec![]).is_none());
        assert!(Trajectory::new(vec![0.0, 1.0], vec![TrajectoryPoint::default()]).is_none());
        assert!(Trajectory::new(
            vec![1.0, 1.0],
            vec![TrajectoryPoint::default(), TrajectoryPoint::default()]
        )
        .is_none());
        assert!(Trajectory::through_waypoints(&[Vector3::zeros()], 0.0, 0.0).is_none());
    }

    #[test]
    fn test_sample_horizon_layout() {
        let circle = Circle::new(4.0, 4.0, 4.0);
        let (num_nodes, nx, dt) = (5, 12, 0.1);

        let x_set = sample_horizon(&circle, 1.0, dt, num_nodes, nx);
        assert_eq!(x_set.len(), num_nodes * nx);

        for k in 0..num_nodes {
            let expected = circle.setpoint(1.0 + k as f64 * dt);
            assert_relative_eq!(x_set.rows(k * nx, nx).into_owned(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_tile_state() {
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let tiled = tile_state(&x, 3);
        assert_eq!(tiled.as_slice(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }
}
