//! Rendering frontend interface
//!
//! The simulator hands the renderer one [`RenderFrame`] per frontend tick.
//! Renderers are passive: they never touch the shared state.

use nalgebra::{DVector, Vector3};

use crate::math::rotation_zyx;

/// Everything needed to draw one frame
#[derive(Debug, Clone)]
pub struct RenderFrame<'a> {
    /// Full plant state
    pub state: &'a DVector<f64>,
    /// Arm endpoints of the vehicle sprite in world frame
    pub sprite: [Vector3<f64>; 4],
    /// Recent positions, oldest first
    pub trail: Vec<Vector3<f64>>,
    /// Simulated time [s]
    pub timestamp: f64,
    /// Lower corner of the plotting volume
    pub lb_pose: [f64; 3],
    /// Upper corner of the plotting volume
    pub ub_pose: [f64; 3],
}

/// Visualization sink driven by the frontend worker
pub trait Renderer: Send {
    /// Draw one frame
    fn render(&mut self, frame: &RenderFrame<'_>);

    /// Called once when the run ends
    fn finish(&mut self) {}
}

/// Arm endpoints of a quadrotor sprite
///
/// The body-frame points `(±s/2, 0, 0)` and `(0, ±s/2, 0)` are moved by the
/// pose `[R(φ, θ, ψ) | p]` taken from the first six state entries. States
/// shorter than six entries are treated as zero-padded.
pub fn sprite_points(x: &DVector<f64>, size: f64) -> [Vector3<f64>; 4] {
    let get = |i: usize| x.get(i).copied().unwrap_or(0.0);
    let position = Vector3::new(get(0), get(1), get(2));
    let r = rotation_zyx(get(3), get(4), get(5));
    let h = size / 2.0;

    [
        Vector3::new(h, 0.0, 0.0),
        Vector3::new(-h, 0.0, 0.0),
        Vector3::new(0.0, h, 0.0),
        Vector3::new(0.0, -h, 0.0),
    ]
    .map(|p| r * p + position)
}

/// Renderer that discards every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame<'_>) {}
}

/// Renderer that logs the pose at debug level
#[derive(Debug, Default)]
pub struct LogRenderer {
    frames: u64,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &RenderFrame<'_>) {
        self.frames += 1;
        let n = frame.state.len().min(3);
        log::debug!(
            "t={:.4} pos={:?} trail={}",
            frame.timestamp,
            &frame.state.as_slice()[..n],
            frame.trail.len()
        );
    }

    fn finish(&mut self) {
        log::info!("Renderer finished after {} frames", self.frames);
    }
}
