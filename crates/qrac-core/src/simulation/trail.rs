//! Bounded position trail for rendering
//!
//! Keeps the last `capacity` positions the vehicle passed through. A new
//! sample is dropped when it lies closer than `min_distance` to the last
//! accepted one, so a hovering vehicle does not flush the history.

use std::collections::VecDeque;

use nalgebra::Vector3;

/// Default number of retained samples
pub const DEFAULT_TRAIL_LEN: usize = 400;

/// Default minimum spacing between samples [m]
pub const DEFAULT_MIN_DISTANCE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct PoseTrail {
    samples: VecDeque<Vector3<f64>>,
    capacity: usize,
    min_distance: f64,
}

impl PoseTrail {
    pub fn new(capacity: usize, min_distance: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_distance,
        }
    }

    /// Offer a sample; returns whether it was recorded
    pub fn push(&mut self, position: Vector3<f64>) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if let Some(last) = self.samples.back() {
            if (position - last).norm() < self.min_distance {
                return false;
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(position);
        true
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Vector3<f64>> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for PoseTrail {
    fn default() -> Self {
        Self::new(DEFAULT_TRAIL_LEN, DEFAULT_MIN_DISTANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_always_recorded() {
        let mut trail = PoseTrail::default();
        assert!(trail.push(Vector3::zeros()));
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn test_close_samples_suppressed() {
        let mut trail = PoseTrail::default();
        trail.push(Vector3::new(1.0, 0.0, 0.0));

        assert!(!trail.push(Vector3::new(1.05, 0.0, 0.0)));
        assert!(!trail.push(Vector3::new(1.0, 0.09, 0.0)));
        assert!(trail.push(Vector3::new(1.0, 0.0, 0.1)));
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn test_suppression_is_relative_to_last_accepted() {
        // Creeping in sub-threshold increments still lays down samples
        let mut trail = PoseTrail::default();
        for i in 0..10 {
            trail.push(Vector3::new(i as f64 * 0.04, 0.0, 0.0));
        }

        let xs: Vec<f64> = trail.iter().map(|p| p.x).collect();
        assert_eq!(xs.len(), 4);
        assert!((xs[1] - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_oldest_samples_evicted() {
        let mut trail = PoseTrail::new(3, 0.1);
        for i in 0..5 {
            trail.push(Vector3::new(i as f64, 0.0, 0.0));
        }

        let xs: Vec<f64> = trail.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
        assert_eq!(trail.capacity(), 3);
    }
}
