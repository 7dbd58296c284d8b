//! Simulation shared state
//!
//! Everything the caller, backend worker and frontend worker exchange
//! lives here. Scalars are atomics; vectors are copy-on-write snapshots so
//! a reader never observes a half-written state.
//!
//! State and setpoint are separate snapshots. A reader that loads both may
//! pair a state with a setpoint from a neighbouring cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nalgebra::DVector;

/// f64 stored as its bit pattern in an [`AtomicU64`]
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(val: f64) -> Self {
        Self(AtomicU64::new(val.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    pub fn store(&self, val: f64, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Vector published as immutable snapshots
#[derive(Debug)]
pub struct SharedVector(RwLock<Arc<DVector<f64>>>);

impl SharedVector {
    pub fn new(v: DVector<f64>) -> Self {
        Self(RwLock::new(Arc::new(v)))
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<DVector<f64>> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publish a new snapshot
    pub fn store(&self, v: DVector<f64>) {
        let next = Arc::new(v);
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Length of the current snapshot
    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared between the simulator threads for one run
#[derive(Debug)]
pub struct SharedState {
    /// Current plant state
    pub state: SharedVector,
    /// Current setpoint handed to the controller
    pub setpoint: SharedVector,
    /// Completed control cycles
    pub steps: AtomicU64,
    /// Cycle limit, `None` runs until stopped
    pub max_steps: Option<u64>,
    /// Simulated time [s]
    pub sim_time: AtomicF64,
}

impl SharedState {
    pub fn new(x0: DVector<f64>, setpoint: DVector<f64>, max_steps: Option<u64>) -> Self {
        Self {
            state: SharedVector::new(x0),
            setpoint: SharedVector::new(setpoint),
            steps: AtomicU64::new(0),
            max_steps,
            sim_time: AtomicF64::new(0.0),
        }
    }

    /// Record one completed cycle of length `dt`
    ///
    /// Returns `true` when the step limit has been reached.
    pub fn advance(&self, dt: f64) -> bool {
        let steps = self.steps.fetch_add(1, Ordering::AcqRel) + 1;
        let t = self.sim_time.load(Ordering::Acquire);
        self.sim_time.store(t + dt, Ordering::Release);

        matches!(self.max_steps, Some(max) if max > 0 && steps >= max)
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Acquire)
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time.load(Ordering::Acquire)
    }
}

/// Cooperative run flag shared by all workers
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Atomically set the flag, returning `false` if it was already set
    pub fn try_set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_f64_roundtrip() {
        let a = AtomicF64::new(1.5);
        assert_eq!(a.load(Ordering::Relaxed), 1.5);
        a.store(-0.25, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), -0.25);
    }

    #[test]
    fn test_snapshot_survives_store() {
        let shared = SharedVector::new(DVector::from_vec(vec![1.0, 2.0]));
        let before = shared.load();

        shared.store(DVector::from_vec(vec![3.0, 4.0]));

        assert_eq!(before.as_slice(), &[1.0, 2.0]);
        assert_eq!(shared.load().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn test_no_torn_reads() {
        // Writers only ever publish vectors whose entries are all equal
        let shared = Arc::new(SharedVector::new(DVector::from_element(64, 0.0)));

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 1..2000 {
                    shared.store(DVector::from_element(64, i as f64));
                }
            })
        };

        for _ in 0..2000 {
            let snap = shared.load();
            assert!(snap.iter().all(|v| *v == snap[0]));
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_advance_counts_and_limits() {
        let shared = SharedState::new(DVector::zeros(2), DVector::zeros(2), Some(3));

        assert!(!shared.advance(0.01));
        assert!(!shared.advance(0.01));
        assert!(shared.advance(0.01));
        assert_eq!(shared.steps(), 3);
        assert!((shared.sim_time() - 0.03).abs() < 1e-12);

        let unlimited = SharedState::new(DVector::zeros(2), DVector::zeros(2), None);
        for _ in 0..10 {
            assert!(!unlimited.advance(0.01));
        }
    }

    #[test]
    fn test_run_flag_try_set() {
        let flag = RunFlag::new();
        assert!(!flag.is_set());
        assert!(flag.try_set());
        assert!(!flag.try_set());

        let other = flag.clone();
        other.clear();
        assert!(!flag.is_set());
    }
}
