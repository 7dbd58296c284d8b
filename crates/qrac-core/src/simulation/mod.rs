//! Simulation framework
//!
//! - [`plant`]: plant integrator advancing the true system
//! - [`simulator`]: threaded closed-loop simulator
//! - [`shared`]: state exchanged between the simulator workers
//! - [`trail`], [`render`]: visualization frontend support

pub mod config;
pub mod plant;
pub mod render;
pub mod shared;
pub mod simulator;
pub mod trail;

pub use config::*;
pub use plant::*;
pub use render::*;
pub use shared::*;
pub use simulator::*;
pub use trail::*;
