//! Closed-loop NMPC demonstration
//!
//! Flies a Crazyflie around a circle: the NMPC runs on the simulator's
//! backend thread while this thread re-samples the reference window from
//! the simulated clock.
//!
//! ```text
//! RUST_LOG=info cargo run --example closed_loop_mpc [config.toml]
//! ```

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nalgebra::DVector;

use qrac_core::control::{sample_horizon, Circle, SetpointFn};
use qrac_core::dynamics::{Dynamics, Quadrotor};
use qrac_core::simulation::{ClosedLoopSim, IntegratorPlant, LogRenderer, SimConfig};
use qrac_nmpc::{Nmpc, NmpcBuilder, NmpcConfig, SqpSolver};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("=== QRAC Closed-Loop NMPC ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading controller config from {}", path);
            NmpcConfig::load(Path::new(&path))?
        }
        None => NmpcConfig::default(),
    };

    let model: Arc<dyn Dynamics> = Arc::new(Quadrotor::crazyflie(0.0, 0.0, 0.0)?);
    let nx = model.nx();

    let dt = config.horizon.time_step;
    let num_nodes = config.horizon.num_nodes;
    println!(
        "Horizon: N={} dt={}s ({:.2}s), real_time={}",
        num_nodes,
        dt,
        config.horizon.horizon_time(),
        config.real_time
    );

    let mpc: Nmpc<SqpSolver> = NmpcBuilder::from_config(model.clone(), &config).build()?;
    let plant = IntegratorPlant::new(model, dt / 10.0, dt)?;

    let sim_config = SimConfig::new(vec![-6.0, -6.0, 0.0], vec![6.0, 6.0, 8.0]);
    let mut sim = ClosedLoopSim::new(plant, mpc, LogRenderer::new(), sim_config)?;

    // Start at rest on the ground below the circle's entry point and climb onto it
    let circle = Circle::new(4.0, 4.0, 4.0);
    let mut x0 = DVector::zeros(nx);
    x0[0] = 4.0;
    let max_steps = (30.0 / dt).round() as u64;

    sim.start(&x0, Some(max_steps))?;
    println!("Running {} control steps...\n", max_steps);

    let mut last_report = 0.0;
    while sim.is_alive() {
        let t = sim.timestamp();
        let x_set = sample_horizon(&circle, t, dt, num_nodes, nx);
        if sim.update_setpoint(&x_set).is_err() {
            break;
        }

        if t - last_report >= 1.0 {
            last_report = t;
            if let Some(x) = sim.state() {
                let reference = circle.setpoint(t);
                let err = ((x[0] - reference[0]).powi(2)
                    + (x[1] - reference[1]).powi(2)
                    + (x[2] - reference[2]).powi(2))
                .sqrt();
                println!(
                    "t={:5.2}s  pos=[{:6.3}, {:6.3}, {:6.3}]  err={:.3}m",
                    t, x[0], x[1], x[2], err
                );
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    let summary = sim.join()?;
    let stats = sim.with_controller(|mpc| mpc.statistics());

    println!("\n=== Run complete ===");
    println!("Steps: {}  simulated: {:.2}s", summary.steps, summary.sim_time);
    println!(
        "Final position: [{:.3}, {:.3}, {:.3}]",
        summary.final_state[0], summary.final_state[1], summary.final_state[2]
    );
    println!(
        "Last solve: {} SQP iterations, {:.2} ms",
        stats.sqp_iterations, stats.solve_time_ms
    );

    Ok(())
}
