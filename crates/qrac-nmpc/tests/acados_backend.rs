//! Generated acados solver behind the controller
//!
//! Needs the `acados` feature and generated code for `Nonlinear_Quadrotor`.

#[cfg(feature = "acados")]
mod tests {
    use std::sync::Arc;

    use nalgebra::DVector;

    use qrac_core::control::tile_state;
    use qrac_core::dynamics::{Dynamics, Quadrotor, QuadrotorParams};
    use qrac_nmpc::{AcadosSolver, Nmpc, NmpcBuilder, NmpcConfig, NmpcError, SolverError, SolverOptions};

    #[test]
    fn test_acados_hover_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let model: Arc<dyn Dynamics> = Arc::new(Quadrotor::crazyflie(0.0, 0.0, 0.0).unwrap());

        let mut mpc: Nmpc<AcadosSolver> = NmpcBuilder::from_config(model, &NmpcConfig::default())
            .options(SolverOptions {
                artifact_root: Some(tmp.path().to_path_buf()),
                ..Default::default()
            })
            .build()
            .expect("generated solver matches the problem");

        let mut x0 = DVector::zeros(12);
        x0[0] = 4.0;
        x0[2] = 1.0;

        let u = mpc.get_input(&x0, &tile_state(&x0, 32)).unwrap();
        assert_eq!(u.len(), 4);
        assert!(u.iter().all(|&v| (0.0..=0.64 + 1e-6).contains(&v)));

        let next = mpc.get_state(&x0, &tile_state(&x0, 32)).unwrap();
        assert_eq!(next.len(), 12);
        assert!(mpc.statistics().sqp_iterations >= 1);
    }

    #[test]
    fn test_other_model_name_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let params = QuadrotorParams {
            name: "Heavy_Quadrotor".to_string(),
            ..QuadrotorParams::crazyflie(0.0, 0.0, 0.0)
        };
        let model: Arc<dyn Dynamics> = Arc::new(Quadrotor::new(params).unwrap());

        let result = NmpcBuilder::from_config(model, &NmpcConfig::default())
            .options(SolverOptions {
                artifact_root: Some(tmp.path().to_path_buf()),
                ..Default::default()
            })
            .build::<AcadosSolver>();

        match result {
            Err(NmpcError::Solver(SolverError::InitializationFailed(msg))) => {
                assert!(msg.contains("Heavy_Quadrotor"), "{}", msg);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("solver built for the wrong model"),
        }
    }
}
