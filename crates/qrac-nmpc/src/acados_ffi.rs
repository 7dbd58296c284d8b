//! acados FFI bindings for the generated quadrotor solver
//!
//! Raw C bindings to the solver acados generates for the
//! `Nonlinear_Quadrotor` model. These are wrapped by the `AcadosSolver`
//! backend in solver.rs.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_double, c_int, c_void};

use crate::solver::Field;

/// Prefix of every generated symbol
pub const MODEL_NAME: &str = "Nonlinear_Quadrotor";

/// Dimension constants of the generated code
pub const NX: usize = 12; // [p, euler, v, omega]
pub const NU: usize = 4; // rotor thrusts
pub const NY: usize = 16; // LINEAR_LS output [x; u]
pub const NYN: usize = 0; // no terminal cost

// Opaque types from acados
#[repr(C)]
pub struct ocp_nlp_in {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_out {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_solver {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_config {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_dims {
    _private: [u8; 0],
}

/// Solver capsule, opaque handle to the generated solver
#[repr(C)]
pub struct Nonlinear_Quadrotor_solver_capsule {
    _private: [u8; 0],
}

type Capsule = Nonlinear_Quadrotor_solver_capsule;

extern "C" {
    pub fn Nonlinear_Quadrotor_acados_create_capsule() -> *mut Capsule;
    pub fn Nonlinear_Quadrotor_acados_free_capsule(capsule: *mut Capsule) -> c_int;

    pub fn Nonlinear_Quadrotor_acados_create_with_discretization(
        capsule: *mut Capsule,
        n_time_steps: c_int,
        new_time_steps: *const c_double,
    ) -> c_int;
    pub fn Nonlinear_Quadrotor_acados_reset(capsule: *mut Capsule, reset_qp_solver_mem: c_int) -> c_int;
    pub fn Nonlinear_Quadrotor_acados_free(capsule: *mut Capsule) -> c_int;

    pub fn Nonlinear_Quadrotor_acados_solve(capsule: *mut Capsule) -> c_int;

    pub fn Nonlinear_Quadrotor_acados_get_nlp_in(capsule: *mut Capsule) -> *mut ocp_nlp_in;
    pub fn Nonlinear_Quadrotor_acados_get_nlp_out(capsule: *mut Capsule) -> *mut ocp_nlp_out;
    pub fn Nonlinear_Quadrotor_acados_get_nlp_solver(capsule: *mut Capsule) -> *mut ocp_nlp_solver;
    pub fn Nonlinear_Quadrotor_acados_get_nlp_config(capsule: *mut Capsule) -> *mut ocp_nlp_config;
    pub fn Nonlinear_Quadrotor_acados_get_nlp_dims(capsule: *mut Capsule) -> *mut ocp_nlp_dims;

    pub fn ocp_nlp_constraints_model_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        in_: *mut ocp_nlp_in,
        out: *mut ocp_nlp_out,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    ) -> c_int;

    pub fn ocp_nlp_cost_model_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    ) -> c_int;

    pub fn ocp_nlp_out_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    );

    pub fn ocp_nlp_out_get(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    );

    pub fn ocp_nlp_get(solver: *mut ocp_nlp_solver, field: *const c_char, value: *mut c_void);
}

/// NUL-terminated acados name of `field`
fn field_name(field: Field) -> *const c_char {
    let name: &'static [u8] = match field {
        Field::Lbx => b"lbx\0",
        Field::Ubx => b"ubx\0",
        Field::Yref => b"yref\0",
        Field::X => b"x\0",
        Field::U => b"u\0",
    };
    name.as_ptr() as *const c_char
}

/// Safe wrapper around the acados solver capsule
///
/// Lengths are validated by the caller against the problem dimensions;
/// the wrapper only forwards pointers.
pub struct AcadosCapsule {
    capsule: *mut Capsule,
    config: *mut ocp_nlp_config,
    dims: *mut ocp_nlp_dims,
    nlp_in: *mut ocp_nlp_in,
    nlp_out: *mut ocp_nlp_out,
    solver: *mut ocp_nlp_solver,
}

impl AcadosCapsule {
    /// Create the solver with `n` shooting intervals of the given lengths
    pub fn new(n: usize, time_steps: &[f64]) -> Result<Self, i32> {
        if time_steps.len() != n {
            return Err(-1);
        }

        unsafe {
            let capsule = Nonlinear_Quadrotor_acados_create_capsule();
            if capsule.is_null() {
                return Err(-1);
            }

            let status =
                Nonlinear_Quadrotor_acados_create_with_discretization(capsule, n as c_int, time_steps.as_ptr());
            if status != 0 {
                Nonlinear_Quadrotor_acados_free_capsule(capsule);
                return Err(status);
            }

            Ok(Self {
                capsule,
                config: Nonlinear_Quadrotor_acados_get_nlp_config(capsule),
                dims: Nonlinear_Quadrotor_acados_get_nlp_dims(capsule),
                nlp_in: Nonlinear_Quadrotor_acados_get_nlp_in(capsule),
                nlp_out: Nonlinear_Quadrotor_acados_get_nlp_out(capsule),
                solver: Nonlinear_Quadrotor_acados_get_nlp_solver(capsule),
            })
        }
    }

    /// Set a state bound (`Lbx`/`Ubx`) at a stage
    pub fn set_constraint(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), i32> {
        let status = unsafe {
            ocp_nlp_constraints_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                self.nlp_out,
                stage as c_int,
                field_name(field),
                values.as_ptr() as *mut c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }

    /// Set the cost reference at a stage
    pub fn set_reference(&mut self, stage: usize, yref: &[f64]) -> Result<(), i32> {
        let status = unsafe {
            ocp_nlp_cost_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                stage as c_int,
                field_name(Field::Yref),
                yref.as_ptr() as *mut c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }

    /// Seed the primal guess (`X`/`U`) at a stage
    pub fn set_primal(&mut self, stage: usize, field: Field, values: &[f64]) -> Result<(), i32> {
        unsafe {
            ocp_nlp_out_set(
                self.config,
                self.dims,
                self.nlp_out,
                self.nlp_in,
                stage as c_int,
                field_name(field),
                values.as_ptr() as *mut c_void,
            );
        }
        Ok(())
    }

    /// Solve the OCP, returning the acados status
    pub fn solve(&mut self) -> i32 {
        unsafe { Nonlinear_Quadrotor_acados_solve(self.capsule) }
    }

    /// Read `len` primal values of `field` at a stage
    pub fn get_primal(&self, stage: usize, field: Field, len: usize) -> Vec<f64> {
        let mut values = vec![0.0; len];
        unsafe {
            ocp_nlp_out_get(
                self.config,
                self.dims,
                self.nlp_out,
                stage as c_int,
                field_name(field),
                values.as_mut_ptr() as *mut c_void,
            );
        }
        values
    }

    /// Solve time of the last call [s]
    pub fn get_solve_time(&self) -> f64 {
        let mut time = 0.0f64;
        unsafe {
            ocp_nlp_get(
                self.solver,
                b"time_tot\0".as_ptr() as *const c_char,
                &mut time as *mut f64 as *mut c_void,
            );
        }
        time
    }

    pub fn get_sqp_iterations(&self) -> i32 {
        let mut iters = 0i32;
        unsafe {
            ocp_nlp_get(
                self.solver,
                b"sqp_iter\0".as_ptr() as *const c_char,
                &mut iters as *mut i32 as *mut c_void,
            );
        }
        iters
    }

    /// Zero the primal-dual iterate and the QP solver memory
    pub fn reset(&mut self) -> Result<(), i32> {
        let status = unsafe { Nonlinear_Quadrotor_acados_reset(self.capsule, 1) };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }
}

impl Drop for AcadosCapsule {
    fn drop(&mut self) {
        unsafe {
            Nonlinear_Quadrotor_acados_free(self.capsule);
            Nonlinear_Quadrotor_acados_free_capsule(self.capsule);
        }
    }
}

// Safety: the capsule is owned by one solver and only touched through &mut
unsafe impl Send for AcadosCapsule {}
