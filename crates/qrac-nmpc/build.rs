//! Build script for qrac-nmpc
//!
//! With the `acados` feature, compiles the generated acados C code for the
//! quadrotor OCP and links the acados libraries. Without it there is
//! nothing to build; the embedded SQP backend is pure Rust.
//!
//! Prerequisites for the `acados` feature:
//! - acados installed, `ACADOS_SOURCE_DIR` pointing at it
//! - generated solver code under `generated/<model>/`, where `<model>`
//!   defaults to `Nonlinear_Quadrotor` (override with `QRAC_ACADOS_MODEL`)

fn main() {
    #[cfg(feature = "acados")]
    build_acados();
}

#[cfg(feature = "acados")]
fn c_sources(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|e| e == "c").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(feature = "acados")]
fn build_acados() {
    use std::env;
    use std::path::PathBuf;

    println!("cargo:rerun-if-env-changed=ACADOS_SOURCE_DIR");
    println!("cargo:rerun-if-env-changed=QRAC_ACADOS_MODEL");

    let acados_dir = env::var("ACADOS_SOURCE_DIR").unwrap_or_else(|_| {
        // Try common locations
        ["/opt/acados", "/usr/local/acados"]
            .iter()
            .find(|p| PathBuf::from(p).exists())
            .map(|p| p.to_string())
            .unwrap_or_else(|| format!("{}/acados", env::var("HOME").unwrap_or_default()))
    });
    let acados_path = PathBuf::from(&acados_dir);

    if !acados_path.exists() {
        println!("cargo:warning=acados not found at {}", acados_dir);
        println!("cargo:warning=Set ACADOS_SOURCE_DIR environment variable");
        return;
    }

    let model = env::var("QRAC_ACADOS_MODEL").unwrap_or_else(|_| "Nonlinear_Quadrotor".to_string());
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    let generated_dir = PathBuf::from(manifest_dir).join("generated").join(&model);

    if !generated_dir.exists() {
        println!("cargo:warning=Generated acados code not found at {:?}", generated_dir);
        return;
    }

    println!("cargo:rerun-if-changed=generated/");

    let mut build = cc::Build::new();
    build.include(acados_path.join("include"));
    build.include(acados_path.join("include/blasfeo/include"));
    build.include(acados_path.join("include/hpipm/include"));
    build.include(&generated_dir);

    // Solver sources plus the model and cost function subdirectories
    let mut sources = c_sources(&generated_dir);
    for suffix in ["model", "cost"] {
        let sub = generated_dir.join(format!("{}_{}", model, suffix));
        if sub.exists() {
            build.include(&sub);
            sources.extend(c_sources(&sub));
        }
    }

    if sources.is_empty() {
        println!("cargo:warning=No C files found in {:?}", generated_dir);
        return;
    }

    for source in &sources {
        build.file(source);
        println!("cargo:rerun-if-changed={}", source.display());
    }
    build.compile("qrac_acados");

    println!("cargo:rustc-link-search=native={}/lib", acados_dir);
    println!("cargo:rustc-link-lib=acados");
    println!("cargo:rustc-link-lib=blasfeo");
    println!("cargo:rustc-link-lib=hpipm");
    println!("cargo:rustc-link-lib=m");
}
