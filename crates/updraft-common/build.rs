//! ---
//! upd_section: "00-shared"
//! upd_subsection: "build"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Build script emitting version metadata."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing git metadata (tarball builds) degrades to UNKNOWN at runtime.
    EmitBuilder::builder().all_cargo().all_git().all_build().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=UPDRAFT_GIT_OVERRIDE");
    Ok(())
}
