//! ---
//! upd_section: "05-daemon"
//! upd_subsection: "build"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Build script emitting version metadata for the daemon."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_cargo().all_git().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
