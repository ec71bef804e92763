//! ---
//! lw_section: "03-daemon"
//! lw_subsection: "binary"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Build script emitting build metadata for the licwatch daemon."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder()
        .fail_on_error()
        .all_build()
        .all_cargo()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
