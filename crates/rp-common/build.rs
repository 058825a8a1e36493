//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Build metadata emission for version stamping."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Builds outside a git checkout fall back to placeholder values.
    EmitBuilder::builder().all_cargo().all_git().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
