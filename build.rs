// CLASSIFICATION: COMMUNITY
// Filename: build.rs v0.2
// Author: Lukas Bower
// Date Modified: 2029-04-02

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/mdt_dialout.proto");
    println!("cargo:rerun-if-changed=proto/telemetry.proto");

    tonic_build::configure().compile(
        &["proto/mdt_dialout.proto", "proto/telemetry.proto"],
        &["proto"],
    )?;
    Ok(())
}
