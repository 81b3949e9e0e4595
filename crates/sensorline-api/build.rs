//! Compiles the collector protocol into Rust message types, the tonic server
//! trait and the tonic client.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/collector.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/collector.proto");

    Ok(())
}
