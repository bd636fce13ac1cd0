use prost::Message;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    // protox compiles the schema in-process, so no protoc binary is required
    let file_descriptors =
        protox::compile(["router_manager/command/v1/command.proto"], ["proto"])?;

    std::fs::write(
        out_dir.join("command_descriptor.bin"),
        file_descriptors.encode_to_vec(),
    )?;

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_fds(file_descriptors)?;

    Ok(())
}
