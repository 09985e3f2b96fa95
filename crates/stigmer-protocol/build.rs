// Uses protox (pure Rust protobuf compiler) to avoid requiring external protoc binary
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure rebuild triggers when proto files change (protox doesn't emit these automatically)
    println!("cargo:rerun-if-changed=proto/stigmer/v1/resource.proto");
    println!("cargo:rerun-if-changed=proto/stigmer/v1/resources.proto");
    println!("cargo:rerun-if-changed=proto/stigmer/v1/services.proto");

    let file_descriptors = protox::compile(
        [
            "proto/stigmer/v1/resource.proto",
            "proto/stigmer/v1/resources.proto",
            "proto/stigmer/v1/services.proto",
        ],
        ["proto"],
    )?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(file_descriptors)?;
    Ok(())
}
