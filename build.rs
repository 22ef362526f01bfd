use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");

    // Envoy's rate limit service plus the admin surface, from the local proto/ tree
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(out_dir.join("vigil_descriptor.bin"))
        .compile_protos(
            &[
                proto_dir.join("envoy/service/ratelimit/v3/rls.proto"),
                proto_dir.join("vigil/admin/v1/admin.proto"),
            ],
            &[&proto_dir],
        )?;

    Ok(())
}
