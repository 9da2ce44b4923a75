fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Protobuf bindings are only needed by the gRPC transport.
    #[cfg(feature = "server")]
    {
        println!("cargo:rerun-if-changed=proto/constrained_opt.proto");
        tonic_build::compile_protos("proto/constrained_opt.proto")?;
    }
    Ok(())
}
