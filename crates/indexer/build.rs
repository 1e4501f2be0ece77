fn main() -> Result<(), Box<dyn std::error::Error>> {
    unsafe {
        std::env::set_var("PROTOC", protobuf_src::protoc());
    }
    println!("cargo:rerun-if-changed=../../proto/chainindex.proto");
    tonic_build::configure().compile_protos(&["../../proto/chainindex.proto"], &["../../proto"])?;
    Ok(())
}
