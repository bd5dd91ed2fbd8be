//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the custom resources
//! read and written by the rotation controller.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use secrets_rotation_controller::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
