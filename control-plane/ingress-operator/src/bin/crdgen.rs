use ingress_operator::crd::{DNSRecord, IngressController};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [IngressController::crd(), DNSRecord::crd()] {
        println!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
