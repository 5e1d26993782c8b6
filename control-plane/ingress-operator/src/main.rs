use envconfig::Envconfig;
use ingress_operator::{config::OperatorConfig, init_tracing, runtime};
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube's rustls client needs a process-wide provider
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = OperatorConfig::init_from_env()?.apply_defaults();
    info!(?cfg, "Starting ingress operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
