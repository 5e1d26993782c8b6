// Integration tests require a running Kubernetes cluster with the operator
// CRDs and the config.openshift.io singletons installed. Ignored by default.

use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use ingress_operator::config::OperatorConfig;
use ingress_operator::crd::{IngressController, IngressControllerSpec};
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};

mod common;
use common::{OPERATOR_NS, set_env, uniq};

#[test_log::test(tokio::test)]
#[ignore]
async fn controller_publishes_domain_and_releases_on_delete() {
    let _g = set_env("INGRESS_OPERATOR_ERROR_REQUEUE_SECS", "2");
    let client = Client::try_default().await.expect("kube client");
    let cfg = Arc::new(
        OperatorConfig::init_from_env()
            .expect("config")
            .apply_defaults(),
    );

    let ctrl_client = client.clone();
    let ctrl_cfg = cfg.clone();
    let ctrl = tokio::spawn(async move {
        let _ = ingress_operator::controller::run_controller(
            ctrl_client,
            ctrl_cfg,
        )
        .await;
    });

    let api: Api<IngressController> =
        Api::namespaced(client.clone(), OPERATOR_NS);
    let name = uniq("it-ic");
    let ic = IngressController::new(
        &name,
        IngressControllerSpec {
            domain: Some(format!("{name}.example.com")),
            ..Default::default()
        },
    );
    api.create(&PostParams::default(), &ic)
        .await
        .expect("create ingresscontroller");

    let mut published = false;
    for _ in 0..60 {
        let current = api.get(&name).await.expect("get ingresscontroller");
        if current.is_status_domain_set() {
            published = true;
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(published, "domain was not published in time");

    api.delete(&name, &DeleteParams::default())
        .await
        .expect("delete ingresscontroller");
    let mut gone = false;
    for _ in 0..120 {
        if api.get_opt(&name).await.expect("get_opt").is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    ctrl.abort();
    assert!(gone, "ingresscontroller was not finalized in time");
}
