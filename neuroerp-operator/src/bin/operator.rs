//! NeuroERP Kubernetes Operator binary.
//!
//! This binary runs the NeuroERP operator, which manages NeuroErp custom
//! resources and the Deployments and Services they own.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use neuroerp_operator::controller::{error_policy, reconcile, ControllerContext};
use neuroerp_operator::crd::NeuroErp;
use neuroerp_operator::store::KubeStore;
use neuroerp_operator::OperatorConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Check for CRD generation mode before any logging hits stdout
    if std::env::args().any(|arg| arg == "--generate-crds") {
        generate_crds()?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neuroerp_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    tracing::info!("Starting NeuroERP Kubernetes Operator");

    let config = OperatorConfig::from_env();
    let client = Client::try_default().await?;
    tracing::info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Connected to Kubernetes cluster"
    );

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(
        ControllerContext::new(Arc::new(KubeStore::new(client.clone())))
            .with_config(config.clone())
            .with_shutdown(shutdown.clone()),
    );

    let (apps, deployments, services) = match config.watch_namespace.as_deref() {
        Some(ns) => (
            Api::<NeuroErp>::namespaced(client.clone(), ns),
            Api::<Deployment>::namespaced(client.clone(), ns),
            Api::<Service>::namespaced(client, ns),
        ),
        None => (
            Api::<NeuroErp>::all(client.clone()),
            Api::<Deployment>::all(client.clone()),
            Api::<Service>::all(client),
        ),
    };

    tracing::info!("Starting NeuroErp controller");
    Controller::new(apps, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        name = %obj.name,
                        namespace = ?obj.namespace,
                        ?action,
                        "Reconciled NeuroErp"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "NeuroErp controller stream error");
                }
            }
        })
        .await;

    // Abort any pass still holding a store call
    shutdown.cancel();
    tracing::info!("NeuroERP operator stopped");

    Ok(())
}

/// Generate CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&NeuroErp::crd())?);
    Ok(())
}
