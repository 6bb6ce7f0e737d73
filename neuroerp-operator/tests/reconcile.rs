//! End-to-end reconcile passes against the in-memory store.

mod common;

use common::{app, app_with_versions, Harness, NAMESPACE};
use neuroerp_operator::controller::lifecycle::{has_finalizer, FINALIZER};
use neuroerp_operator::controller::status::{self, AVAILABLE};
use neuroerp_operator::controller::{ControllerContext, ErpController, PassScope, ReconcileAction};
use neuroerp_operator::crd::{ComponentPhase, ErpPhase, Feature, FeatureSpec};
use neuroerp_operator::resources::component_targets;
use neuroerp_operator::store::MemoryStore;
use neuroerp_operator::{OperatorConfig, OperatorError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn available_count(h: &Harness, name: &str, value: bool) -> usize {
    h.store
        .app(NAMESPACE, name)
        .and_then(|a| a.status)
        .map(|s| {
            s.conditions
                .iter()
                .filter(|c| c.condition_type == AVAILABLE && c.is_true() == value)
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn bootstrap_adds_finalizer_then_status() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 3, &[]));

    let action = h.pass("erp1").await.expect("finalizer pass");
    assert_eq!(action, ReconcileAction::requeue_now());
    let stored = h.store.app(NAMESPACE, "erp1").expect("app");
    assert_eq!(stored.metadata.finalizers, Some(vec![FINALIZER.to_string()]));
    assert!(stored.status.is_none());

    let action = h.pass("erp1").await.expect("status pass");
    assert!(action.is_immediate());
    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Pending));
    assert_eq!(status.conditions[0].condition_type, "Progressing");
    assert_eq!(status.conditions[0].reason.as_deref(), Some("Initializing"));

    // Bootstrap writes never touch children.
    assert!(h.store.deployment(NAMESPACE, "erp1").is_none());
    let writes = h.store.writes();
    assert_eq!(writes.app_updates, 1);
    assert_eq!(writes.status_updates, 1);
}

#[tokio::test]
async fn single_resource_converges_to_running() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 3, &[]));

    let action = h.settle("erp1").await;
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(30)));

    let deploy = h.store.deployment(NAMESPACE, "erp1").expect("deployment");
    assert_eq!(deploy.spec.as_ref().and_then(|s| s.replicas), Some(3));
    let owner = deploy
        .metadata
        .owner_references
        .as_ref()
        .and_then(|r| r.first())
        .expect("owner reference");
    assert_eq!(owner.kind, "NeuroErp");
    assert_eq!(owner.controller, Some(true));
    assert!(h.store.service(NAMESPACE, "erp1").is_some());

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Deploying));
    assert_eq!(status.message.as_deref(), Some("0/3 pods ready"));

    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Running));
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.message.as_deref(), Some("all pods are running"));
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.last_updated.is_some());
    assert_eq!(available_count(&h, "erp1", true), 1);
}

#[tokio::test]
async fn ready_workload_without_pods_is_not_running() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 3, &[]));
    h.settle("erp1").await;

    // The Deployment claims readiness but no pod backs it.
    h.store.set_workload_ready(NAMESPACE, "erp1", 3);
    h.pass("erp1").await.expect("pass");

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.components[0].phase, ComponentPhase::Running);
    assert_ne!(status.phase, Some(ErpPhase::Running));
    assert_eq!(status.ready_replicas, 0);
    assert_eq!(status.message.as_deref(), Some("0/3 pods ready"));
    assert_eq!(available_count(&h, "erp1", true), 0);
}

#[tokio::test]
async fn converged_pass_issues_no_writes() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &[]));
    h.settle("erp1").await;
    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");

    let before = h.store.writes();
    let action = h.pass("erp1").await.expect("steady pass");
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(30)));
    assert_eq!(h.store.writes(), before);
    assert_eq!(available_count(&h, "erp1", true), 1);
}

#[tokio::test]
async fn replica_drift_is_corrected_without_touching_annotations() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &[]));
    h.settle("erp1").await;

    h.store.external_edit_deployment(NAMESPACE, "erp1", |d| {
        d.metadata.annotations = Some(BTreeMap::from([(
            "deployment.kubernetes.io/revision".to_string(),
            "4".to_string(),
        )]));
        if let Some(spec) = d.spec.as_mut() {
            spec.replicas = Some(7);
        }
    });

    let before = h.store.writes().deployment_updates;
    h.pass("erp1").await.expect("drift pass");

    let deploy = h.store.deployment(NAMESPACE, "erp1").expect("deployment");
    assert_eq!(deploy.spec.as_ref().and_then(|s| s.replicas), Some(2));
    assert_eq!(
        deploy
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get("deployment.kubernetes.io/revision"))
            .map(String::as_str),
        Some("4")
    );
    assert_eq!(h.store.writes().deployment_updates, before + 1);
}

#[tokio::test]
async fn service_selector_drift_keeps_cluster_ip() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 1, &[]));
    h.settle("erp1").await;

    let cluster_ip = h
        .store
        .service(NAMESPACE, "erp1")
        .and_then(|s| s.spec)
        .and_then(|s| s.cluster_ip)
        .expect("allocated cluster ip");
    h.store.external_edit_service(NAMESPACE, "erp1", |s| {
        if let Some(spec) = s.spec.as_mut() {
            spec.selector = Some(BTreeMap::from([("app".to_string(), "other".to_string())]));
        }
    });

    h.pass("erp1").await.expect("drift pass");

    let spec = h.store.service(NAMESPACE, "erp1").and_then(|s| s.spec).expect("spec");
    assert_eq!(spec.cluster_ip.as_deref(), Some(cluster_ip.as_str()));
    assert_eq!(
        spec.selector.as_ref().and_then(|s| s.get("controller")).map(String::as_str),
        Some("erp1")
    );
}

#[tokio::test]
async fn version_bump_rolls_image_and_generation() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 1, &[]));
    h.settle("erp1").await;

    h.store.edit_app_spec(NAMESPACE, "erp1", |a| a.spec.version = "1.1".to_string());
    h.pass("erp1").await.expect("upgrade pass");

    let deploy = h.store.deployment(NAMESPACE, "erp1").expect("deployment");
    let pod = deploy.spec.and_then(|s| s.template.spec).expect("pod spec");
    let container = &pod.containers[0];
    assert_eq!(container.image.as_deref(), Some("registry.valeo.io/neuroerp:1.1"));
    let env = container.env.as_ref().expect("env");
    assert!(env
        .iter()
        .any(|e| e.name == "ERP_VERSION" && e.value.as_deref() == Some("1.1")));

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test]
async fn multi_component_reports_per_component_status() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &["core", "ai"]));

    let action = h.settle("erp1").await;
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(300)));
    assert!(h.store.deployment(NAMESPACE, "erp1-core").is_some());
    assert!(h.store.deployment(NAMESPACE, "erp1-ai").is_some());
    assert!(h.store.service(NAMESPACE, "erp1-ai").is_some());

    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Running));
    assert_eq!(status.message.as_deref(), Some("all components are running"));
    assert_eq!(status.ready_replicas, 4);
    let names: Vec<_> = status.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["core", "ai"]);
    assert!(status.components.iter().all(|c| c.phase == ComponentPhase::Running));
    assert_eq!(available_count(&h, "erp1", true), 1);
}

#[tokio::test]
async fn module_versions_drive_images_and_component_status() {
    let h = Harness::new();
    h.store
        .insert_app(app_with_versions("erp1", 1, &[("core", "1.0"), ("ai", "2.0")]));
    h.settle("erp1").await;

    let image = |name: &str| {
        let deploy = h.store.deployment(NAMESPACE, name).expect("deployment");
        let pod_spec = deploy
            .spec
            .and_then(|s| s.template.spec)
            .expect("pod spec");
        pod_spec.containers[0].image.clone()
    };
    assert_eq!(image("erp1-core").as_deref(), Some("registry.valeo.io/neuroerp:1.0"));
    assert_eq!(image("erp1-ai").as_deref(), Some("registry.valeo.io/neuroerp:2.0"));

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    let versions: Vec<_> = status
        .components
        .iter()
        .map(|c| (c.name.as_str(), c.version.as_str()))
        .collect();
    assert_eq!(versions, vec![("core", "1.0"), ("ai", "2.0")]);
}

#[tokio::test]
async fn removed_module_children_are_deleted() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &["core", "ai"]));
    h.settle("erp1").await;
    let before = h.store.writes();

    h.store.edit_app_spec(NAMESPACE, "erp1", |app| {
        app.spec.modules.retain(|m| m.name == "core");
    });
    h.pass("erp1").await.expect("prune pass");

    assert!(h.store.deployment(NAMESPACE, "erp1-ai").is_none());
    assert!(h.store.service(NAMESPACE, "erp1-ai").is_none());
    assert!(h.store.deployment(NAMESPACE, "erp1-core").is_some());
    assert!(h.store.service(NAMESPACE, "erp1-core").is_some());

    let writes = h.store.writes();
    assert_eq!(writes.deployment_deletes - before.deployment_deletes, 1);
    assert_eq!(writes.service_deletes - before.service_deletes, 1);

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    let names: Vec<_> = status.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["core"]);

    // Nothing left to prune.
    let before = h.store.writes();
    h.pass("erp1").await.expect("steady pass");
    assert_eq!(h.store.writes().deployment_deletes, before.deployment_deletes);
}

#[tokio::test]
async fn switching_to_modules_replaces_single_resource_children() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 1, &[]));
    h.settle("erp1").await;
    assert!(h.store.deployment(NAMESPACE, "erp1").is_some());

    h.store.edit_app_spec(NAMESPACE, "erp1", |app| {
        app.spec.modules = common::app("erp1", 1, &["core"]).spec.modules;
    });
    h.pass("erp1").await.expect("switch pass");

    assert!(h.store.deployment(NAMESPACE, "erp1").is_none());
    assert!(h.store.service(NAMESPACE, "erp1").is_none());
    assert!(h.store.deployment(NAMESPACE, "erp1-core").is_some());
}

#[tokio::test]
async fn unowned_children_are_never_pruned() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 1, &["core", "ai"]));
    h.store.insert_app(app("erp2", 1, &["core", "ai"]));
    h.settle("erp1").await;
    h.settle("erp2").await;

    h.store.edit_app_spec(NAMESPACE, "erp1", |app| {
        app.spec.modules.retain(|m| m.name == "core");
    });
    h.pass("erp1").await.expect("prune pass");

    assert!(h.store.deployment(NAMESPACE, "erp1-ai").is_none());
    assert!(h.store.deployment(NAMESPACE, "erp2-ai").is_some());
    assert!(h.store.deployment(NAMESPACE, "erp2-core").is_some());
}

#[tokio::test]
async fn deleted_component_is_recreated_and_degrades_phase() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &["core", "ai"]));
    h.settle("erp1").await;
    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");

    h.store.external_delete_deployment(NAMESPACE, "erp1-ai");
    h.pass("erp1").await.expect("recreate pass");

    assert!(h.store.deployment(NAMESPACE, "erp1-ai").is_some());
    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Updating));
    assert_eq!(status.components[0].phase, ComponentPhase::Running);
    assert_eq!(status.components[1].phase, ComponentPhase::Pending);
    assert_eq!(available_count(&h, "erp1", false), 1);
}

#[tokio::test]
async fn missing_workload_is_observed_as_unknown() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &["core", "ai"]));
    h.settle("erp1").await;
    h.make_ready("erp1");
    h.store.external_delete_deployment(NAMESPACE, "erp1-ai");

    let stored = h.store.app(NAMESPACE, "erp1").expect("app");
    let targets = component_targets(&stored);
    let scope = PassScope::new(CancellationToken::new(), Duration::from_secs(5));
    let observation = status::observe(&*h.store, &scope, NAMESPACE, &targets)
        .await
        .expect("observe");

    assert_eq!(observation.components[0].phase, ComponentPhase::Running);
    assert_eq!(observation.components[1].phase, ComponentPhase::Unknown);
    assert_eq!(
        observation.components[1].message.as_deref(),
        Some("deployment not found")
    );

    let next = status::compute_status(&stored, &observation, false, 32);
    assert_ne!(next.phase, Some(ErpPhase::Running));
}

#[tokio::test]
async fn workload_vanishing_mid_pass_is_reported_unknown() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 2, &["core", "ai"]));
    h.settle("erp1").await;
    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");
    assert_eq!(
        h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).and_then(|s| s.phase),
        Some(ErpPhase::Running)
    );

    // Gone after the diff engine has read it, before the status is observed.
    h.store.delete_deployment_after_next_read(NAMESPACE, "erp1-ai");
    h.pass("erp1").await.expect("pass");

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.components[0].phase, ComponentPhase::Running);
    assert_eq!(status.components[1].phase, ComponentPhase::Unknown);
    assert_eq!(
        status.components[1].message.as_deref(),
        Some("deployment not found")
    );
    assert_eq!(status.phase, Some(ErpPhase::Updating));
    assert_eq!(available_count(&h, "erp1", false), 1);

    // The next pass recreates it.
    h.pass("erp1").await.expect("recreate pass");
    assert!(h.store.deployment(NAMESPACE, "erp1-ai").is_some());
}

#[tokio::test]
async fn deletion_runs_cleanup_then_releases() {
    let h = Harness::new();
    let mut erp = app("erp1", 1, &[]);
    erp.spec.backup = Some(FeatureSpec {
        enabled: true,
        ..Default::default()
    });
    h.store.insert_app(erp);
    h.settle("erp1").await;
    assert_eq!(*h.hooks.configured.lock(), vec![Feature::Backup]);

    h.store.request_deletion(NAMESPACE, "erp1");
    let action = h.pass("erp1").await.expect("deletion pass");

    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(*h.hooks.cleaned.lock(), vec![Feature::Backup]);
    assert!(h.store.app(NAMESPACE, "erp1").is_none());
    assert!(h.store.deployment(NAMESPACE, "erp1").is_none());
    assert!(h.store.service(NAMESPACE, "erp1").is_none());
}

#[tokio::test]
async fn failed_cleanup_keeps_finalizer() {
    let h = Harness::new();
    let mut erp = app("erp1", 1, &[]);
    erp.spec.monitoring = Some(FeatureSpec {
        enabled: true,
        ..Default::default()
    });
    h.store.insert_app(erp);
    h.settle("erp1").await;

    *h.hooks.fail_cleanup.lock() = true;
    h.store.request_deletion(NAMESPACE, "erp1");
    let err = h.pass("erp1").await.expect_err("cleanup fails");
    assert!(matches!(err, OperatorError::CleanupError { .. }));

    let stored = h.store.app(NAMESPACE, "erp1").expect("still present");
    assert!(has_finalizer(&stored.metadata));
    assert!(stored.metadata.deletion_timestamp.is_some());

    *h.hooks.fail_cleanup.lock() = false;
    assert_eq!(h.pass("erp1").await.expect("retry"), ReconcileAction::Done);
    assert!(h.store.app(NAMESPACE, "erp1").is_none());
}

#[tokio::test]
async fn missing_primary_is_done() {
    let h = Harness::new();
    let action = h.pass("ghost").await.expect("not found is not an error");
    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(h.store.writes().total(), 0);
}

#[tokio::test]
async fn store_failure_propagates_and_marks_failed() {
    let h = Harness::new();
    h.store.insert_app(app("erp1", 1, &[]));
    h.settle("erp1").await;
    h.make_ready("erp1");
    h.pass("erp1").await.expect("ready pass");

    h.store.fail_on("list_pods");
    let err = h.pass("erp1").await.expect_err("list fails");
    assert!(matches!(err, OperatorError::StoreError { ref operation, .. } if operation == "list_pods"));

    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Failed));
    let last = status.conditions.last().expect("condition");
    assert_eq!(last.reason.as_deref(), Some("ReconcileFailed"));

    h.store.clear_failures();
    h.pass("erp1").await.expect("recovered");
    let status = h.store.app(NAMESPACE, "erp1").and_then(|a| a.status).expect("status");
    assert_eq!(status.phase, Some(ErpPhase::Running));
}

#[tokio::test]
async fn configured_resync_intervals_are_used() {
    let config = OperatorConfig::new()
        .resync_interval(Duration::from_secs(5))
        .multi_component_resync_interval(Duration::from_secs(50));
    let h = Harness::with_config(config);
    h.store.insert_app(app("solo", 1, &[]));
    h.store.insert_app(app("suite", 1, &["core"]));

    assert_eq!(h.settle("solo").await, ReconcileAction::Requeue(Duration::from_secs(5)));
    assert_eq!(h.settle("suite").await, ReconcileAction::Requeue(Duration::from_secs(50)));
}

#[tokio::test]
async fn cancelled_pass_fails_without_writes() {
    let store = Arc::new(MemoryStore::new());
    store.insert_app(app("erp1", 1, &[]));
    let shutdown = CancellationToken::new();
    let ctx = Arc::new(ControllerContext::new(store.clone()).with_shutdown(shutdown.clone()));
    let controller = ErpController::new(ctx);

    shutdown.cancel();
    let err = controller
        .reconcile_identity(NAMESPACE, "erp1")
        .await
        .expect_err("cancelled");

    assert!(matches!(err, OperatorError::Cancelled));
    assert_eq!(store.writes().total(), 0);
}
