//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use neuroerp_operator::controller::{ControllerContext, ErpController, ReconcileAction};
use neuroerp_operator::crd::{Feature, FeatureSpec, ModuleSpec, NeuroErp, NeuroErpSpec};
use neuroerp_operator::hooks::ExtensionHooks;
use neuroerp_operator::resources::component_targets;
use neuroerp_operator::store::MemoryStore;
use neuroerp_operator::{OperatorConfig, OperatorError, OperatorResult};
use parking_lot::Mutex;
use std::sync::Arc;

pub const NAMESPACE: &str = "erp";

/// A NeuroErp named `name` in the test namespace.
pub fn app(name: &str, replicas: i32, modules: &[&str]) -> NeuroErp {
    let modules: Vec<_> = modules.iter().map(|m| (*m, "")).collect();
    app_with_versions(name, replicas, &modules)
}

/// A NeuroErp whose modules pin their own versions; an empty version
/// inherits the spec version.
pub fn app_with_versions(name: &str, replicas: i32, modules: &[(&str, &str)]) -> NeuroErp {
    let mut app = NeuroErp::new(
        name,
        NeuroErpSpec {
            replicas,
            image: "registry.valeo.io/neuroerp".to_string(),
            version: "1.0".to_string(),
            resources: None,
            modules: modules
                .iter()
                .map(|(name, version)| ModuleSpec {
                    name: name.to_string(),
                    version: version.to_string(),
                })
                .collect(),
            monitoring: None,
            backup: None,
            service_mesh: None,
            ai: None,
        },
    );
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app
}

/// Hooks that record calls and can be told to fail cleanup.
#[derive(Default)]
pub struct RecordingHooks {
    pub configured: Mutex<Vec<Feature>>,
    pub cleaned: Mutex<Vec<Feature>>,
    pub fail_cleanup: Mutex<bool>,
}

#[async_trait]
impl ExtensionHooks for RecordingHooks {
    async fn configure(
        &self,
        _app: &NeuroErp,
        feature: Feature,
        _settings: &FeatureSpec,
    ) -> OperatorResult<()> {
        self.configured.lock().push(feature);
        Ok(())
    }

    async fn cleanup(
        &self,
        _app: &NeuroErp,
        feature: Feature,
        _settings: &FeatureSpec,
    ) -> OperatorResult<()> {
        if *self.fail_cleanup.lock() {
            return Err(OperatorError::store("backup-api", "unreachable"));
        }
        self.cleaned.lock().push(feature);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub hooks: Arc<RecordingHooks>,
    pub ctx: Arc<ControllerContext>,
    pub controller: ErpController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(RecordingHooks::default());
        let ctx = Arc::new(
            ControllerContext::new(store.clone())
                .with_hooks(hooks.clone())
                .with_config(config),
        );
        let controller = ErpController::new(ctx.clone());
        Self {
            store,
            hooks,
            ctx,
            controller,
        }
    }

    pub async fn pass(&self, name: &str) -> OperatorResult<ReconcileAction> {
        self.controller.reconcile_identity(NAMESPACE, name).await
    }

    /// Run passes until one asks for a delayed requeue or finishes.
    pub async fn settle(&self, name: &str) -> ReconcileAction {
        for _ in 0..5 {
            let action = self.pass(name).await.expect("pass succeeds");
            if !action.is_immediate() {
                return action;
            }
        }
        panic!("{} did not settle", name);
    }

    /// Mark every workload and pod of `name` ready.
    pub fn make_ready(&self, name: &str) {
        let app = self.store.app(NAMESPACE, name).expect("app exists");
        for target in component_targets(&app) {
            self.store
                .set_workload_ready(NAMESPACE, &target.workload_name, app.spec.replicas);
            for i in 0..app.spec.replicas {
                self.store.add_pod(
                    NAMESPACE,
                    &format!("{}-{}", target.workload_name, i),
                    target.labels.clone(),
                    true,
                    true,
                );
            }
        }
    }
}
