//! In-memory [`ResourceStore`] for tests and local experiments.
//!
//! Behaves like a minimal API server:
//!
//! - assigns uids and resource versions on create
//! - rejects updates carrying a stale `resourceVersion`
//! - bumps `metadata.generation` when a NeuroErp spec changes, never on status writes
//! - physically deletes a terminating NeuroErp once its finalizers are gone,
//!   together with every child it owns
//!
//! Controller writes are counted per kind so tests can assert idempotence.
//! Helpers prefixed with `external_` or named after cluster behaviour
//! (`set_workload_ready`, `add_pod`) simulate out-of-band changes and are not
//! counted.

use super::ResourceStore;
use crate::crd::NeuroErp;
use crate::error::{OperatorError, OperatorResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

type Key = (String, String);

/// Number of writes issued through the [`ResourceStore`] interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// NeuroErp metadata/spec updates.
    pub app_updates: usize,
    /// NeuroErp status updates.
    pub status_updates: usize,
    /// Deployments created.
    pub deployment_creates: usize,
    /// Deployments replaced.
    pub deployment_updates: usize,
    /// Deployments deleted.
    pub deployment_deletes: usize,
    /// Services created.
    pub service_creates: usize,
    /// Services replaced.
    pub service_updates: usize,
    /// Services deleted.
    pub service_deletes: usize,
}

impl WriteCounts {
    /// Sum of all writes.
    pub fn total(&self) -> usize {
        self.app_updates
            + self.status_updates
            + self.deployment_creates
            + self.deployment_updates
            + self.deployment_deletes
            + self.service_creates
            + self.service_updates
            + self.service_deletes
    }
}

#[derive(Default)]
struct State {
    apps: BTreeMap<Key, NeuroErp>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    pods: BTreeMap<Key, Pod>,
    writes: WriteCounts,
    failing: HashSet<String>,
    vanishing: HashSet<Key>,
    next_uid: u64,
    next_version: u64,
}

impl State {
    fn stamp_new(&mut self, meta: &mut ObjectMeta, namespace: &str) {
        self.next_uid += 1;
        meta.namespace = Some(namespace.to_string());
        meta.uid = Some(format!("uid-{}", self.next_uid));
        meta.resource_version = Some(self.bump_version());
    }

    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn collect_garbage(&mut self, owner_uid: &str) {
        let owned = |meta: &ObjectMeta| {
            meta.owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| r.uid == owner_uid))
        };
        self.deployments.retain(|_, d| !owned(&d.metadata));
        self.services.retain(|_, s| !owned(&s.metadata));
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn check_version(
    operation: &str,
    current: &ObjectMeta,
    incoming: &ObjectMeta,
) -> OperatorResult<()> {
    match (&incoming.resource_version, &current.resource_version) {
        (Some(incoming), Some(current)) if incoming != current => Err(OperatorError::store(
            operation,
            format!(
                "conflict: resourceVersion {} is stale (current {})",
                incoming, current
            ),
        )),
        _ => Ok(()),
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> OperatorError {
    OperatorError::NotFound {
        kind: kind.into(),
        name: name.into(),
        namespace: namespace.into(),
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

/// Thread-safe in-memory resource store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a NeuroErp as if a user had applied it.
    ///
    /// Defaults the namespace to `default`, assigns a uid and sets generation 1.
    pub fn insert_app(&self, mut app: NeuroErp) -> NeuroErp {
        let mut state = self.state.lock();
        let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
        state.stamp_new(&mut app.metadata, &namespace);
        app.metadata.generation = Some(1);
        state.apps.insert(key(&namespace, &app.name_any()), app.clone());
        app
    }

    /// Current copy of a NeuroErp.
    pub fn app(&self, namespace: &str, name: &str) -> Option<NeuroErp> {
        self.state.lock().apps.get(&key(namespace, name)).cloned()
    }

    /// Apply a user edit to a NeuroErp spec, bumping its generation.
    pub fn edit_app_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut NeuroErp)) {
        let mut state = self.state.lock();
        let version = state.bump_version();
        if let Some(app) = state.apps.get_mut(&key(namespace, name)) {
            edit(app);
            app.metadata.generation = Some(app.metadata.generation.unwrap_or(0) + 1);
            app.metadata.resource_version = Some(version);
        }
    }

    /// Request deletion the way the API server does for an object with finalizers.
    ///
    /// Objects without finalizers are removed immediately.
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let version = state.bump_version();
        let k = key(namespace, name);
        let Some(app) = state.apps.get_mut(&k) else {
            return;
        };

        if app.finalizers().is_empty() {
            let uid = app.uid().unwrap_or_default();
            state.apps.remove(&k);
            state.collect_garbage(&uid);
            return;
        }

        if app.metadata.deletion_timestamp.is_none() {
            app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            app.metadata.resource_version = Some(version);
        }
    }

    /// Current copy of a Deployment.
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state.lock().deployments.get(&key(namespace, name)).cloned()
    }

    /// Current copy of a Service.
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.lock().services.get(&key(namespace, name)).cloned()
    }

    /// Mutate a Deployment out of band, as another actor would.
    pub fn external_edit_deployment(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Deployment),
    ) {
        let mut state = self.state.lock();
        let version = state.bump_version();
        if let Some(deploy) = state.deployments.get_mut(&key(namespace, name)) {
            edit(deploy);
            deploy.metadata.resource_version = Some(version);
        }
    }

    /// Mutate a Service out of band.
    pub fn external_edit_service(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Service),
    ) {
        let mut state = self.state.lock();
        let version = state.bump_version();
        if let Some(svc) = state.services.get_mut(&key(namespace, name)) {
            edit(svc);
            svc.metadata.resource_version = Some(version);
        }
    }

    /// Delete a Deployment out of band.
    pub fn external_delete_deployment(&self, namespace: &str, name: &str) {
        self.state.lock().deployments.remove(&key(namespace, name));
    }

    /// Delete a Deployment out of band right after the controller next reads it.
    ///
    /// Simulates a deletion racing a reconcile pass: the diff engine still sees
    /// the object, later reads in the same pass do not.
    pub fn delete_deployment_after_next_read(&self, namespace: &str, name: &str) {
        self.state.lock().vanishing.insert(key(namespace, name));
    }

    /// Report `ready` of the Deployment's desired replicas as ready.
    pub fn set_workload_ready(&self, namespace: &str, name: &str, ready: i32) {
        self.external_edit_deployment(namespace, name, |deploy| {
            let replicas = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            deploy.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(ready),
                available_replicas: Some(ready),
                ..Default::default()
            });
        });
    }

    /// Add a pod carrying `labels`.
    ///
    /// `running` sets the pod phase; `ready` sets the `Ready` condition.
    pub fn add_pod(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        running: bool,
        ready: bool,
    ) {
        let mut state = self.state.lock();
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(if running { "Running" } else { "Pending" }.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };
        state.stamp_new(&mut pod.metadata, namespace);
        state.pods.insert(key(namespace, name), pod);
    }

    /// Make every subsequent call of `operation` fail (e.g. `"create_service"`).
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Writes issued so far.
    pub fn writes(&self) -> WriteCounts {
        self.state.lock().writes
    }

    fn check(state: &State, operation: &str) -> OperatorResult<()> {
        if state.failing.contains(operation) {
            return Err(OperatorError::store(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_app(&self, namespace: &str, name: &str) -> OperatorResult<Option<NeuroErp>> {
        let state = self.state.lock();
        Self::check(&state, "get_app")?;
        Ok(state.apps.get(&key(namespace, name)).cloned())
    }

    async fn update_app(&self, app: &NeuroErp) -> OperatorResult<NeuroErp> {
        let mut state = self.state.lock();
        Self::check(&state, "update_app")?;

        let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
        let name = app.name_any();
        let k = key(&namespace, &name);
        let current = state
            .apps
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("NeuroErp", &namespace, &name))?;
        check_version("update_app", &current.metadata, &app.metadata)?;

        let mut updated = current.clone();
        updated.metadata.finalizers = app.metadata.finalizers.clone();
        updated.metadata.labels = app.metadata.labels.clone();
        updated.metadata.annotations = app.metadata.annotations.clone();
        if updated.spec != app.spec {
            updated.spec = app.spec.clone();
            updated.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
        }
        updated.metadata.resource_version = Some(state.bump_version());
        state.writes.app_updates += 1;

        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            state.apps.remove(&k);
            state.collect_garbage(&updated.uid().unwrap_or_default());
        } else {
            state.apps.insert(k, updated.clone());
        }
        Ok(updated)
    }

    async fn update_app_status(&self, app: &NeuroErp) -> OperatorResult<NeuroErp> {
        let mut state = self.state.lock();
        Self::check(&state, "update_app_status")?;

        let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
        let name = app.name_any();
        let version = state.bump_version();
        let stored = state
            .apps
            .get_mut(&key(&namespace, &name))
            .ok_or_else(|| not_found("NeuroErp", &namespace, &name))?;
        stored.status = app.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        state.writes.status_updates += 1;
        Ok(updated)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Deployment>> {
        let mut state = self.state.lock();
        Self::check(&state, "get_deployment")?;
        let k = key(namespace, name);
        let found = state.deployments.get(&k).cloned();
        if state.vanishing.remove(&k) {
            state.deployments.remove(&k);
        }
        Ok(found)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment> {
        let mut state = self.state.lock();
        Self::check(&state, "create_deployment")?;

        let name = deployment.name_any();
        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(OperatorError::store(
                "create_deployment",
                format!("deployment {} already exists", name),
            ));
        }
        let mut created = deployment.clone();
        state.stamp_new(&mut created.metadata, namespace);
        state.deployments.insert(k, created.clone());
        state.writes.deployment_creates += 1;
        Ok(created)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment> {
        let mut state = self.state.lock();
        Self::check(&state, "update_deployment")?;

        let name = deployment.name_any();
        let k = key(namespace, &name);
        let current = state
            .deployments
            .get(&k)
            .ok_or_else(|| not_found("Deployment", namespace, &name))?;
        check_version("update_deployment", &current.metadata, &deployment.metadata)?;

        let mut updated = deployment.clone();
        updated.status = current.status.clone();
        updated.metadata.resource_version = Some(state.bump_version());
        state.deployments.insert(k, updated.clone());
        state.writes.deployment_updates += 1;
        Ok(updated)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<Deployment>> {
        let state = self.state.lock();
        Self::check(&state, "list_deployments")?;
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, d)| matches_selector(d.labels(), selector))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> OperatorResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, "delete_deployment")?;
        if state.deployments.remove(&key(namespace, name)).is_some() {
            state.writes.deployment_deletes += 1;
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>> {
        let state = self.state.lock();
        Self::check(&state, "get_service")?;
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service> {
        let mut state = self.state.lock();
        Self::check(&state, "create_service")?;

        let name = service.name_any();
        let k = key(namespace, &name);
        if state.services.contains_key(&k) {
            return Err(OperatorError::store(
                "create_service",
                format!("service {} already exists", name),
            ));
        }
        let mut created = service.clone();
        state.stamp_new(&mut created.metadata, namespace);
        let cluster_ip = format!("10.96.0.{}", state.next_uid % 250 + 2);
        if let Some(spec) = created.spec.as_mut() {
            spec.cluster_ip.get_or_insert(cluster_ip);
        }
        state.services.insert(k, created.clone());
        state.writes.service_creates += 1;
        Ok(created)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service> {
        let mut state = self.state.lock();
        Self::check(&state, "update_service")?;

        let name = service.name_any();
        let k = key(namespace, &name);
        let current = state
            .services
            .get(&k)
            .ok_or_else(|| not_found("Service", namespace, &name))?;
        check_version("update_service", &current.metadata, &service.metadata)?;

        let mut updated = service.clone();
        updated.metadata.resource_version = Some(state.bump_version());
        state.services.insert(k, updated.clone());
        state.writes.service_updates += 1;
        Ok(updated)
    }

    async fn list_services(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Service>> {
        let state = self.state.lock();
        Self::check(&state, "list_services")?;
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, s)| matches_selector(s.labels(), selector))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> OperatorResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, "delete_service")?;
        if state.services.remove(&key(namespace, name)).is_some() {
            state.writes.service_deletes += 1;
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Pod>> {
        let state = self.state.lock();
        Self::check(&state, "list_pods")?;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| matches_selector(pod.labels(), selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }
}
