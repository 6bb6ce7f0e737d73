//! Resource store abstraction.
//!
//! The reconciler never talks to the Kubernetes API directly. It holds an
//! `Arc<dyn ResourceStore>` so that production code uses [`KubeStore`] while
//! tests drive the same reconcile logic against [`MemoryStore`].
//!
//! Conventions shared by every implementation:
//!
//! - `get_*` returns `Ok(None)` when the object does not exist.
//! - `update_app` writes metadata and spec only; `update_app_status` writes
//!   the status subresource only. Status writes never bump the generation.
//! - Updates carry the object's `resourceVersion`; a stale version fails.

mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, WriteCounts};

use crate::crd::NeuroErp;
use crate::error::OperatorResult;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};

/// Typed CRUD over the objects the operator reads and writes.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a NeuroErp by namespace and name.
    async fn get_app(&self, namespace: &str, name: &str) -> OperatorResult<Option<NeuroErp>>;

    /// Persist metadata and spec changes of a NeuroErp (finalizers).
    async fn update_app(&self, app: &NeuroErp) -> OperatorResult<NeuroErp>;

    /// Persist the status subresource of a NeuroErp.
    async fn update_app_status(&self, app: &NeuroErp) -> OperatorResult<NeuroErp>;

    /// Get a Deployment by namespace and name.
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> OperatorResult<Option<Deployment>>;

    /// Create a Deployment.
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment>;

    /// Replace a Deployment.
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment>;

    /// List Deployments in a namespace matching a label selector.
    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<Deployment>>;

    /// Delete a Deployment; deleting a missing one succeeds.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> OperatorResult<()>;

    /// Get a Service by namespace and name.
    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>>;

    /// Create a Service.
    async fn create_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service>;

    /// Replace a Service.
    async fn update_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service>;

    /// List Services in a namespace matching a label selector.
    async fn list_services(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Service>>;

    /// Delete a Service; deleting a missing one succeeds.
    async fn delete_service(&self, namespace: &str, name: &str) -> OperatorResult<()>;

    /// List pods in a namespace matching a `key=value,...` label selector.
    async fn list_pods(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Pod>>;
}
