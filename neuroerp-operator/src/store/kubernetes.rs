//! [`ResourceStore`] backed by the Kubernetes API.

use super::ResourceStore;
use crate::crd::NeuroErp;
use crate::error::{OperatorError, OperatorResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};

/// Resource store that issues requests against a live cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn apps(&self, namespace: &str) -> Api<NeuroErp> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Treat a 404 on delete as success.
fn ignore_missing<T>(result: Result<T, kube::Error>) -> OperatorResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn namespace_of(app: &NeuroErp) -> OperatorResult<String> {
    app.namespace()
        .ok_or_else(|| OperatorError::InvalidConfig("NeuroErp must be namespaced".into()))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_app(&self, namespace: &str, name: &str) -> OperatorResult<Option<NeuroErp>> {
        Ok(self.apps(namespace).get_opt(name).await?)
    }

    async fn update_app(&self, app: &NeuroErp) -> OperatorResult<NeuroErp> {
        let namespace = namespace_of(app)?;
        let name = app.name_any();
        tracing::debug!(name = %name, namespace = %namespace, "Replacing NeuroErp metadata");
        Ok(self
            .apps(&namespace)
            .replace(&name, &PostParams::default(), app)
            .await?)
    }

    async fn update_app_status(&self, app: &NeuroErp) -> OperatorResult<NeuroErp> {
        let namespace = namespace_of(app)?;
        let name = app.name_any();
        let patch = serde_json::json!({
            "status": app.status
        });

        Ok(self
            .apps(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Deployment>> {
        Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment> {
        Ok(self
            .deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> OperatorResult<Deployment> {
        Ok(self
            .deployments(namespace)
            .replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await?)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<Deployment>> {
        let list = self
            .deployments(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> OperatorResult<()> {
        tracing::debug!(name = %name, namespace = %namespace, "Deleting Deployment");
        ignore_missing(
            self.deployments(namespace)
                .delete(name, &DeleteParams::background())
                .await,
        )
    }

    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>> {
        Ok(self.services(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service> {
        Ok(self
            .services(namespace)
            .create(&PostParams::default(), service)
            .await?)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> OperatorResult<Service> {
        Ok(self
            .services(namespace)
            .replace(&service.name_any(), &PostParams::default(), service)
            .await?)
    }

    async fn list_services(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Service>> {
        let list = self
            .services(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> OperatorResult<()> {
        tracing::debug!(name = %name, namespace = %namespace, "Deleting Service");
        ignore_missing(
            self.services(namespace)
                .delete(name, &DeleteParams::background())
                .await,
        )
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> OperatorResult<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }
}
