//! Desired-state builder for NeuroErp children.
//!
//! Everything in this module is pure: the same spec always yields the same
//! Deployments, Services, names and labels. The diff engine, the status
//! aggregator and the watch wiring all read names and labels from
//! [`component_targets`] so they can never disagree.

use crate::crd::{NeuroErp, ResourceRequirements};
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements as K8sResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Value of the `app` label on every child.
pub const APP_LABEL_VALUE: &str = "neuroerp";

/// Name of the application container.
pub const CONTAINER_NAME: &str = "neuroerp";

/// Port the application listens on.
pub const CONTAINER_PORT: i32 = 8080;

/// Port exposed by each Service.
pub const SERVICE_PORT: i32 = 80;

/// Liveness probe path.
pub const LIVENESS_PATH: &str = "/health/live";

/// Readiness probe path.
pub const READINESS_PATH: &str = "/health/ready";

/// Names and labels of the children belonging to one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentTarget {
    /// Component name: the module name, or the spec name for single-resource specs.
    pub component: String,
    /// Version deployed for this component.
    pub version: String,
    /// Deployment name.
    pub workload_name: String,
    /// Service name.
    pub service_name: String,
    /// Labels shared by the Deployment selector, pod template and Service selector.
    pub labels: BTreeMap<String, String>,
}

impl ComponentTarget {
    /// Label selector string for listing this component's pods.
    pub fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Deterministic child lookup table for a NeuroErp.
///
/// A spec without modules yields exactly one target named after the spec.
pub fn component_targets(erp: &NeuroErp) -> Vec<ComponentTarget> {
    let name = erp.name_any();

    if erp.spec.modules.is_empty() {
        return vec![ComponentTarget {
            component: name.clone(),
            version: erp.spec.version.clone(),
            workload_name: name.clone(),
            service_name: name.clone(),
            labels: labels(&name),
        }];
    }

    erp.spec
        .modules
        .iter()
        .map(|module| {
            let child = format!("{}-{}", name, module.name);
            let version = if module.version.is_empty() {
                erp.spec.version.clone()
            } else {
                module.version.clone()
            };
            ComponentTarget {
                component: module.name.clone(),
                version,
                workload_name: child.clone(),
                service_name: child.clone(),
                labels: labels(&child),
            }
        })
        .collect()
}

fn labels(controller: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_LABEL_VALUE.to_string()),
        ("controller".to_string(), controller.to_string()),
    ])
}

/// Build the Deployment for a component.
///
/// The owner reference is not set here; the diff engine stamps it on create.
pub fn build_deployment(erp: &NeuroErp, target: &ComponentTarget) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(target.workload_name.clone()),
            namespace: erp.namespace(),
            labels: Some(target.labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(erp.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(target.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(target.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![build_container(erp, target)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_container(erp: &NeuroErp, target: &ComponentTarget) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(format!("{}:{}", erp.spec.image, target.version)),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: CONTAINER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(build_env(erp, target)),
        liveness_probe: Some(http_probe(LIVENESS_PATH, 30, 10, 3)),
        readiness_probe: Some(http_probe(READINESS_PATH, 10, 5, 3)),
        resources: Some(build_resources(erp.spec.resources.as_ref())),
        ..Default::default()
    }
}

/// Environment for a component container.
pub fn build_env(erp: &NeuroErp, target: &ComponentTarget) -> Vec<EnvVar> {
    let mut env = vec![
        env_var("ERP_VERSION", &target.version),
        env_var("ERP_COMPONENT", &target.component),
    ];

    for module in &erp.spec.modules {
        let version = if module.version.is_empty() {
            &erp.spec.version
        } else {
            &module.version
        };
        env.push(env_var(&module_env_name(&module.name), version));
    }

    env
}

fn module_env_name(module: &str) -> String {
    format!("ERP_MODULE_{}", module.to_uppercase().replace('-', "_"))
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn http_probe(path: &str, initial_delay: i32, period: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(CONTAINER_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

/// Container resource requirements; empty when the spec has none.
pub fn build_resources(resources: Option<&ResourceRequirements>) -> K8sResourceRequirements {
    let to_quantities = |map: &BTreeMap<String, String>| {
        if map.is_empty() {
            None
        } else {
            Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect::<BTreeMap<_, _>>(),
            )
        }
    };

    match resources {
        Some(r) => K8sResourceRequirements {
            requests: to_quantities(&r.requests),
            limits: to_quantities(&r.limits),
            ..Default::default()
        },
        None => K8sResourceRequirements::default(),
    }
}

/// Build the ClusterIP Service for a component.
pub fn build_service(erp: &NeuroErp, target: &ComponentTarget) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(target.service_name.clone()),
            namespace: erp.namespace(),
            labels: Some(target.labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(target.labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Record `owner` as the controlling owner of `dependent`.
///
/// Replaces any existing controller reference to the same owner, keeps the rest.
pub fn set_owner_reference(erp: &NeuroErp, dependent: &mut ObjectMeta) -> OperatorResult<()> {
    let owner_ref = erp.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "NeuroErp {} has no uid; cannot own children",
            erp.name_any()
        ))
    })?;

    let refs = dependent.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner_ref.uid);
    refs.push(owner_ref);
    Ok(())
}
