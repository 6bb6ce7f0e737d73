//! Readiness aggregation and status write-back.
//!
//! The status is recomputed from the live children on every pass. Component
//! readiness comes from each Deployment's reported ready replicas, while the
//! top-level `readyReplicas` counts pods that are both running and ready.
//!
//! # Example
//!
//! ```ignore
//! let observation = status::observe(store, &scope, &namespace, &targets).await?;
//! let next = status::compute_status(&app, &observation, outcome.created > 0, 32);
//! if status::status_changed(app.status.as_ref(), &next) {
//!     status::write_status(store, &scope, &app, next).await?;
//! }
//! ```

use super::PassScope;
use crate::crd::{ComponentPhase, ComponentStatus, ErpCondition, ErpPhase, NeuroErp, NeuroErpStatus};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::ComponentTarget;
use crate::store::ResourceStore;
use k8s_openapi::api::core::v1::Pod;

/// Condition type reporting that every component is serving.
pub const AVAILABLE: &str = "Available";
/// Condition type recorded while the application is first brought up.
pub const PROGRESSING: &str = "Progressing";

/// Live readiness of every component, read during one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// Per-component status, in target order.
    pub components: Vec<ComponentStatus>,
    /// Running and ready pods across all components.
    pub ready_pods: i32,
}

/// Counts behind the overall phase and message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessSummary {
    /// Number of components.
    pub total_components: usize,
    /// Components in the Running phase.
    pub running_components: usize,
    /// Running and ready pods.
    pub ready_pods: i32,
    /// Replicas requested by the spec.
    pub desired_pods: i32,
    /// Whether the spec declares modules.
    pub multi_component: bool,
}

impl ReadinessSummary {
    /// Summarize an observation for `app`.
    pub fn from_observation(app: &NeuroErp, observation: &Observation) -> Self {
        Self {
            total_components: observation.components.len(),
            running_components: observation
                .components
                .iter()
                .filter(|c| c.phase == ComponentPhase::Running)
                .count(),
            ready_pods: observation.ready_pods,
            desired_pods: app.spec.replicas,
            multi_component: app.spec.is_multi_component(),
        }
    }

    /// Whether every component is Running.
    ///
    /// A single-resource spec also needs its desired replicas running and ready
    /// as pods; the workload's own ready count is not enough.
    pub fn all_running(&self) -> bool {
        let components_running =
            self.total_components > 0 && self.running_components == self.total_components;
        if self.multi_component {
            components_running
        } else {
            components_running && self.ready_pods >= self.desired_pods
        }
    }

    /// Human-readable status message.
    pub fn format_message(&self) -> String {
        match (self.all_running(), self.multi_component) {
            (true, false) => "all pods are running".to_string(),
            (true, true) => "all components are running".to_string(),
            (false, false) => format!("{}/{} pods ready", self.ready_pods, self.desired_pods),
            (false, true) => format!(
                "{}/{} components running",
                self.running_components, self.total_components
            ),
        }
    }
}

/// Phase of a component with `ready` of `total` replicas ready.
pub fn component_phase(ready: i32, total: i32) -> ComponentPhase {
    if total > 0 && ready == 0 {
        ComponentPhase::Pending
    } else if ready >= total {
        ComponentPhase::Running
    } else {
        ComponentPhase::Updating
    }
}

/// Whether a pod is running and has a `Ready=True` condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// Read the live readiness of every target.
///
/// A missing Deployment marks its component `Unknown` without failing the
/// pass; any other store error is returned.
pub async fn observe(
    store: &dyn ResourceStore,
    scope: &PassScope,
    namespace: &str,
    targets: &[ComponentTarget],
) -> OperatorResult<Observation> {
    let mut observation = Observation::default();

    for target in targets {
        let deployment = match scope.run(store.get_deployment(namespace, &target.workload_name)).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => {
                observation.components.push(unknown_component(target));
                continue;
            }
            Err(e) if e.is_not_found() => {
                observation.components.push(unknown_component(target));
                continue;
            }
            Err(e) => return Err(e),
        };

        let total = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        observation.components.push(ComponentStatus {
            name: target.component.clone(),
            version: target.version.clone(),
            replicas: total,
            available_replicas: ready,
            phase: component_phase(ready, total),
            message: None,
        });

        let pods = scope.run(store.list_pods(namespace, &target.selector())).await?;
        let ready_pods = pods.iter().filter(|p| is_pod_ready(p)).count();
        observation.ready_pods += i32::try_from(ready_pods).unwrap_or(i32::MAX);
    }

    Ok(observation)
}

fn unknown_component(target: &ComponentTarget) -> ComponentStatus {
    tracing::debug!(component = %target.component, "Deployment not found");
    ComponentStatus {
        name: target.component.clone(),
        version: target.version.clone(),
        replicas: 0,
        available_replicas: 0,
        phase: ComponentPhase::Unknown,
        message: Some("deployment not found".to_string()),
    }
}

/// Status a fresh NeuroErp starts from.
pub fn initial_status() -> NeuroErpStatus {
    NeuroErpStatus {
        phase: Some(ErpPhase::Pending),
        message: Some("Initializing NeuroErp".to_string()),
        conditions: vec![ErpCondition::new(
            PROGRESSING,
            true,
            "Initializing",
            "Starting NeuroErp deployment",
        )],
        ..Default::default()
    }
}

/// Derive the next status of `app` from an observation.
///
/// `created` tells whether children were created during this pass.
/// `lastUpdated` is carried over; it is stamped by [`write_status`].
pub fn compute_status(
    app: &NeuroErp,
    observation: &Observation,
    created: bool,
    max_conditions: usize,
) -> NeuroErpStatus {
    let previous = app.status.clone().unwrap_or_default();
    let summary = ReadinessSummary::from_observation(app, observation);
    let was_running = previous.phase == Some(ErpPhase::Running);

    let phase = if summary.all_running() {
        ErpPhase::Running
    } else if matches!(previous.phase, Some(ErpPhase::Running | ErpPhase::Updating)) {
        ErpPhase::Updating
    } else if created || previous.phase == Some(ErpPhase::Deploying) {
        ErpPhase::Deploying
    } else {
        ErpPhase::Pending
    };

    let message = summary.format_message();
    let mut conditions = previous.conditions;
    if phase == ErpPhase::Running && !was_running {
        conditions.push(ErpCondition::new(AVAILABLE, true, "AllComponentsReady", message.clone()));
    } else if phase != ErpPhase::Running && was_running {
        conditions.push(ErpCondition::new(AVAILABLE, false, "ComponentsNotReady", message.clone()));
    }
    trim_conditions(&mut conditions, max_conditions);

    NeuroErpStatus {
        phase: Some(phase),
        message: Some(message),
        ready_replicas: observation.ready_pods,
        observed_generation: app.metadata.generation,
        components: observation.components.clone(),
        conditions,
        last_updated: previous.last_updated,
    }
}

/// Status recorded when a pass fails.
pub fn failed_status(app: &NeuroErp, error: &OperatorError, max_conditions: usize) -> NeuroErpStatus {
    let mut status = app.status.clone().unwrap_or_default();
    let message = error.to_string();

    if status.phase == Some(ErpPhase::Running) {
        append_condition(
            &mut status.conditions,
            ErpCondition::new(AVAILABLE, false, "ReconcileFailed", message.clone()),
            max_conditions,
        );
    }
    status.phase = Some(ErpPhase::Failed);
    status.message = Some(message);
    status
}

/// Append a condition, dropping the oldest entries beyond `max`.
pub fn append_condition(conditions: &mut Vec<ErpCondition>, condition: ErpCondition, max: usize) {
    conditions.push(condition);
    trim_conditions(conditions, max);
}

fn trim_conditions(conditions: &mut Vec<ErpCondition>, max: usize) {
    if max > 0 && conditions.len() > max {
        let excess = conditions.len() - max;
        conditions.drain(..excess);
    }
}

/// Whether `next` differs from `current`, ignoring `lastUpdated`.
pub fn status_changed(current: Option<&NeuroErpStatus>, next: &NeuroErpStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    let mut current = current.clone();
    let mut next = next.clone();
    current.last_updated = None;
    next.last_updated = None;
    current != next
}

/// Stamp `lastUpdated` and write `status` through the status path.
pub async fn write_status(
    store: &dyn ResourceStore,
    scope: &PassScope,
    app: &NeuroErp,
    mut status: NeuroErpStatus,
) -> OperatorResult<NeuroErp> {
    status.last_updated = Some(chrono::Utc::now().to_rfc3339());

    let mut updated = app.clone();
    updated.status = Some(status);
    scope.run(store.update_app_status(&updated)).await
}
