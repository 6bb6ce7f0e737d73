//! NeuroErp Custom Resource Definition.
//!
//! Defines an ERP application deployment in Kubernetes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// NeuroErp is the Schema for the neuroerps API.
///
/// A NeuroErp describes the desired state of an ERP application. The operator
/// creates one Deployment and one ClusterIP Service per component, and reports
/// the aggregated readiness of those children in the status subresource.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "erp.valeo.io",
    version = "v1alpha1",
    kind = "NeuroErp",
    plural = "neuroerps",
    shortname = "nerp",
    namespaced,
    status = "NeuroErpStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NeuroErpSpec {
    /// Number of replicas per component.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image repository, without tag.
    pub image: String,

    /// Version tag appended to the image.
    pub version: String,

    /// Resource requests and limits for each container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Enabled ERP modules. Each module gets its own Deployment and Service.
    /// An empty list deploys the application as a single workload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleSpec>,

    /// Monitoring integration toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<FeatureSpec>,

    /// Backup integration toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<FeatureSpec>,

    /// Service mesh integration toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_mesh: Option<FeatureSpec>,

    /// AI integration toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<FeatureSpec>,
}

fn default_replicas() -> i32 {
    1
}

/// A declared ERP module.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// Module name (e.g., "core", "finance", "ai").
    pub name: String,

    /// Module version; falls back to the spec version when empty.
    #[serde(default)]
    pub version: String,
}

/// Resource requirements, as quantity strings keyed by resource name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Resource requests (e.g., `cpu: 500m`, `memory: 512Mi`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    /// Resource limits.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// An optional integration with an opaque configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    /// Whether the integration is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Integration-specific settings, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Optional integrations that can be toggled on a NeuroErp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Monitoring.
    Monitoring,
    /// Backup.
    Backup,
    /// Service mesh.
    ServiceMesh,
    /// AI.
    Ai,
}

impl Feature {
    /// All features in evaluation order.
    pub const ALL: [Feature; 4] = [
        Feature::Monitoring,
        Feature::Backup,
        Feature::ServiceMesh,
        Feature::Ai,
    ];

    /// Name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Monitoring => "monitoring",
            Feature::Backup => "backup",
            Feature::ServiceMesh => "serviceMesh",
            Feature::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NeuroErpSpec {
    /// Toggle for the given feature.
    pub fn feature(&self, feature: Feature) -> Option<&FeatureSpec> {
        match feature {
            Feature::Monitoring => self.monitoring.as_ref(),
            Feature::Backup => self.backup.as_ref(),
            Feature::ServiceMesh => self.service_mesh.as_ref(),
            Feature::Ai => self.ai.as_ref(),
        }
    }

    /// Enabled features with their settings.
    pub fn enabled_features(&self) -> impl Iterator<Item = (Feature, &FeatureSpec)> + '_ {
        Feature::ALL.into_iter().filter_map(move |feature| {
            self.feature(feature)
                .filter(|spec| spec.enabled)
                .map(|spec| (feature, spec))
        })
    }

    /// Whether the spec declares modules.
    pub fn is_multi_component(&self) -> bool {
        !self.modules.is_empty()
    }
}

/// NeuroErp status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NeuroErpStatus {
    /// Current phase; unset until the first reconcile initializes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ErpPhase>,

    /// Human-readable message about current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Number of pods that are running and ready, across all components.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Last spec generation that was reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Per-component status, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,

    /// Condition history, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ErpCondition>,

    /// Last time the status was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Overall phase of a NeuroErp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ErpPhase {
    /// Accepted, children not yet ready.
    Pending,
    /// Children were just created and are starting.
    Deploying,
    /// A previously running application is converging again.
    Updating,
    /// Every component is running.
    Running,
    /// The last pass failed.
    Failed,
}

impl std::fmt::Display for ErpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErpPhase::Pending => "Pending",
            ErpPhase::Deploying => "Deploying",
            ErpPhase::Updating => "Updating",
            ErpPhase::Running => "Running",
            ErpPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Status of a single component's workload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component name.
    pub name: String,

    /// Deployed version.
    pub version: String,

    /// Desired replicas.
    #[serde(default)]
    pub replicas: i32,

    /// Ready replicas reported by the workload.
    #[serde(default)]
    pub available_replicas: i32,

    /// Component phase.
    pub phase: ComponentPhase,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Phase of a single component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ComponentPhase {
    /// No replica is ready.
    Pending,
    /// Some but not all replicas are ready.
    Updating,
    /// All replicas are ready.
    Running,
    /// The workload could not be observed.
    Unknown,
}

/// Condition representing NeuroErp state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErpCondition {
    /// Type of condition (Progressing, Available).
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False).
    pub status: String,

    /// Last time the condition transitioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErpCondition {
    /// Build a condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    /// Whether the condition status is `True`.
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}
