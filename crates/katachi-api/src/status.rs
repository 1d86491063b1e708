//! Application status types
//!
//! Everything the controller writes back: phase, conditions, per-component
//! service status, applied resources, workflow progress, and the record of
//! policies the pre-pass considered.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of an Application
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Current phase of the Application
    #[serde(default)]
    pub phase: ApplicationPhase,
    /// Human-readable message indicating why the Application is in this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Latest available observations of the Application's state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ApplicationCondition>,
    /// Generation most recently observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Latest ApplicationRevision produced for this Application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_revision: Option<RevisionReference>,
    /// Per-component service status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ComponentServiceStatus>,
    /// Resources dispatched for the current revision
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_resources: Vec<AppliedResource>,
    /// Workflow progress for the current revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowStatus>,
    /// One entry per policy the pre-pass considered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_application_policies: Vec<AppliedApplicationPolicy>,
    /// Name of the durable policy cache blob owned by this Application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_policies_config_map: Option<String>,
    /// Resolved workflow restart time (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_restart_scheduled_at: Option<String>,
}

/// Application lifecycle phase
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum ApplicationPhase {
    /// Spec observed, policy pre-pass and rendering in progress
    #[default]
    Rendering,
    /// Workflow is executing
    Running,
    /// Workflow finished and all components are healthy
    Succeeded,
    /// Workflow suspended by a step
    Suspending,
    /// Workflow terminated by a failed step
    Terminated,
    /// Application is being deleted
    Deleting,
}

/// Reference to an ApplicationRevision
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionReference {
    /// Revision object name, `<app>-v<n>`
    pub name: String,
    /// Monotonic revision number
    pub revision: i64,
    /// Content hash of the revision spec
    pub revision_hash: String,
}

/// Per-component service status
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentServiceStatus {
    /// Component name
    pub name: String,
    /// Namespace the workload landed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Cluster the workload landed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Whether workload and all non-filtered traits are healthy
    pub healthy: bool,
    /// Aggregated health message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Per-trait status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<TraitStatus>,
}

/// Status of one trait on one component
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraitStatus {
    /// Trait type as declared on the component
    #[serde(rename = "type")]
    pub trait_type: String,
    /// Whether the trait is healthy
    pub healthy: bool,
    /// Health or lifecycle message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Trait lifecycle state
    #[serde(default)]
    pub state: TraitPhase,
}

/// Trait lifecycle state
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraitPhase {
    /// Deferred trait parked until the workload is observable
    #[default]
    Pending,
    /// Trait rendered, waiting for its resources to be applied
    Waiting,
    /// Trait resources applied to the target cluster
    Dispatched,
}

/// A resource dispatched for the current revision
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResource {
    /// Cluster the resource was applied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// Workflow progress for one revision
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Name of the ApplicationRevision this workflow belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_revision: Option<String>,
    /// Whether the workflow ran all steps to completion
    #[serde(default)]
    pub finished: bool,
    /// Whether a failed step terminated the workflow
    #[serde(default)]
    pub terminated: bool,
    /// Whether a step suspended the workflow
    #[serde(default)]
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC3339 time the workflow started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC3339 time the workflow finished or terminated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Per-step status in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkflowStepStatus>,
}

/// Status of one workflow step
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC3339 time the step first executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_execute_time: Option<String>,
    /// RFC3339 time the step last executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execute_time: Option<String>,
}

/// Workflow step phase
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StepPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Suspended,
}

/// Record of one policy the pre-pass considered
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedApplicationPolicy {
    /// Policy name
    pub name: String,
    /// Namespace the policy definition was discovered in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Whether the rendered result was applied to the Application
    pub enabled: bool,
    /// Why the policy was skipped, when it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Labels the policy added or replaced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_labels: Vec<String>,
    /// Annotations the policy added or replaced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_annotations: Vec<String>,
    /// Whether the policy replaced components, workflow, or policies
    #[serde(default)]
    pub spec_modified: bool,
    /// Keys the policy contributed to the workflow context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keys: Vec<String>,
}

/// A condition observed on the Application
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: ApplicationConditionType,
    /// Status of the condition
    pub status: ConditionStatus,
    /// Last time the condition transitioned from one status to another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// Human-readable message indicating details about last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// One-word CamelCase reason for the condition's last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Condition types reported by the controller
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ApplicationConditionType {
    /// Spec parsed and validated
    Parsed,
    /// Policy pre-pass completed
    PoliciesApplied,
    /// Components rendered into manifests
    Rendered,
    /// Workflow ran to completion
    WorkflowFinished,
    /// All components healthy
    Ready,
}

/// Three-valued condition status
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ApplicationStatus {
    /// Record a condition, replacing any prior condition of the same type
    pub fn set_condition(&mut self, condition: ApplicationCondition) {
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    /// Whether the current workflow is finished or terminated
    pub fn workflow_done(&self) -> bool {
        self.workflow
            .as_ref()
            .map(|w| w.finished || w.terminated)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TraitPhase::Dispatched).unwrap(),
            "\"dispatched\""
        );
        assert_eq!(
            serde_json::from_str::<TraitPhase>("\"pending\"").unwrap(),
            TraitPhase::Pending
        );
    }

    #[test]
    fn set_condition_replaces_same_type() {
        let mut status = ApplicationStatus::default();
        status.set_condition(ApplicationCondition {
            condition_type: ApplicationConditionType::Parsed,
            status: ConditionStatus::False,
            last_transition_time: None,
            message: None,
            reason: None,
        });
        status.set_condition(ApplicationCondition {
            condition_type: ApplicationConditionType::Parsed,
            status: ConditionStatus::True,
            last_transition_time: None,
            message: None,
            reason: None,
        });
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn empty_status_serializes_compactly() {
        let status = ApplicationStatus::default();
        let value = serde_json::to_value(&status).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("phase"));
        assert!(!obj.contains_key("services"));
        assert!(!obj.contains_key("workflow"));
    }
}
