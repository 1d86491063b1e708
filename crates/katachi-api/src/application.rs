//! The `Application` custom resource
//!
//! An Application is the user-authored declarative request: an ordered set
//! of components, an ordered set of policies, and an optional workflow.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::metadata::{
    ANNOTATION_AUTO_REVISION, ANNOTATION_AUTO_UPDATE, ANNOTATION_PUBLISH_VERSION,
    ANNOTATION_SKIP_GLOBAL_POLICIES, ANNOTATION_WORKFLOW_RESTART,
};
use crate::status::ApplicationStatus;

/// Application custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "Application",
    plural = "applications",
    namespaced,
    derive = "Default"
)]
#[kube(status = "ApplicationStatus")]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Ordered component entries
    pub components: Vec<ApplicationComponent>,
    /// Ordered user-declared policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<ApplicationPolicy>,
    /// Workflow driving component application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
}

/// One addressable unit of workload inside an Application
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationComponent {
    /// Component name, unique within the Application
    pub name: String,
    /// Name of the ComponentDefinition providing the workload template
    #[serde(rename = "type")]
    pub component_type: String,
    /// Parameters handed to the workload template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    /// Input bindings consumed from earlier steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputBinding>,
    /// Output bindings exposed to later steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputBinding>,
    /// Names of components that must be applied first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Traits attached to this component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<ApplicationTrait>,
}

/// A modifier attached to a component
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTrait {
    /// Name of the TraitDefinition (or one of its declared variants)
    #[serde(rename = "type")]
    pub trait_type: String,
    /// Parameters handed to the trait template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// A declarative mutation over the Application, rendered through a template
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPolicy {
    /// Policy name, unique within the Application
    pub name: String,
    /// Name of the PolicyDefinition providing the template
    #[serde(rename = "type")]
    pub policy_type: String,
    /// Parameters handed to the policy template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// Ordered set of steps driving component application
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub steps: Vec<WorkflowStepSpec>,
}

/// One workflow step entry
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepSpec {
    /// Step name, unique within the workflow
    pub name: String,
    /// Step type resolved by the step generator
    #[serde(rename = "type")]
    pub step_type: String,
    /// Step properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    /// Input parameters wired from earlier step outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputBinding>,
    /// Outputs exposed to later steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputBinding>,
    /// Names of steps that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// An input parameter wired from a named output
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    /// Name of the output this input reads
    pub from: String,
    /// Target parameter path inside the step properties
    pub parameter_key: String,
}

/// A named output extracted from a step result
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputBinding {
    /// Output name later inputs refer to
    pub name: String,
    /// Path into the step result the value is read from
    pub value_from: String,
}

impl Application {
    /// Read an annotation value off the object metadata
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    fn annotation_is_true(&self, key: &str) -> bool {
        self.annotation(key).map(|v| v == "true").unwrap_or(false)
    }

    /// Whether this Application opted out of global policy application
    pub fn skip_global_policies(&self) -> bool {
        self.annotation_is_true(ANNOTATION_SKIP_GLOBAL_POLICIES)
    }

    /// Whether dispatch must re-apply resources even when the health probe
    /// reports them healthy
    pub fn auto_update(&self) -> bool {
        self.annotation_is_true(ANNOTATION_AUTO_UPDATE)
    }

    /// Whether policy-rendered spec mutations are persisted back to the
    /// Application spec before revision creation
    pub fn auto_revision(&self) -> bool {
        self.annotation_is_true(ANNOTATION_AUTO_REVISION)
    }

    /// User-controlled revision identifier
    pub fn publish_version(&self) -> Option<&str> {
        self.annotation(ANNOTATION_PUBLISH_VERSION)
    }

    /// Raw workflow-restart annotation (RFC3339 timestamp or duration)
    pub fn workflow_restart_annotation(&self) -> Option<&str> {
        self.annotation(ANNOTATION_WORKFLOW_RESTART)
    }
}

impl ApplicationSpec {
    /// Look up a component entry by name
    pub fn component(&self, name: &str) -> Option<&ApplicationComponent> {
        self.components.iter().find(|c| c.name == name)
    }
}
